//! Background change computation and cross-thread delivery.
//!
//! A [`NotificationWorker`] is shared between the thread owning a collection
//! and a worker thread. The worker thread attaches it to successive snapshots
//! and calls `run`/`skip` and `prepare_handover`; the owning thread calls
//! `deliver` and `call_callbacks`. The two sides meet only in the handover
//! slot, guarded by the target lock, which is held for copies and swaps and
//! never while changes are computed.
//!
//! Lock order is target lock, then callback lock. The worker-state lock is
//! only ever taken by the worker side and is held while a notifier computes
//! its changes; nothing on the owning thread waits on it.

mod context;
mod kind;
mod list;
mod results;

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::callbacks::{CallbackRegistry, CallbackToken, Notification};
use crate::change_info::TransactionChangeInfo;
use crate::changeset::ChangeSetBuilder;
use crate::config::NotifierConfig;
use crate::error::NotifyError;
use crate::snapshot::{Snapshot, TableKey, VersionId};

pub use context::{CollectionHandle, ExecutionContext};
pub use kind::Notifier;
pub use list::ListNotifier;
pub use results::{ResultsNotifier, ResultsOrder, RowFilter};

/// Computed changes waiting for the owning thread.
struct HandoverSlot<H> {
    version: VersionId,
    changes: ChangeSetBuilder,
    error: Option<NotifyError>,
    payload: Option<H>,
}

/// State visible to the owning thread.
struct TargetState<H> {
    collection: Option<Arc<dyn CollectionHandle>>,
    handover: Option<HandoverSlot<H>>,
    /// Delivered but not yet passed to callbacks
    changes: ChangeSetBuilder,
    error: Option<NotifyError>,
    delivered_version: Option<VersionId>,
    payload: Option<H>,
}

/// State owned by the worker side.
struct WorkerState<N> {
    kind: N,
    snapshot: Option<Arc<dyn Snapshot>>,
    /// Version computed by the last run or skip, not yet handed over
    version: Option<VersionId>,
    /// Version the next log scan resumes from
    skip_to_version: Option<VersionId>,
    accumulated: ChangeSetBuilder,
    error: Option<NotifyError>,
    skipped: bool,
    relevant_tables: Vec<TableKey>,
}

/// Drives one [`Notifier`] and delivers its results to callbacks.
pub struct NotificationWorker<N: Notifier> {
    context: ExecutionContext,
    config: NotifierConfig,
    target: Mutex<TargetState<N::Handover>>,
    callbacks: CallbackRegistry,
    worker: Mutex<WorkerState<N>>,
}

impl<N: Notifier> NotificationWorker<N> {
    /// Creates a worker reporting to `collection`.
    pub fn new(kind: N, collection: Arc<dyn CollectionHandle>) -> Self {
        Self::with_config(kind, collection, NotifierConfig::default())
    }

    pub fn with_config(
        kind: N,
        collection: Arc<dyn CollectionHandle>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            context: collection.context(),
            config,
            target: Mutex::new(TargetState {
                collection: Some(collection),
                handover: None,
                changes: ChangeSetBuilder::default(),
                error: None,
                delivered_version: None,
                payload: None,
            }),
            callbacks: CallbackRegistry::new(),
            worker: Mutex::new(WorkerState {
                kind,
                snapshot: None,
                version: None,
                skip_to_version: None,
                accumulated: ChangeSetBuilder::default(),
                error: None,
                skipped: false,
                relevant_tables: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &NotifierConfig {
        &self.config
    }

    /// Returns `true` if the worker belongs to `context`.
    pub fn is_for_context(&self, context: ExecutionContext) -> bool {
        self.context == context
    }

    /// Registers a callback. Wakes the owning collection if the worker had
    /// no callbacks before, since it has been skipping work until now.
    pub fn add_callback<F>(&self, func: F) -> CallbackToken
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let (token, wake) = {
            let target = self.target.lock();
            let was_idle = !self.callbacks.has_callbacks();
            let token = self.callbacks.add(Arc::new(func));
            let wake = if was_idle {
                target.collection.clone()
            } else {
                None
            };
            (token, wake)
        };
        if let Some(collection) = wake {
            collection.request_notifications();
        }
        token
    }

    /// Removes a callback. Safe from any thread, including from inside a
    /// callback.
    pub fn remove_callback(&self, token: CallbackToken) -> bool {
        self.callbacks.remove(token)
    }

    pub fn has_callbacks(&self) -> bool {
        self.callbacks.has_callbacks()
    }

    /// Drops the reference to the owning collection. Work already running
    /// completes but is never delivered.
    pub fn unregister(&self) {
        let collection = self.target.lock().collection.take();
        if collection.is_some() {
            tracing::debug!("Notifier unregistered");
        }
    }

    pub fn is_alive(&self) -> bool {
        self.target.lock().collection.is_some()
    }

    /// Declares the tracking this worker needs for the next log scan.
    ///
    /// Does nothing while there are no callbacks.
    ///
    /// # Returns
    /// `true` if the worker registered anything and expects to be run.
    pub fn add_required_change_info(&self, info: &mut TransactionChangeInfo) -> bool {
        if !self.callbacks.has_callbacks() {
            return false;
        }
        let mut guard = self.worker.lock();
        let worker = &mut *guard;
        for table in &worker.relevant_tables {
            info.require_modifications(*table);
        }
        worker.kind.add_required_change_info(info)
    }

    /// Binds the worker to `snapshot`.
    ///
    /// # Errors
    /// [`NotifyError::AlreadyAttached`] if a snapshot is already attached.
    pub fn attach_to(&self, snapshot: Arc<dyn Snapshot>) -> Result<(), NotifyError> {
        let mut guard = self.worker.lock();
        let worker = &mut *guard;
        if let Some(current) = &worker.snapshot {
            return Err(NotifyError::AlreadyAttached {
                version: current.version(),
            });
        }
        worker.relevant_tables = relevant_tables(snapshot.as_ref(), worker.kind.root_table());
        worker.kind.attach_to(snapshot.as_ref());
        tracing::debug!(
            "Notifier attached to {} ({} relevant tables)",
            snapshot.version(),
            worker.relevant_tables.len()
        );
        worker.snapshot = Some(snapshot);
        Ok(())
    }

    /// Releases the attached snapshot.
    ///
    /// # Errors
    /// [`NotifyError::NotAttached`] if nothing is attached.
    pub fn detach(&self) -> Result<(), NotifyError> {
        let mut guard = self.worker.lock();
        let worker = &mut *guard;
        let snapshot = worker.snapshot.take().ok_or(NotifyError::NotAttached)?;
        worker.kind.detach_from();
        tracing::debug!("Notifier detached from {}", snapshot.version());
        Ok(())
    }

    /// Computes the changes leading to the attached snapshot and folds them
    /// into the pending result. Falls back to [`skip`](Self::skip) when no
    /// callback would see the result.
    ///
    /// Failures of the notifier are captured and delivered later, they are
    /// not returned here.
    ///
    /// # Errors
    /// [`NotifyError::NotAttached`] if no snapshot is attached.
    pub fn run(&self, info: &TransactionChangeInfo) -> Result<(), NotifyError> {
        if !self.callbacks.has_callbacks() {
            return self.skip();
        }
        let mut guard = self.worker.lock();
        let worker = &mut *guard;
        let snapshot = worker.snapshot.clone().ok_or(NotifyError::NotAttached)?;
        match worker.kind.run(snapshot.as_ref(), info) {
            Ok(changes) => {
                tracing::trace!(
                    "Notifier run at {}: {} deletions, {} insertions, {} modifications, {} moves",
                    snapshot.version(),
                    changes.deletions().len(),
                    changes.insertions().len(),
                    changes.modifications().len(),
                    changes.moves().len()
                );
                worker.accumulated.merge(changes);
                if self.config.verify_changesets && !worker.accumulated.is_consistent() {
                    tracing::error!(
                        "Inconsistent accumulated changes at {}: {:?}",
                        snapshot.version(),
                        worker.accumulated
                    );
                }
            }
            Err(e) => {
                tracing::warn!("Notifier run at {} failed: {}", snapshot.version(), e);
                worker.error = Some(e);
            }
        }
        worker.version = Some(snapshot.version());
        worker.skip_to_version = Some(snapshot.version());
        worker.skipped = false;
        Ok(())
    }

    /// Advances to the attached snapshot without computing changes.
    ///
    /// # Errors
    /// [`NotifyError::NotAttached`] if no snapshot is attached.
    pub fn skip(&self) -> Result<(), NotifyError> {
        let mut guard = self.worker.lock();
        let worker = &mut *guard;
        let snapshot = worker.snapshot.clone().ok_or(NotifyError::NotAttached)?;
        if let Err(e) = worker.kind.skip(snapshot.as_ref()) {
            tracing::warn!("Notifier skip at {} failed: {}", snapshot.version(), e);
            worker.error = Some(e);
        }
        worker.accumulated = ChangeSetBuilder::default();
        worker.version = Some(snapshot.version());
        worker.skip_to_version = Some(snapshot.version());
        worker.skipped = true;
        Ok(())
    }

    /// Publishes the result of the last run or skip for the owning thread.
    ///
    /// An earlier handover the owner has not picked up yet is merged with
    /// this one when `coalesce_handovers` is set, and replaced otherwise.
    ///
    /// # Errors
    /// [`NotifyError::NotAttached`] if no snapshot is attached.
    pub fn prepare_handover(&self) -> Result<(), NotifyError> {
        let (version, changes, error, payload, skipped) = {
            let mut guard = self.worker.lock();
            let worker = &mut *guard;
            let snapshot = worker.snapshot.clone().ok_or(NotifyError::NotAttached)?;
            let Some(version) = worker.version.take() else {
                return Ok(());
            };
            let payload = worker.kind.prepare_handover(snapshot.as_ref());
            (
                version,
                mem::take(&mut worker.accumulated),
                worker.error.take(),
                payload,
                worker.skipped,
            )
        };

        let mut target = self.target.lock();
        match target.handover.as_mut() {
            Some(slot) if self.config.coalesce_handovers && !skipped => {
                tracing::debug!(
                    "Coalescing undelivered handover {} into {}",
                    slot.version,
                    version
                );
                slot.version = version;
                slot.changes.merge(changes);
                slot.error = slot.error.take().or(error);
                slot.payload = payload;
            }
            _ => {
                target.handover = Some(HandoverSlot {
                    version,
                    changes,
                    error,
                    payload,
                });
            }
        }
        Ok(())
    }

    /// Takes the pending handover on the owning thread.
    ///
    /// `snapshot` is the owner's current view; the handover is only taken if
    /// it was computed for exactly that version. A mismatch is not an error,
    /// the owner retries once it has advanced (or once the worker has caught
    /// up). An `error` reported by the caller is stored for the next callback
    /// round instead.
    ///
    /// # Returns
    /// `true` if [`call_callbacks`](Self::call_callbacks) should be called.
    pub fn deliver<S>(&self, snapshot: &S, error: Option<NotifyError>) -> bool
    where
        S: Snapshot + ?Sized,
    {
        let mut target = self.target.lock();
        if target.collection.is_none() {
            return false;
        }
        if let Some(e) = error {
            target.error = Some(e);
            return self.callbacks.has_callbacks();
        }

        let wanted = snapshot.version();
        let Some(pending) = target.handover.as_ref().map(|slot| slot.version) else {
            return false;
        };
        if pending != wanted {
            if pending > wanted {
                tracing::debug!("Handover {} is ahead of owner at {}", pending, wanted);
            } else {
                tracing::debug!("Handover {} is stale for owner at {}", pending, wanted);
            }
            return false;
        }
        let Some(slot) = target.handover.take() else {
            return false;
        };

        let proceed = N::deliver(slot.payload.as_ref());
        target.changes.merge(slot.changes);
        target.error = target.error.take().or(slot.error);
        target.delivered_version = Some(slot.version);
        target.payload = slot.payload;
        proceed && self.callbacks.has_callbacks()
    }

    /// Passes the delivered changes (or error) to the callbacks.
    ///
    /// Called from inside a callback this does nothing; the delivered
    /// changes stay for the next round.
    ///
    /// # Returns
    /// Number of callbacks invoked.
    pub fn call_callbacks(&self) -> usize {
        if self.callbacks.in_round() {
            return 0;
        }
        let (changes, error) = {
            let mut target = self.target.lock();
            (mem::take(&mut target.changes), target.error.take())
        };
        let changes = Arc::new(changes.finish());
        self.callbacks.call(&changes, error.as_ref())
    }

    /// Version of the handover waiting for the owning thread, if any.
    pub fn version(&self) -> Option<VersionId> {
        self.target.lock().handover.as_ref().map(|slot| slot.version)
    }

    /// Version the next log scan should start from: the version of the last
    /// run or skip, unless overridden. `None` before the first pass.
    pub fn skip_to_version(&self) -> Option<VersionId> {
        self.worker.lock().skip_to_version
    }

    /// Overrides where the next log scan starts, e.g. after the scheduler
    /// advanced the worker without running it.
    pub fn set_skip_to_version(&self, version: VersionId) {
        self.worker.lock().skip_to_version = Some(version);
    }

    /// Version of the last successful delivery.
    pub fn delivered_version(&self) -> Option<VersionId> {
        self.target.lock().delivered_version
    }

    /// Payload of the last successful delivery.
    pub fn delivered_payload(&self) -> Option<N::Handover> {
        self.target.lock().payload.clone()
    }

    /// Gives up one reference. The holder of the last one runs the release
    /// hook before the worker is freed.
    ///
    /// # Returns
    /// `true` if this call released the worker.
    pub fn release(this: Arc<Self>) -> bool {
        match Arc::into_inner(this) {
            Some(worker) => {
                worker.release_data();
                true
            }
            None => false,
        }
    }

    fn release_data(self) {
        let mut state = self.worker.into_inner();
        state.snapshot = None;
        state.kind.release_data();
        tracing::debug!("Notifier released");
    }
}

/// Tables whose modifications can make a row of `root` count as changed:
/// `root` itself and every table linking to it, directly or transitively.
fn relevant_tables(snapshot: &dyn Snapshot, root: TableKey) -> Vec<TableKey> {
    let mut tables = vec![root];
    let mut queue = VecDeque::from([root]);
    while let Some(table) = queue.pop_front() {
        for origin in snapshot.backlink_tables(table) {
            if !tables.contains(&origin) {
                tables.push(origin);
                queue.push_back(origin);
            }
        }
    }
    tables
}
