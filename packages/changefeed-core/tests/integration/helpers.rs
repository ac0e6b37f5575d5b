//! Shared fixtures for the integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use changefeed_core::memory::{Cell, ColumnKind, MemoryEngine};
use changefeed_core::{
    CollectionHandle, ExecutionContext, NotificationWorker, Notifier, RowKey,
    Snapshot, TableKey, TransactionChangeInfo, VersionId,
};
use parking_lot::Mutex;
use serde_json::json;

/// Routes tracing output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Owner-side stand-in for a live collection.
pub struct Collection {
    context: ExecutionContext,
    wakes: AtomicUsize,
}

impl Collection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            context: ExecutionContext::new(),
            wakes: AtomicUsize::new(0),
        })
    }

    pub fn wakes(&self) -> usize {
        self.wakes.load(Ordering::SeqCst)
    }
}

impl CollectionHandle for Collection {
    fn context(&self) -> ExecutionContext {
        self.context
    }

    fn request_notifications(&self) {
        self.wakes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Worker-side driver: scans the log from where the worker left off,
/// re-attaches to the head snapshot, runs the notifier and publishes the
/// handover.
pub struct Pass<N: Notifier> {
    engine: Arc<MemoryEngine>,
    worker: Arc<NotificationWorker<N>>,
}

impl<N: Notifier> Pass<N> {
    pub fn new(engine: Arc<MemoryEngine>, worker: Arc<NotificationWorker<N>>) -> Self {
        Self { engine, worker }
    }

    /// Last version the worker ran or skipped at.
    pub fn seen(&self) -> VersionId {
        self.worker.skip_to_version().unwrap_or(VersionId(0))
    }

    pub fn run(&mut self) -> anyhow::Result<VersionId> {
        let mut info = TransactionChangeInfo::with_config(self.worker.config());
        self.worker.add_required_change_info(&mut info);
        let snapshot = self.engine.snapshot();
        let to = snapshot.version();
        self.engine.scan(self.seen(), to, &mut info)?;
        let _ = self.worker.detach();
        self.worker.attach_to(snapshot)?;
        self.worker.run(&info)?;
        self.worker.prepare_handover()?;
        Ok(to)
    }
}

/// Everything a callback has been handed, in order.
pub type Received = Arc<Mutex<Vec<changefeed_core::Notification>>>;

pub fn record<N: Notifier>(worker: &NotificationWorker<N>) -> Received {
    let received: Received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    worker.add_callback(move |n: &changefeed_core::Notification| sink.lock().push(n.clone()));
    received
}

/// `people(name)` with `count` rows named by number.
pub fn people(engine: &MemoryEngine, count: usize) -> anyhow::Result<(TableKey, Vec<RowKey>)> {
    let table = engine.create_table("people", vec![ColumnKind::Value])?;
    let (keys, _) = engine.write(|tx| {
        (0..count)
            .map(|i| tx.create_row(table, vec![Cell::Value(json!(i))]))
            .collect()
    })?;
    Ok((table, keys))
}

/// Owner-side copy of a collection kept up to date by applying changesets.
pub struct View {
    pub rows: Vec<RowKey>,
}

impl View {
    /// Applies every changeset received so far and drains them.
    ///
    /// Inserted and modified rows are read from `current`, the rows the
    /// notifier handed over with the delivery.
    pub fn catch_up(&mut self, received: &Received, current: &[RowKey]) {
        for notification in received.lock().drain(..) {
            if let Some(changes) = notification.changes() {
                self.rows = changes.apply(&self.rows, |position| current[position]);
                for position in changes.modifications_new.iter() {
                    self.rows[position] = current[position];
                }
            }
        }
    }
}

/// Row keys of `table` at the engine's head.
pub fn head_rows(engine: &MemoryEngine, table: TableKey) -> anyhow::Result<Vec<RowKey>> {
    Ok(engine.snapshot().rows(table)?)
}
