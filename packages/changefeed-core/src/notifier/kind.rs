use crate::change_info::TransactionChangeInfo;
use crate::changeset::ChangeSetBuilder;
use crate::error::NotifyError;
use crate::snapshot::{Snapshot, TableKey};

/// What a [`NotificationWorker`](super::NotificationWorker) observes.
///
/// Every method except [`deliver`](Notifier::deliver) runs on the worker
/// side. `deliver` runs on the owning thread and only sees the handover
/// payload.
pub trait Notifier: Send + 'static {
    /// Data copied from the worker to the owning thread with each handover.
    type Handover: Clone + Send + Sync + 'static;

    /// Table whose rows the notifier reports on. Tables linking to it are
    /// tracked for transitive modifications.
    fn root_table(&self) -> TableKey;

    /// Computes the changes between the previous run and `snapshot`.
    fn run(
        &mut self,
        snapshot: &dyn Snapshot,
        info: &TransactionChangeInfo,
    ) -> Result<ChangeSetBuilder, NotifyError>;

    /// Moves internal bookkeeping to `snapshot` without computing changes.
    fn skip(&mut self, snapshot: &dyn Snapshot) -> Result<(), NotifyError>;

    /// Drops everything tied to the engine. Called exactly once, right before
    /// the notifier is freed.
    fn release_data(&mut self) {}

    fn attach_to(&mut self, _snapshot: &dyn Snapshot) {}

    fn detach_from(&mut self) {}

    /// Registers additional tracking the notifier needs for the next scan.
    /// Returns `false` if the notifier has nothing to compute.
    fn add_required_change_info(&mut self, _info: &mut TransactionChangeInfo) -> bool {
        true
    }

    /// Produces the payload for the next handover.
    fn prepare_handover(&mut self, _snapshot: &dyn Snapshot) -> Option<Self::Handover> {
        None
    }

    /// Accepts a delivered payload on the owning thread. Returning `false`
    /// suppresses the callback round for this delivery.
    fn deliver(_handover: Option<&Self::Handover>) -> bool {
        true
    }
}
