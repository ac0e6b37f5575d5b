//! Change tracking and notification for live collection views.
//!
//! Computes what changed in a collection between two snapshots as a
//! changeset of deletions, insertions, modifications and moves, does so on a
//! background worker, and hands the result to callbacks on the thread that
//! owns the collection. Includes an in-memory engine to drive it.

pub mod callbacks;
pub mod change_info;
pub mod changeset;
pub mod config;
pub mod error;
pub mod memory;
pub mod notifier;
pub mod snapshot;

pub use callbacks::{CallbackFn, CallbackRegistry, CallbackToken, Notification};
pub use change_info::{ListChangeInfo, ListHandle, TransactionChangeInfo};
pub use changeset::{ChangeSetBuilder, Changeset, IndexSet, Move};
pub use config::NotifierConfig;
pub use error::NotifyError;
pub use notifier::{
    CollectionHandle, ExecutionContext, ListNotifier, NotificationWorker, Notifier,
    ResultsNotifier, ResultsOrder, RowFilter,
};
pub use snapshot::{ColumnKey, RowKey, Snapshot, TableKey, VersionId};
