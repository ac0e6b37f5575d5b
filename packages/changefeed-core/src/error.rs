//! Notification pipeline error types.

use thiserror::Error;

use crate::snapshot::{ColumnKey, RowKey, TableKey, VersionId};

/// Errors raised while reading snapshots or driving a notifier.
///
/// Cloneable because one captured failure is delivered to every callback.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// Table not found
    #[error("Table {table} not found")]
    TableNotFound { table: TableKey },

    /// Row identity not found in table
    #[error("Row {row} not found in {table}")]
    RowNotFound { table: TableKey, row: RowKey },

    /// Row position past the end of the table
    #[error("Row position {row} out of bounds for {table} (len: {len})")]
    RowOutOfBounds {
        table: TableKey,
        row: usize,
        len: usize,
    },

    /// Column not found in table
    #[error("Column {column} not found in {table}")]
    ColumnNotFound { table: TableKey, column: ColumnKey },

    /// Column has a different kind than the operation requires
    #[error("Column {column} in {table} is not a {expected} column")]
    ColumnKindMismatch {
        table: TableKey,
        column: ColumnKey,
        expected: &'static str,
    },

    /// List index past the end of the list
    #[error("List index {index} out of bounds (len: {len})")]
    ListIndexOutOfBounds { index: usize, len: usize },

    /// Generic snapshot read failure reported by the engine
    #[error("Snapshot read failed: {0}")]
    SnapshotRead(String),

    /// attach_to() called while already attached
    #[error("Notifier already attached to {version}")]
    AlreadyAttached { version: VersionId },

    /// Operation requires an attached snapshot
    #[error("Notifier is not attached to a snapshot")]
    NotAttached,

    /// Version missing from the commit log
    #[error("Version {version} not found in commit log")]
    VersionNotFound { version: VersionId },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
