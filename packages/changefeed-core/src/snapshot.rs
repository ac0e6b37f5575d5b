//! Storage engine interface consumed by the notification pipeline.
//!
//! The engine itself (snapshot creation, durability, query evaluation) lives
//! elsewhere. Notifiers only ever see an immutable [`Snapshot`] identified by
//! a totally ordered [`VersionId`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

/// Identifier of an immutable snapshot of the engine's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct VersionId(pub u64);

impl VersionId {
    /// Returns `true` if a reader positioned at `from` can advance to `self`
    /// by moving forward through the version history.
    pub fn is_reachable_from(self, from: VersionId) -> bool {
        from <= self
    }

    /// Returns the version that directly follows this one.
    pub fn next(self) -> VersionId {
        VersionId(self.0 + 1)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Index of a table within the engine's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableKey(pub u32);

impl TableKey {
    /// Position of the table in per-table vectors.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

/// Stable identity of a row. Unlike a row position it survives compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey(pub u64);

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row#{}", self.0)
    }
}

/// Index of a column within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnKey(pub u32);

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col#{}", self.0)
    }
}

/// Read-only view of one version of the engine's data.
///
/// Rows are addressed by position (`usize`) within their table; positions are
/// only meaningful for the snapshot they were read from.
pub trait Snapshot: Send + Sync + 'static {
    /// Version this snapshot was taken at.
    fn version(&self) -> VersionId;

    /// Number of rows in `table`.
    fn row_count(&self, table: TableKey) -> Result<usize, NotifyError>;

    /// Row identities of `table` in storage order.
    fn rows(&self, table: TableKey) -> Result<Vec<RowKey>, NotifyError>;

    /// Current position of the row with identity `key`, if it exists.
    fn find_row(&self, table: TableKey, key: RowKey) -> Option<usize>;

    /// Returns `true` if `row` is a valid position in `table`.
    fn row_exists(&self, table: TableKey, row: usize) -> bool {
        self.row_count(table).is_ok_and(|count| row < count)
    }

    /// Rows (table, position) holding a link or list entry that points at
    /// `row` in `table`.
    fn backlinks(&self, table: TableKey, row: usize) -> Vec<(TableKey, usize)>;

    /// Tables having at least one link or list column targeting `table`.
    fn backlink_tables(&self, table: TableKey) -> Vec<TableKey>;

    /// Contents of the list column `column` of `row` in `table`.
    fn list(&self, table: TableKey, row: usize, column: ColumnKey)
        -> Result<Vec<RowKey>, NotifyError>;
}
