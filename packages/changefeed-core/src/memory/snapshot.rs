use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;
use crate::snapshot::{ColumnKey, RowKey, Snapshot, TableKey, VersionId};

/// Kind of a column in a [`MemoryEngine`](super::MemoryEngine) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Plain JSON value
    Value,
    /// Optional reference to a row of the given table
    Link(TableKey),
    /// Ordered references to rows of the given table
    List(TableKey),
}

impl ColumnKind {
    pub(super) fn name(self) -> &'static str {
        match self {
            ColumnKind::Value => "value",
            ColumnKind::Link(_) => "link",
            ColumnKind::List(_) => "list",
        }
    }

    pub(super) fn target(self) -> Option<TableKey> {
        match self {
            ColumnKind::Value => None,
            ColumnKind::Link(target) | ColumnKind::List(target) => Some(target),
        }
    }
}

/// Contents of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Value(serde_json::Value),
    Link(Option<RowKey>),
    List(Vec<RowKey>),
}

impl Cell {
    /// Empty cell for a column of `kind`.
    pub fn empty(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Value => Cell::Value(serde_json::Value::Null),
            ColumnKind::Link(_) => Cell::Link(None),
            ColumnKind::List(_) => Cell::List(Vec::new()),
        }
    }

    fn matches(&self, kind: ColumnKind) -> bool {
        matches!(
            (self, kind),
            (Cell::Value(_), ColumnKind::Value)
                | (Cell::Link(_), ColumnKind::Link(_))
                | (Cell::List(_), ColumnKind::List(_))
        )
    }

    /// Returns `true` if the cell references `key`.
    fn references(&self, key: RowKey) -> bool {
        match self {
            Cell::Value(_) => false,
            Cell::Link(link) => *link == Some(key),
            Cell::List(items) => items.contains(&key),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Row {
    pub(super) key: RowKey,
    pub(super) cells: Vec<Cell>,
}

/// One table's rows, in storage order.
#[derive(Debug, Clone)]
pub(super) struct TableData {
    pub(super) name: String,
    pub(super) columns: Vec<ColumnKind>,
    pub(super) rows: Vec<Row>,
    /// Row key to position
    pub(super) index: HashMap<RowKey, usize>,
}

impl TableData {
    pub(super) fn new(name: String, columns: Vec<ColumnKind>) -> Self {
        Self {
            name,
            columns,
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub(super) fn position(&self, table: TableKey, key: RowKey) -> Result<usize, NotifyError> {
        self.index
            .get(&key)
            .copied()
            .ok_or(NotifyError::RowNotFound { table, row: key })
    }

    pub(super) fn column(&self, table: TableKey, column: ColumnKey) -> Result<ColumnKind, NotifyError> {
        self.columns
            .get(column.0 as usize)
            .copied()
            .ok_or(NotifyError::ColumnNotFound { table, column })
    }

    /// Checks that `cells` fits the table's columns.
    pub(super) fn check_cells(&self, table: TableKey, cells: &[Cell]) -> Result<(), NotifyError> {
        if cells.len() != self.columns.len() {
            return Err(NotifyError::SnapshotRead(format!(
                "{} expects {} cells, got {}",
                self.name,
                self.columns.len(),
                cells.len()
            )));
        }
        for (i, (cell, kind)) in cells.iter().zip(&self.columns).enumerate() {
            if !cell.matches(*kind) {
                return Err(NotifyError::ColumnKindMismatch {
                    table,
                    column: ColumnKey(i as u32),
                    expected: kind.name(),
                });
            }
        }
        Ok(())
    }

    /// Expects `column` to be a list column and returns its target table.
    pub(super) fn list_column(&self, table: TableKey, column: ColumnKey) -> Result<TableKey, NotifyError> {
        match self.column(table, column)? {
            ColumnKind::List(target) => Ok(target),
            _ => Err(NotifyError::ColumnKindMismatch {
                table,
                column,
                expected: ColumnKind::List(table).name(),
            }),
        }
    }

    /// Expects `column` to be a link column and returns its target table.
    pub(super) fn link_column(&self, table: TableKey, column: ColumnKey) -> Result<TableKey, NotifyError> {
        match self.column(table, column)? {
            ColumnKind::Link(target) => Ok(target),
            _ => Err(NotifyError::ColumnKindMismatch {
                table,
                column,
                expected: ColumnKind::Link(table).name(),
            }),
        }
    }

    /// Removes the row at `position` by moving the last row into its place.
    pub(super) fn swap_remove(&mut self, position: usize) -> Row {
        let removed = self.rows.swap_remove(position);
        self.index.remove(&removed.key);
        if let Some(moved) = self.rows.get(position) {
            self.index.insert(moved.key, position);
        }
        removed
    }
}

/// Immutable view of one version of a [`MemoryEngine`](super::MemoryEngine).
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    pub(super) version: VersionId,
    pub(super) tables: Vec<Arc<TableData>>,
}

impl MemorySnapshot {
    pub(super) fn table(&self, table: TableKey) -> Result<&TableData, NotifyError> {
        self.tables
            .get(table.index())
            .map(Arc::as_ref)
            .ok_or(NotifyError::TableNotFound { table })
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Looks a table up by name.
    pub fn table_key(&self, name: &str) -> Option<TableKey> {
        self.tables
            .iter()
            .position(|t| t.name == name)
            .map(|i| TableKey(i as u32))
    }

    /// Cell `column` of the row with identity `key`.
    pub fn cell(&self, table: TableKey, key: RowKey, column: ColumnKey) -> Result<&Cell, NotifyError> {
        let data = self.table(table)?;
        let position = data.position(table, key)?;
        data.column(table, column)?;
        Ok(&data.rows[position].cells[column.0 as usize])
    }
}

impl Snapshot for MemorySnapshot {
    fn version(&self) -> VersionId {
        self.version
    }

    fn row_count(&self, table: TableKey) -> Result<usize, NotifyError> {
        Ok(self.table(table)?.rows.len())
    }

    fn rows(&self, table: TableKey) -> Result<Vec<RowKey>, NotifyError> {
        Ok(self.table(table)?.rows.iter().map(|row| row.key).collect())
    }

    fn find_row(&self, table: TableKey, key: RowKey) -> Option<usize> {
        self.table(table).ok()?.index.get(&key).copied()
    }

    fn backlinks(&self, table: TableKey, row: usize) -> Vec<(TableKey, usize)> {
        let Some(key) = self
            .table(table)
            .ok()
            .and_then(|data| data.rows.get(row))
            .map(|r| r.key)
        else {
            return Vec::new();
        };
        let mut origins = Vec::new();
        for (index, data) in self.tables.iter().enumerate() {
            let columns: Vec<usize> = data
                .columns
                .iter()
                .enumerate()
                .filter(|(_, kind)| kind.target() == Some(table))
                .map(|(i, _)| i)
                .collect();
            if columns.is_empty() {
                continue;
            }
            for (position, origin) in data.rows.iter().enumerate() {
                if columns.iter().any(|&c| origin.cells[c].references(key)) {
                    origins.push((TableKey(index as u32), position));
                }
            }
        }
        origins
    }

    fn backlink_tables(&self, table: TableKey) -> Vec<TableKey> {
        self.tables
            .iter()
            .enumerate()
            .filter(|(_, data)| data.columns.iter().any(|kind| kind.target() == Some(table)))
            .map(|(index, _)| TableKey(index as u32))
            .collect()
    }

    fn list(&self, table: TableKey, row: usize, column: ColumnKey) -> Result<Vec<RowKey>, NotifyError> {
        let data = self.table(table)?;
        data.list_column(table, column)?;
        let len = data.rows.len();
        let origin = data
            .rows
            .get(row)
            .ok_or(NotifyError::RowOutOfBounds { table, row, len })?;
        match &origin.cells[column.0 as usize] {
            Cell::List(items) => Ok(items.clone()),
            _ => Err(NotifyError::ColumnKindMismatch {
                table,
                column,
                expected: "list",
            }),
        }
    }
}
