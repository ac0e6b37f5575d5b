//! Per-transaction change tracking requested by notifiers.
//!
//! Before a transaction log is scanned every notifier declares which tables
//! and lists it cares about. The scan then only feeds builders that were
//! asked for, and afterwards notifiers query the filled-in info.

use std::collections::HashSet;

use crate::changeset::ChangeSetBuilder;
use crate::config::NotifierConfig;
use crate::snapshot::{ColumnKey, RowKey, Snapshot, TableKey};

/// Changes to one list column of one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListChangeInfo {
    pub table: TableKey,
    pub row: RowKey,
    pub column: ColumnKey,
    pub changes: ChangeSetBuilder,
}

/// Handle to a list registered with [`TransactionChangeInfo::register_list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListHandle(usize);

/// Everything a notifier may want to know about one scanned transaction.
#[derive(Debug, Clone)]
pub struct TransactionChangeInfo {
    table_modifications_needed: Vec<bool>,
    table_moves_needed: Vec<bool>,
    lists: Vec<ListChangeInfo>,
    tables: Vec<Option<ChangeSetBuilder>>,
    max_link_depth: usize,
}

impl Default for TransactionChangeInfo {
    fn default() -> Self {
        Self::with_config(&NotifierConfig::default())
    }
}

impl TransactionChangeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: &NotifierConfig) -> Self {
        Self {
            table_modifications_needed: Vec::new(),
            table_moves_needed: Vec::new(),
            lists: Vec::new(),
            tables: Vec::new(),
            max_link_depth: config.max_link_depth,
        }
    }

    /// Requests that modifications to rows of `table` be tracked.
    pub fn require_modifications(&mut self, table: TableKey) {
        set_flag(&mut self.table_modifications_needed, table);
    }

    /// Requests that insertions, deletions and moves in `table` be tracked.
    /// Implies modification tracking.
    pub fn require_moves(&mut self, table: TableKey) {
        set_flag(&mut self.table_modifications_needed, table);
        set_flag(&mut self.table_moves_needed, table);
    }

    pub fn tracks_modifications(&self, table: TableKey) -> bool {
        flag(&self.table_modifications_needed, table)
    }

    pub fn tracks_moves(&self, table: TableKey) -> bool {
        flag(&self.table_moves_needed, table)
    }

    /// Returns `true` if nothing at all was requested.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
            && !self.table_modifications_needed.iter().any(|needed| *needed)
    }

    /// Registers interest in the list `column` of `row`. Registering the same
    /// list twice yields two independent entries.
    pub fn register_list(&mut self, table: TableKey, row: RowKey, column: ColumnKey) -> ListHandle {
        self.lists.push(ListChangeInfo {
            table,
            row,
            column,
            changes: ChangeSetBuilder::default(),
        });
        ListHandle(self.lists.len() - 1)
    }

    pub fn list_changes(&self, handle: ListHandle) -> Option<&ListChangeInfo> {
        self.lists.get(handle.0)
    }

    pub fn lists(&self) -> &[ListChangeInfo] {
        &self.lists
    }

    /// Registered lists belonging to `row` in `table`, any column.
    pub fn lists_of_row_mut(
        &mut self,
        table: TableKey,
        row: RowKey,
    ) -> impl Iterator<Item = &mut ListChangeInfo> + '_ {
        self.lists
            .iter_mut()
            .filter(move |list| list.table == table && list.row == row)
    }

    /// Builders of every registration of the list `column` of `row`.
    pub fn list_builders_mut(
        &mut self,
        table: TableKey,
        row: RowKey,
        column: ColumnKey,
    ) -> impl Iterator<Item = &mut ChangeSetBuilder> + '_ {
        self.lists_of_row_mut(table, row)
            .filter(move |list| list.column == column)
            .map(|list| &mut list.changes)
    }

    /// Changes recorded for `table`, if anything was recorded.
    pub fn table_changes(&self, table: TableKey) -> Option<&ChangeSetBuilder> {
        self.tables.get(table.index()).and_then(Option::as_ref)
    }

    /// Builder for `table`, created on first use. `None` if the table is not
    /// tracked.
    pub fn table_changes_mut(&mut self, table: TableKey) -> Option<&mut ChangeSetBuilder> {
        if !self.tracks_modifications(table) {
            return None;
        }
        let index = table.index();
        if self.tables.len() <= index {
            self.tables.resize_with(index + 1, || None);
        }
        Some(self.tables[index].get_or_insert_with(ChangeSetBuilder::default))
    }

    /// Finalizes every builder once the log scan is done.
    pub fn parse_complete(&mut self) {
        for builder in self.tables.iter_mut().flatten() {
            builder.parse_complete();
        }
        for list in &mut self.lists {
            list.changes.parse_complete();
        }
    }

    /// Returns `true` if the row at position `row` of `table` was modified,
    /// or if a row linking to it (directly or through a chain of links)
    /// was.
    ///
    /// Links are followed to at most the configured depth. Tables nobody asked
    /// to track never count as modified. Every row is examined at most once
    /// per call, at its shortest link distance, so cyclic and densely linked
    /// graphs cost no more than the rows and links within reach.
    pub fn row_did_change<S>(&self, snapshot: &S, table: TableKey, row: usize) -> bool
    where
        S: Snapshot + ?Sized,
    {
        if !self.tracks_modifications(table) {
            return false;
        }
        let mut visited = HashSet::from([(table, row)]);
        let mut frontier = vec![(table, row)];
        for depth in 0..=self.max_link_depth {
            let mut next = Vec::new();
            for (table, row) in frontier {
                if self.is_modified(table, row) {
                    return true;
                }
                if depth == self.max_link_depth {
                    continue;
                }
                for origin in snapshot.backlinks(table, row) {
                    if self.tracks_modifications(origin.0) && visited.insert(origin) {
                        next.push(origin);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        false
    }

    fn is_modified(&self, table: TableKey, row: usize) -> bool {
        self.table_changes(table)
            .is_some_and(|changes| changes.is_modified(row))
    }
}

fn set_flag(flags: &mut Vec<bool>, table: TableKey) {
    let index = table.index();
    if flags.len() <= index {
        flags.resize(index + 1, false);
    }
    flags[index] = true;
}

fn flag(flags: &[bool], table: TableKey) -> bool {
    flags.get(table.index()).copied().unwrap_or(false)
}
