use crate::change_info::{ListHandle, TransactionChangeInfo};
use crate::changeset::ChangeSetBuilder;
use crate::error::NotifyError;
use crate::snapshot::{ColumnKey, RowKey, Snapshot, TableKey};

use super::Notifier;

/// Observes one list column of one row.
///
/// Structural changes come from the log scan; element modifications are
/// derived from the rows the elements point to. Once the owning row is gone
/// the list is reported as cleared, once, and stays empty.
pub struct ListNotifier {
    table: TableKey,
    row: RowKey,
    column: ColumnKey,
    target_table: TableKey,
    handle: Option<ListHandle>,
    previous: Option<Vec<RowKey>>,
    owner_deleted: bool,
}

impl ListNotifier {
    /// `target_table` is the table the list's elements live in.
    pub fn new(table: TableKey, row: RowKey, column: ColumnKey, target_table: TableKey) -> Self {
        Self {
            table,
            row,
            column,
            target_table,
            handle: None,
            previous: None,
            owner_deleted: false,
        }
    }

    fn read(&self, snapshot: &dyn Snapshot) -> Result<Option<Vec<RowKey>>, NotifyError> {
        match snapshot.find_row(self.table, self.row) {
            Some(position) => snapshot.list(self.table, position, self.column).map(Some),
            None => Ok(None),
        }
    }
}

impl Notifier for ListNotifier {
    type Handover = Vec<RowKey>;

    fn root_table(&self) -> TableKey {
        self.target_table
    }

    fn run(
        &mut self,
        snapshot: &dyn Snapshot,
        info: &TransactionChangeInfo,
    ) -> Result<ChangeSetBuilder, NotifyError> {
        let handle = self.handle.take();
        if self.owner_deleted {
            return Ok(ChangeSetBuilder::default());
        }
        let Some(items) = self.read(snapshot)? else {
            self.owner_deleted = true;
            let mut changes = ChangeSetBuilder::default();
            if let Some(previous) = self.previous.replace(Vec::new()) {
                changes.clear(previous.len());
            }
            return Ok(changes);
        };

        let Some(previous) = self.previous.as_ref() else {
            self.previous = Some(items);
            return Ok(ChangeSetBuilder::default());
        };
        // Without a registration from this scan (callbacks were added after
        // the scan was prepared, or `info` is not the info registered with)
        // fall back to diffing the contents.
        let registered = handle
            .and_then(|h| info.list_changes(h))
            .filter(|list| {
                list.table == self.table && list.row == self.row && list.column == self.column
            });
        let mut changes = match registered {
            Some(list) => list.changes.clone(),
            None => ChangeSetBuilder::calculate(previous, &items, |_| false, true),
        };
        for (index, item) in items.iter().enumerate() {
            let changed = snapshot
                .find_row(self.target_table, *item)
                .is_some_and(|position| info.row_did_change(snapshot, self.target_table, position));
            if changed {
                changes.modify(index);
            }
        }
        changes.parse_complete();
        self.previous = Some(items);
        Ok(changes)
    }

    fn skip(&mut self, snapshot: &dyn Snapshot) -> Result<(), NotifyError> {
        self.handle = None;
        match self.read(snapshot)? {
            Some(items) => self.previous = Some(items),
            None => {
                self.owner_deleted = true;
                self.previous = Some(Vec::new());
            }
        }
        Ok(())
    }

    fn release_data(&mut self) {
        self.previous = None;
        self.handle = None;
    }

    fn add_required_change_info(&mut self, info: &mut TransactionChangeInfo) -> bool {
        if self.owner_deleted {
            return false;
        }
        self.handle = Some(info.register_list(self.table, self.row, self.column));
        info.require_modifications(self.target_table);
        true
    }

    fn prepare_handover(&mut self, _snapshot: &dyn Snapshot) -> Option<Vec<RowKey>> {
        self.previous.clone()
    }
}
