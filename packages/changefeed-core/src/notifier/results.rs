use std::sync::Arc;

use crate::change_info::TransactionChangeInfo;
use crate::changeset::ChangeSetBuilder;
use crate::error::NotifyError;
use crate::snapshot::{RowKey, Snapshot, TableKey};

use super::Notifier;

/// Predicate selecting the rows a [`ResultsNotifier`] reports on.
pub type RowFilter = Arc<dyn Fn(&dyn Snapshot, RowKey) -> bool + Send + Sync>;

/// Order of the observed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultsOrder {
    /// Storage order. Rows keep their place unless removal compacts the table
    #[default]
    Storage,
    /// Ascending by row key
    ByKey,
}

/// Observes the (optionally filtered) rows of one table.
pub struct ResultsNotifier {
    table: TableKey,
    filter: Option<RowFilter>,
    order: ResultsOrder,
    previous: Option<Vec<RowKey>>,
}

impl ResultsNotifier {
    pub fn new(table: TableKey) -> Self {
        Self {
            table,
            filter: None,
            order: ResultsOrder::Storage,
            previous: None,
        }
    }

    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_order(mut self, order: ResultsOrder) -> Self {
        self.order = order;
        self
    }

    fn query(&self, snapshot: &dyn Snapshot) -> Result<Vec<RowKey>, NotifyError> {
        let mut rows = snapshot.rows(self.table)?;
        if let Some(filter) = &self.filter {
            rows.retain(|row| filter(snapshot, *row));
        }
        if self.order == ResultsOrder::ByKey {
            rows.sort_unstable();
        }
        Ok(rows)
    }
}

impl Notifier for ResultsNotifier {
    type Handover = Vec<RowKey>;

    fn root_table(&self) -> TableKey {
        self.table
    }

    fn run(
        &mut self,
        snapshot: &dyn Snapshot,
        info: &TransactionChangeInfo,
    ) -> Result<ChangeSetBuilder, NotifyError> {
        let rows = self.query(snapshot)?;
        let table = self.table;
        // The first run only establishes what later runs compare against.
        let changes = match &self.previous {
            None => ChangeSetBuilder::default(),
            Some(previous) => ChangeSetBuilder::calculate(
                previous,
                &rows,
                |row| {
                    snapshot
                        .find_row(table, *row)
                        .is_some_and(|position| info.row_did_change(snapshot, table, position))
                },
                self.order == ResultsOrder::ByKey,
            ),
        };
        self.previous = Some(rows);
        Ok(changes)
    }

    fn skip(&mut self, snapshot: &dyn Snapshot) -> Result<(), NotifyError> {
        self.previous = Some(self.query(snapshot)?);
        Ok(())
    }

    fn release_data(&mut self) {
        self.previous = None;
    }

    fn add_required_change_info(&mut self, info: &mut TransactionChangeInfo) -> bool {
        info.require_modifications(self.table);
        true
    }

    fn prepare_handover(&mut self, _snapshot: &dyn Snapshot) -> Option<Vec<RowKey>> {
        self.previous.clone()
    }
}
