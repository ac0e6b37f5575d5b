//! Write transactions and the instruction log they produce.

use std::sync::Arc;

use crate::error::NotifyError;
use crate::snapshot::{ColumnKey, RowKey, TableKey};

use super::snapshot::{Cell, ColumnKind, MemorySnapshot, Row, TableData};

/// One logged change. Row positions are as of the moment the instruction was
/// applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Row appended
    Insert {
        table: TableKey,
        /// Position of the new row (the old row count)
        row: usize,
    },
    /// Row contents changed
    Modify { table: TableKey, row: usize },
    /// Row removed, last row moved into its place
    MoveOver {
        table: TableKey,
        /// Position of the removed row
        row: usize,
        /// Position of the last row before the removal
        last: usize,
    },
    /// Every row removed
    Clear {
        table: TableKey,
        /// Row count before the clear
        old_size: usize,
    },
    ListInsert {
        table: TableKey,
        row: RowKey,
        column: ColumnKey,
        index: usize,
    },
    ListErase {
        table: TableKey,
        row: RowKey,
        column: ColumnKey,
        index: usize,
    },
    ListMove {
        table: TableKey,
        row: RowKey,
        column: ColumnKey,
        from: usize,
        to: usize,
    },
    ListSet {
        table: TableKey,
        row: RowKey,
        column: ColumnKey,
        index: usize,
    },
    ListClear {
        table: TableKey,
        row: RowKey,
        column: ColumnKey,
        /// List length before the clear
        old_size: usize,
    },
}

/// Staged changes on a private copy of the head snapshot.
///
/// Tables are copied on first write. Nothing is visible to readers until the
/// engine publishes the transaction.
pub struct Transaction {
    pub(super) data: MemorySnapshot,
    pub(super) next_key: u64,
    pub(super) log: Vec<Instruction>,
}

impl Transaction {
    pub(super) fn new(data: MemorySnapshot, next_key: u64) -> Self {
        Self {
            data,
            next_key,
            log: Vec::new(),
        }
    }

    fn table_mut(&mut self, table: TableKey) -> Result<&mut TableData, NotifyError> {
        self.data
            .tables
            .get_mut(table.index())
            .map(Arc::make_mut)
            .ok_or(NotifyError::TableNotFound { table })
    }

    /// Read access to the staged state.
    pub fn snapshot(&self) -> &MemorySnapshot {
        &self.data
    }

    /// Adds a table. Link and list columns must target existing tables (or
    /// the new table itself).
    pub fn create_table(&mut self, name: &str, columns: Vec<ColumnKind>) -> Result<TableKey, NotifyError> {
        let key = TableKey(self.data.tables.len() as u32);
        for kind in &columns {
            if let Some(target) = kind.target() {
                if target != key {
                    self.data.table(target)?;
                }
            }
        }
        self.data
            .tables
            .push(Arc::new(TableData::new(name.to_string(), columns)));
        Ok(key)
    }

    /// Appends a row and returns its key.
    pub fn create_row(&mut self, table: TableKey, cells: Vec<Cell>) -> Result<RowKey, NotifyError> {
        self.data.table(table)?.check_cells(table, &cells)?;
        for (i, cell) in cells.iter().enumerate() {
            self.check_targets(table, ColumnKey(i as u32), cell)?;
        }
        let key = RowKey(self.next_key);
        self.next_key += 1;
        let data = self.table_mut(table)?;
        let row = data.rows.len();
        data.rows.push(Row { key, cells });
        data.index.insert(key, row);
        self.log.push(Instruction::Insert { table, row });
        Ok(key)
    }

    /// Replaces a value cell.
    pub fn set_value(
        &mut self,
        table: TableKey,
        key: RowKey,
        column: ColumnKey,
        value: serde_json::Value,
    ) -> Result<(), NotifyError> {
        self.set_cell(table, key, column, Cell::Value(value))
    }

    /// Points a link cell at `target`, or clears it.
    pub fn set_link(
        &mut self,
        table: TableKey,
        key: RowKey,
        column: ColumnKey,
        target: Option<RowKey>,
    ) -> Result<(), NotifyError> {
        self.data.table(table)?.link_column(table, column)?;
        self.set_cell(table, key, column, Cell::Link(target))
    }

    fn set_cell(&mut self, table: TableKey, key: RowKey, column: ColumnKey, cell: Cell) -> Result<(), NotifyError> {
        let kind = self.data.table(table)?.column(table, column)?;
        if std::mem::discriminant(&cell) != std::mem::discriminant(&Cell::empty(kind)) {
            return Err(NotifyError::ColumnKindMismatch {
                table,
                column,
                expected: kind.name(),
            });
        }
        self.check_targets(table, column, &cell)?;
        let data = self.table_mut(table)?;
        let row = data.position(table, key)?;
        data.rows[row].cells[column.0 as usize] = cell;
        self.log.push(Instruction::Modify { table, row });
        Ok(())
    }

    /// Removes a row. The last row takes its position; links to the removed
    /// row are cleared and list entries pointing at it are removed.
    pub fn erase_row(&mut self, table: TableKey, key: RowKey) -> Result<(), NotifyError> {
        let data = self.table_mut(table)?;
        let row = data.position(table, key)?;
        let last = data.rows.len() - 1;
        data.swap_remove(row);
        self.log.push(Instruction::MoveOver { table, row, last });
        self.drop_references(table, &[key])
    }

    /// Removes every row of `table`.
    pub fn clear_table(&mut self, table: TableKey) -> Result<(), NotifyError> {
        let data = self.table_mut(table)?;
        let old_size = data.rows.len();
        let keys: Vec<RowKey> = data.rows.drain(..).map(|row| row.key).collect();
        data.index.clear();
        self.log.push(Instruction::Clear { table, old_size });
        self.drop_references(table, &keys)
    }

    pub fn list_insert(
        &mut self,
        table: TableKey,
        key: RowKey,
        column: ColumnKey,
        index: usize,
        target: RowKey,
    ) -> Result<(), NotifyError> {
        let target_table = self.data.table(table)?.list_column(table, column)?;
        self.data.table(target_table)?.position(target_table, target)?;
        let (items, row) = self.list_mut(table, key, column)?;
        if index > items.len() {
            return Err(NotifyError::ListIndexOutOfBounds {
                index,
                len: items.len(),
            });
        }
        items.insert(index, target);
        self.log_list(table, row, Instruction::ListInsert { table, row: key, column, index });
        Ok(())
    }

    pub fn list_erase(&mut self, table: TableKey, key: RowKey, column: ColumnKey, index: usize) -> Result<(), NotifyError> {
        let (items, row) = self.list_mut(table, key, column)?;
        if index >= items.len() {
            return Err(NotifyError::ListIndexOutOfBounds {
                index,
                len: items.len(),
            });
        }
        items.remove(index);
        self.log_list(table, row, Instruction::ListErase { table, row: key, column, index });
        Ok(())
    }

    pub fn list_move(
        &mut self,
        table: TableKey,
        key: RowKey,
        column: ColumnKey,
        from: usize,
        to: usize,
    ) -> Result<(), NotifyError> {
        let (items, row) = self.list_mut(table, key, column)?;
        let len = items.len();
        if from >= len || to >= len {
            return Err(NotifyError::ListIndexOutOfBounds {
                index: from.max(to),
                len,
            });
        }
        if from == to {
            return Ok(());
        }
        let item = items.remove(from);
        items.insert(to, item);
        self.log_list(table, row, Instruction::ListMove { table, row: key, column, from, to });
        Ok(())
    }

    pub fn list_set(
        &mut self,
        table: TableKey,
        key: RowKey,
        column: ColumnKey,
        index: usize,
        target: RowKey,
    ) -> Result<(), NotifyError> {
        let target_table = self.data.table(table)?.list_column(table, column)?;
        self.data.table(target_table)?.position(target_table, target)?;
        let (items, row) = self.list_mut(table, key, column)?;
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or(NotifyError::ListIndexOutOfBounds { index, len })?;
        *slot = target;
        self.log_list(table, row, Instruction::ListSet { table, row: key, column, index });
        Ok(())
    }

    pub fn list_clear(&mut self, table: TableKey, key: RowKey, column: ColumnKey) -> Result<(), NotifyError> {
        let (items, row) = self.list_mut(table, key, column)?;
        let old_size = items.len();
        items.clear();
        self.log_list(table, row, Instruction::ListClear { table, row: key, column, old_size });
        Ok(())
    }

    /// The list cell of row `key` and the row's position.
    fn list_mut(
        &mut self,
        table: TableKey,
        key: RowKey,
        column: ColumnKey,
    ) -> Result<(&mut Vec<RowKey>, usize), NotifyError> {
        let data = self.table_mut(table)?;
        data.list_column(table, column)?;
        let row = data.position(table, key)?;
        match &mut data.rows[row].cells[column.0 as usize] {
            Cell::List(items) => Ok((items, row)),
            _ => Err(NotifyError::ColumnKindMismatch {
                table,
                column,
                expected: "list",
            }),
        }
    }

    /// Logs a list change together with the modification of the owning row.
    fn log_list(&mut self, table: TableKey, row: usize, instruction: Instruction) {
        self.log.push(instruction);
        self.log.push(Instruction::Modify { table, row });
    }

    fn check_targets(&self, table: TableKey, column: ColumnKey, cell: &Cell) -> Result<(), NotifyError> {
        let Some(target_table) = self.data.table(table)?.column(table, column)?.target() else {
            return Ok(());
        };
        let target = self.data.table(target_table)?;
        let keys: Vec<RowKey> = match cell {
            Cell::Value(_) => Vec::new(),
            Cell::Link(link) => link.iter().copied().collect(),
            Cell::List(items) => items.clone(),
        };
        for key in keys {
            target.position(target_table, key)?;
        }
        Ok(())
    }

    /// Clears links to and removes list entries for `removed` rows of
    /// `table`, in every table.
    fn drop_references(&mut self, table: TableKey, removed: &[RowKey]) -> Result<(), NotifyError> {
        for origin_index in 0..self.data.tables.len() {
            let origin = TableKey(origin_index as u32);
            let columns: Vec<(usize, ColumnKind)> = self
                .data
                .table(origin)?
                .columns
                .iter()
                .copied()
                .enumerate()
                .filter(|(_, kind)| kind.target() == Some(table))
                .collect();
            if columns.is_empty() {
                continue;
            }

            let mut changes = Vec::new();
            let data = self.table_mut(origin)?;
            for (row, origin_row) in data.rows.iter_mut().enumerate() {
                for &(column, kind) in &columns {
                    match (kind, &mut origin_row.cells[column]) {
                        (ColumnKind::Link(_), Cell::Link(link)) => {
                            if link.is_some_and(|target| removed.contains(&target)) {
                                *link = None;
                                changes.push(Instruction::Modify { table: origin, row });
                            }
                        }
                        (ColumnKind::List(_), Cell::List(items)) => {
                            // Back to front so logged indexes stay valid.
                            for index in (0..items.len()).rev() {
                                if removed.contains(&items[index]) {
                                    items.remove(index);
                                    changes.push(Instruction::ListErase {
                                        table: origin,
                                        row: origin_row.key,
                                        column: ColumnKey(column as u32),
                                        index,
                                    });
                                    changes.push(Instruction::Modify { table: origin, row });
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            self.log.extend(changes);
        }
        Ok(())
    }
}
