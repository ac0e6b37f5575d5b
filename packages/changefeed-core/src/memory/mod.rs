//! In-memory reference engine.
//!
//! Versions are immutable [`MemorySnapshot`]s published through an
//! [`ArcSwap`]; readers never block writers. Every commit also appends the
//! instructions it executed to a log, which [`MemoryEngine::scan`] replays
//! into a [`TransactionChangeInfo`] for the notifiers.

mod snapshot;
mod transaction;

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::change_info::TransactionChangeInfo;
use crate::error::NotifyError;
use crate::snapshot::{TableKey, VersionId};

pub use snapshot::{Cell, ColumnKind, MemorySnapshot};
pub use transaction::{Instruction, Transaction};

/// Instructions that turned version `version - 1` into `version`.
#[derive(Debug)]
struct Commit {
    version: VersionId,
    instructions: Vec<Instruction>,
}

/// Serialized writers plus the next row key to hand out.
#[derive(Debug)]
struct WriterState {
    next_key: u64,
}

/// Copy-on-write tables with a replayable commit log.
pub struct MemoryEngine {
    head: ArcSwap<MemorySnapshot>,
    writer: Mutex<WriterState>,
    log: Mutex<Vec<Commit>>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Creates an empty engine at version 0.
    pub fn new() -> Self {
        Self {
            head: ArcSwap::new(Arc::new(MemorySnapshot::default())),
            writer: Mutex::new(WriterState { next_key: 1 }),
            log: Mutex::new(Vec::new()),
        }
    }

    /// The latest published version.
    pub fn snapshot(&self) -> Arc<MemorySnapshot> {
        self.head.load_full()
    }

    pub fn version(&self) -> VersionId {
        self.head.load().version
    }

    /// Adds a table in its own commit.
    ///
    /// # Errors
    /// [`NotifyError::TableNotFound`] if a link or list column targets a
    /// table that does not exist.
    pub fn create_table(&self, name: &str, columns: Vec<ColumnKind>) -> Result<TableKey, NotifyError> {
        let (table, _) = self.write(|tx| tx.create_table(name, columns))?;
        Ok(table)
    }

    /// Runs `f` in a write transaction and publishes the result as a new
    /// version.
    ///
    /// Writers are serialized. If `f` fails nothing is published and the
    /// version stays where it was.
    ///
    /// # Arguments
    /// * `f` - Closure staging changes on the transaction
    ///
    /// # Returns
    /// The closure's result and the version it was published as.
    pub fn write<F, R>(&self, f: F) -> Result<(R, VersionId), NotifyError>
    where
        F: FnOnce(&mut Transaction) -> Result<R, NotifyError>,
    {
        let mut writer = self.writer.lock();
        let base = self.head.load_full();
        let mut tx = Transaction::new(MemorySnapshot::clone(&base), writer.next_key);
        let result = match f(&mut tx) {
            Ok(result) => result,
            Err(e) => {
                tracing::debug!("Write on {} rolled back: {}", base.version, e);
                return Err(e);
            }
        };

        let Transaction {
            mut data,
            next_key,
            log: instructions,
        } = tx;
        let version = base.version.next();
        data.version = version;
        writer.next_key = next_key;
        tracing::trace!("Committing {} ({} instructions)", version, instructions.len());
        self.log.lock().push(Commit {
            version,
            instructions,
        });
        self.head.store(Arc::new(data));
        Ok((result, version))
    }

    /// Replays the commits between `from` and `to` into `info`, feeding only
    /// the tables and lists it tracks, then finalizes it.
    ///
    /// # Errors
    /// [`NotifyError::VersionNotFound`] if `to` has not been committed yet or
    /// lies before `from`.
    pub fn scan(
        &self,
        from: VersionId,
        to: VersionId,
        info: &mut TransactionChangeInfo,
    ) -> Result<(), NotifyError> {
        if to > self.version() {
            return Err(NotifyError::VersionNotFound { version: to });
        }
        if !to.is_reachable_from(from) {
            return Err(NotifyError::VersionNotFound { version: from });
        }

        let log = self.log.lock();
        let commits = &log[from.0 as usize..to.0 as usize];
        tracing::trace!("Scanning {} commits from {} to {}", commits.len(), from, to);
        for commit in commits {
            debug_assert!(commit.version > from && commit.version <= to);
            for instruction in &commit.instructions {
                replay(info, instruction);
            }
        }
        drop(log);

        info.parse_complete();
        Ok(())
    }
}

/// Feeds one logged instruction to the builders that want it.
fn replay(info: &mut TransactionChangeInfo, instruction: &Instruction) {
    match *instruction {
        Instruction::Insert { table, row } => {
            let track_moves = info.tracks_moves(table);
            if let Some(changes) = info.table_changes_mut(table) {
                changes.insert(row, 1, track_moves);
            }
        }
        Instruction::Modify { table, row } => {
            if let Some(changes) = info.table_changes_mut(table) {
                changes.modify(row);
            }
        }
        Instruction::MoveOver { table, row, last } => {
            let track_moves = info.tracks_moves(table);
            if let Some(changes) = info.table_changes_mut(table) {
                changes.move_over(row, last, track_moves);
            }
        }
        Instruction::Clear { table, old_size } => {
            if let Some(changes) = info.table_changes_mut(table) {
                changes.clear(old_size);
            }
        }
        Instruction::ListInsert {
            table,
            row,
            column,
            index,
        } => {
            for changes in info.list_builders_mut(table, row, column) {
                changes.insert(index, 1, true);
            }
        }
        Instruction::ListErase {
            table,
            row,
            column,
            index,
        } => {
            for changes in info.list_builders_mut(table, row, column) {
                changes.erase(index);
            }
        }
        Instruction::ListMove {
            table,
            row,
            column,
            from,
            to,
        } => {
            for changes in info.list_builders_mut(table, row, column) {
                changes.move_row(from, to);
            }
        }
        Instruction::ListSet {
            table,
            row,
            column,
            index,
        } => {
            for changes in info.list_builders_mut(table, row, column) {
                changes.modify(index);
            }
        }
        Instruction::ListClear {
            table,
            row,
            column,
            old_size,
        } => {
            for changes in info.list_builders_mut(table, row, column) {
                changes.clear(old_size);
            }
        }
    }
}
