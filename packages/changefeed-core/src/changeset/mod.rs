//! Change descriptions for ordered sequences.
//!
//! [`ChangeSetBuilder`] accumulates changes, either incrementally while a
//! transaction log is replayed or in one go by diffing two row lists, and
//! [`Changeset`] is the frozen result handed to callbacks.

mod builder;
mod calculate;
mod index_set;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub use builder::ChangeSetBuilder;
pub use index_set::IndexSet;

/// A row that left position `from` in the old sequence and landed at `to` in
/// the new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

/// Immutable description of how an ordered sequence changed between two
/// versions.
///
/// `deletions` and `modifications` are positions in the old sequence,
/// `insertions` and `modifications_new` are positions in the new one. Every
/// move's `from` is also in `deletions` and its `to` also in `insertions`, so a
/// consumer that ignores moves still sees a correct delete/insert pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub deletions: IndexSet,
    pub insertions: IndexSet,
    /// Surviving rows whose contents changed, by old position
    pub modifications: IndexSet,
    /// Rows whose contents changed, by new position. Includes move targets
    pub modifications_new: IndexSet,
    /// Sorted by `from`
    pub moves: Vec<Move>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.insertions.is_empty()
            && self.modifications.is_empty()
            && self.modifications_new.is_empty()
            && self.moves.is_empty()
    }

    /// Replays the changes against `old`.
    ///
    /// Deleted positions are dropped, then every inserted position is filled
    /// in ascending order: move targets take the moved row from `old`, other
    /// insertions are produced by `inserted(position)`.
    ///
    /// # Panics
    ///
    /// Panics if the changeset refers to positions outside `old`.
    pub fn apply<T, F>(&self, old: &[T], mut inserted: F) -> Vec<T>
    where
        T: Clone,
        F: FnMut(usize) -> T,
    {
        let sources: HashMap<usize, usize> = self.moves.iter().map(|m| (m.to, m.from)).collect();
        let mut rows: Vec<T> = old
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.deletions.contains(*i))
            .map(|(_, row)| row.clone())
            .collect();
        for position in self.insertions.iter() {
            let row = match sources.get(&position) {
                Some(&from) => old[from].clone(),
                None => inserted(position),
            };
            rows.insert(position, row);
        }
        rows
    }
}
