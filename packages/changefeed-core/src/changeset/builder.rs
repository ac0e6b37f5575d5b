use std::collections::{HashMap, HashSet};

use super::{Changeset, IndexSet, Move};

/// Mutable accumulator for a [`Changeset`].
///
/// `deletions` are positions in the sequence as it was before the first
/// recorded change. `insertions` and `modifications` are positions in the
/// sequence as it is now, after every change recorded so far.
///
/// While a transaction log is replayed moves live in `move_mapping`, keyed by
/// the row's current position, so that later operations can re-target them.
/// [`parse_complete`](Self::parse_complete) folds them back into `moves` and
/// brings the builder into canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSetBuilder {
    pub(super) deletions: IndexSet,
    pub(super) insertions: IndexSet,
    pub(super) modifications: IndexSet,
    pub(super) moves: Vec<Move>,
    move_mapping: HashMap<usize, usize>,
}

impl ChangeSetBuilder {
    /// Creates a builder from already computed parts.
    ///
    /// `modifications` are positions in the new sequence.
    pub fn new(
        deletions: IndexSet,
        insertions: IndexSet,
        modifications: IndexSet,
        mut moves: Vec<Move>,
    ) -> Self {
        moves.sort_unstable_by_key(|m| m.from);
        Self {
            deletions,
            insertions,
            modifications,
            moves,
            move_mapping: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty()
            && self.insertions.is_empty()
            && self.modifications.is_empty()
            && self.moves.is_empty()
            && self.move_mapping.is_empty()
    }

    pub fn deletions(&self) -> &IndexSet {
        &self.deletions
    }

    pub fn insertions(&self) -> &IndexSet {
        &self.insertions
    }

    /// Modified rows by current position.
    pub fn modifications(&self) -> &IndexSet {
        &self.modifications
    }

    /// Folded moves. Moves recorded since the last
    /// [`parse_complete`](Self::parse_complete) are not included.
    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// Returns `true` if the row currently at `index` was modified.
    pub fn is_modified(&self, index: usize) -> bool {
        self.modifications.contains(index)
    }

    /// Records `count` rows inserted at `index`.
    ///
    /// With `track_moves` off only modifications are shifted; the builder then
    /// answers "was the row at position p modified" and nothing else.
    pub fn insert(&mut self, index: usize, count: usize, track_moves: bool) {
        self.modifications.shift_for_insert_at(index, count);
        if !track_moves {
            return;
        }
        self.unfold_moves();
        self.insertions.insert_at(index, count);
        self.shift_mapping(|to| if to >= index { to + count } else { to });
    }

    /// Records a change to the contents of the row at `index`.
    pub fn modify(&mut self, index: usize) {
        self.modifications.add(index);
    }

    /// Records the removal of the row at `index`. Later rows shift down.
    pub fn erase(&mut self, index: usize) {
        self.unfold_moves();
        self.modifications.erase_at(index);
        if let Some(unshifted) = self.insertions.erase_or_unshift(index) {
            self.deletions.add_shifted(unshifted);
        }
        self.move_mapping.remove(&index);
        self.shift_mapping(|to| if to > index { to - 1 } else { to });
    }

    /// Records the removal of the row at `index` followed by the row at
    /// `last_index` (the last row) moving into the gap.
    pub fn move_over(&mut self, index: usize, last_index: usize, track_moves: bool) {
        debug_assert!(index <= last_index);
        if !track_moves {
            if index == last_index {
                self.modifications.remove(index);
            } else if self.modifications.contains(last_index) {
                self.modifications.remove(last_index);
                self.modifications.add(index);
            } else {
                self.modifications.remove(index);
            }
            return;
        }

        self.erase(index);
        if index < last_index {
            self.move_row(last_index - 1, index);
        }
    }

    /// Records the row at `from` moving to `to`, both current positions.
    pub fn move_row(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        self.unfold_moves();
        let reposition = move |pos: usize| {
            let pos = if pos > from { pos - 1 } else { pos };
            if pos >= to {
                pos + 1
            } else {
                pos
            }
        };

        match self.move_mapping.remove(&from) {
            // Moving an already moved row again only re-targets it.
            Some(source) => {
                self.shift_mapping(reposition);
                self.insertions.erase_at(from);
                self.insertions.insert_at(to, 1);
                self.move_mapping.insert(to, source);
            }
            None => {
                let unshifted = self.insertions.erase_or_unshift(from);
                self.insertions.insert_at(to, 1);
                self.shift_mapping(reposition);
                if let Some(unshifted) = unshifted {
                    let source = self.deletions.add_shifted(unshifted);
                    self.move_mapping.insert(to, source);
                }
            }
        }

        let modified = self.modifications.contains(from);
        self.modifications.erase_at(from);
        if modified {
            self.modifications.insert_at(to, 1);
        } else {
            self.modifications.shift_for_insert_at(to, 1);
        }
    }

    /// Records every row being removed. `old_size` is the row count right
    /// before the clear.
    pub fn clear(&mut self, old_size: usize) {
        let original = (old_size + self.deletions.len()).saturating_sub(self.insertions.len());
        self.modifications.clear();
        self.insertions.clear();
        self.moves.clear();
        self.move_mapping.clear();
        self.deletions.set(original);
    }

    /// Composes `other`, which must describe changes starting from the state
    /// this builder ends in, onto this builder.
    ///
    /// The result equals diffing the first state against the last directly,
    /// with a row counting as modified if either step modified it.
    pub fn merge(&mut self, mut other: ChangeSetBuilder) {
        self.fold_moves();
        other.fold_moves();
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other;
            return;
        }

        let old_len = self.merge_len(&other);
        let mid_len = self.new_len(old_len);
        let new_len = other.new_len(mid_len);
        let first = self.position_map(old_len);
        let second = other.position_map(mid_len);
        let composed: Vec<Option<usize>> = first
            .iter()
            .map(|mid| mid.and_then(|mid| second[mid]))
            .collect();

        let merged = Self::from_mapping(
            &composed,
            new_len,
            |old, new| {
                first[old].is_some_and(|mid| self.modifications.contains(mid))
                    || other.modifications.contains(new)
            },
            true,
        );
        *self = merged;
        self.clean_up_stale_moves();
        self.verify();
    }

    /// Smallest starting length for which both builders' positions are in
    /// range.
    fn merge_len(&self, next: &ChangeSetBuilder) -> usize {
        let first_delta = self.deletions.len() as isize - self.insertions.len() as isize;
        let second_delta = next.deletions.len() as isize - next.insertions.len() as isize;
        let old_need = self.deletions.end() as isize;
        let mid_need = self
            .insertions
            .end()
            .max(self.modifications.end())
            .max(next.deletions.end()) as isize;
        let new_need = next.insertions.end().max(next.modifications.end()) as isize;
        let len = old_need
            .max(mid_need + first_delta)
            .max(new_need + second_delta + first_delta);
        len.max(0) as usize
    }

    /// Drops moves whose row ends up where it would have been anyway once
    /// the surrounding insertions and deletions are accounted for. The row
    /// stays a plain survivor and keeps any modification.
    pub fn clean_up_stale_moves(&mut self) {
        self.fold_moves();
        let deletions = &mut self.deletions;
        let insertions = &mut self.insertions;
        // Dropping one move can make an earlier one stale, so repeat until
        // nothing changes.
        loop {
            let before = self.moves.len();
            self.moves.retain(|m| {
                let stale =
                    m.from - deletions.count(0..m.from) == m.to - insertions.count(0..m.to);
                if stale {
                    deletions.remove(m.from);
                    insertions.remove(m.to);
                }
                !stale
            });
            if self.moves.len() == before {
                break;
            }
        }
    }

    /// Finalizes a builder filled by replaying a log.
    ///
    /// Folds pending moves and rewrites the builder into the same canonical
    /// form [`calculate`](Self::calculate) produces for the same transition.
    pub fn parse_complete(&mut self) {
        self.fold_moves();
        self.clean_up_stale_moves();
        if self.moves.is_empty() {
            // Only surviving rows can be modified.
            self.modifications.remove_all(&self.insertions);
            return;
        }

        let old_len = self.min_old_len();
        let new_len = self.new_len(old_len);
        let mapping = self.position_map(old_len);
        let modifications = std::mem::take(&mut self.modifications);
        *self = Self::from_mapping(&mapping, new_len, |_, new| modifications.contains(new), true);
        self.verify();
    }

    /// Checks internal consistency: every move has its deletion and
    /// insertion, no row moves twice, no position is both deleted and
    /// modified.
    pub fn is_consistent(&self) -> bool {
        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        let pending = self.move_mapping.iter().map(|(&to, &from)| Move { from, to });
        for m in self.moves.iter().copied().chain(pending) {
            if !self.deletions.contains(m.from) || !self.insertions.contains(m.to) {
                return false;
            }
            if !sources.insert(m.from) || !targets.insert(m.to) {
                return false;
            }
        }
        self.old_modifications().iter().all(|old| !self.deletions.contains(old))
    }

    /// Debug-build consistency check.
    pub fn verify(&self) {
        debug_assert!(self.is_consistent(), "inconsistent changeset: {self:?}");
    }

    /// Freezes the builder into a [`Changeset`].
    pub fn finish(mut self) -> Changeset {
        self.fold_moves();
        let targets: IndexSet = self.moves.iter().map(|m| m.to).collect();
        let modifications = self.old_modifications();
        let modifications_new = self
            .modifications
            .iter()
            .filter(|&new| !self.insertions.contains(new) || targets.contains(new))
            .collect();
        Changeset {
            deletions: self.deletions,
            insertions: self.insertions,
            modifications,
            modifications_new,
            moves: self.moves,
        }
    }

    /// Modified survivors translated back to old positions.
    fn old_modifications(&self) -> IndexSet {
        self.modifications
            .iter()
            .filter(|&new| !self.insertions.contains(new))
            .map(|new| self.deletions.shift(self.insertions.unshift(new)))
            .collect()
    }

    fn fold_moves(&mut self) {
        if self.move_mapping.is_empty() {
            return;
        }
        self.moves
            .extend(self.move_mapping.drain().map(|(to, from)| Move { from, to }));
        self.moves.sort_unstable_by_key(|m| m.from);
    }

    fn unfold_moves(&mut self) {
        for m in self.moves.drain(..) {
            self.move_mapping.insert(m.to, m.from);
        }
    }

    fn shift_mapping(&mut self, reposition: impl Fn(usize) -> usize) {
        if self.move_mapping.is_empty() {
            return;
        }
        let shifted: HashMap<usize, usize> = self
            .move_mapping
            .drain()
            .map(|(to, from)| (reposition(to), from))
            .collect();
        self.move_mapping = shifted;
    }
}

impl From<ChangeSetBuilder> for Changeset {
    fn from(builder: ChangeSetBuilder) -> Self {
        builder.finish()
    }
}
