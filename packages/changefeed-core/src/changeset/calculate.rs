//! Building changesets from a full old→new position mapping.
//!
//! Every survivor keeps its place except those that have to move to make the
//! order work: the kept rows form a longest increasing run of new positions,
//! everything else is reported as a move. Incremental builders are
//! canonicalized through the same path, so two builders describing the same
//! transition compare equal no matter how they were produced.

use std::collections::HashMap;
use std::hash::Hash;

use super::{ChangeSetBuilder, Move};

/// Marks the members of a longest strictly increasing subsequence of
/// `targets`. Among equally long candidates the one keeping the earliest
/// entries wins.
fn longest_increasing_run(targets: &[usize]) -> Vec<bool> {
    // Scanned back to front: tails[k] starts the best known run of length
    // k + 1, best meaning largest first value.
    let mut tails: Vec<usize> = Vec::new();
    let mut next: Vec<Option<usize>> = vec![None; targets.len()];
    for i in (0..targets.len()).rev() {
        let value = targets[i];
        let pos = tails.partition_point(|&t| targets[t] > value);
        if pos > 0 {
            next[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut keep = vec![false; targets.len()];
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        keep[i] = true;
        cursor = next[i];
    }
    keep
}

impl ChangeSetBuilder {
    /// Diffs two row lists by identity.
    ///
    /// Rows only in `old_rows` are deletions, rows only in `new_rows` are
    /// insertions. A survivor whose relative order had to change is a move,
    /// and the number of moves is minimal. `row_did_change` is asked about
    /// every survivor and every moved row. Repeated identities are matched in
    /// order of appearance.
    ///
    /// `sort` tells whether the collection has an explicit order. Without it
    /// the rows are expected to mostly keep storage order and a linear scan
    /// replaces the subsequence search whenever that holds. The result is the
    /// same either way.
    pub fn calculate<K, F>(old_rows: &[K], new_rows: &[K], mut row_did_change: F, sort: bool) -> Self
    where
        K: Eq + Hash,
        F: FnMut(&K) -> bool,
    {
        // Stored back to front so pop() hands out positions in ascending order.
        let mut positions: HashMap<&K, Vec<usize>> = HashMap::with_capacity(new_rows.len());
        for (index, row) in new_rows.iter().enumerate().rev() {
            positions.entry(row).or_default().push(index);
        }
        let mapping: Vec<Option<usize>> = old_rows
            .iter()
            .map(|row| positions.get_mut(row).and_then(Vec::pop))
            .collect();

        Self::from_mapping(&mapping, new_rows.len(), |_, new| row_did_change(&new_rows[new]), sort)
    }

    /// Builds the canonical changeset for a transition given as
    /// `mapping[old] = Some(new)` for survivors and `None` for deleted rows.
    /// New positions never hit by the mapping are insertions.
    ///
    /// `changed(old, new)` decides whether a surviving row counts as
    /// modified.
    pub(crate) fn from_mapping<F>(
        mapping: &[Option<usize>],
        new_len: usize,
        mut changed: F,
        sort: bool,
    ) -> Self
    where
        F: FnMut(usize, usize) -> bool,
    {
        let mut builder = Self::default();
        let mut claimed = vec![false; new_len];
        let mut survivors: Vec<(usize, usize)> = Vec::with_capacity(mapping.len());
        for (old, target) in mapping.iter().enumerate() {
            match *target {
                Some(new) => {
                    claimed[new] = true;
                    survivors.push((old, new));
                }
                None => builder.deletions.add(old),
            }
        }
        for (new, _) in claimed.iter().enumerate().filter(|(_, claimed)| !**claimed) {
            builder.insertions.add(new);
        }

        let in_order = !sort && survivors.windows(2).all(|w| w[0].1 < w[1].1);
        let keep = if in_order {
            vec![true; survivors.len()]
        } else {
            let targets: Vec<usize> = survivors.iter().map(|&(_, new)| new).collect();
            longest_increasing_run(&targets)
        };

        for (&(old, new), kept) in survivors.iter().zip(keep) {
            if !kept {
                builder.deletions.add(old);
                builder.insertions.add(new);
                builder.moves.push(Move { from: old, to: new });
            }
            if changed(old, new) {
                builder.modifications.add(new);
            }
        }
        builder
    }

    /// Expands the builder into `mapping[old] = Some(new)` form for an old
    /// sequence of `old_len` rows. Moves must be folded.
    pub(crate) fn position_map(&self, old_len: usize) -> Vec<Option<usize>> {
        let mut map = vec![None; old_len];
        for m in &self.moves {
            map[m.from] = Some(m.to);
        }
        let kept = (0..old_len).filter(|old| !self.deletions.contains(*old));
        let free = (0..).filter(|new| !self.insertions.contains(*new));
        for (old, new) in kept.zip(free) {
            map[old] = Some(new);
        }
        map
    }

    /// Length of the sequence after the changes, given its length before.
    pub(crate) fn new_len(&self, old_len: usize) -> usize {
        old_len - self.deletions.len() + self.insertions.len()
    }

    /// Smallest old length that covers every recorded position.
    pub(crate) fn min_old_len(&self) -> usize {
        let deleted = self.deletions.len() as isize;
        let inserted = self.insertions.len() as isize;
        let new_end = self.insertions.end().max(self.modifications.end()) as isize;
        let len = (self.deletions.end() as isize).max(new_end - inserted + deleted);
        len.max(0) as usize
    }
}
