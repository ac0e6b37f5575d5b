//! Ordered set of row positions stored as disjoint ranges.
//!
//! Besides plain set operations the set knows how to keep its contents valid
//! while the underlying sequence grows and shrinks: inserting `n` positions at
//! `i` shifts every member `>= i` up by `n`, erasing position `i` shifts every
//! member `> i` down by one.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Sorted, non-overlapping, non-adjacent ranges of positions.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSet {
    ranges: Vec<Range<usize>>,
}

impl fmt::Debug for IndexSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, range) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            if range.len() == 1 {
                write!(f, "{}", range.start)?;
            } else {
                write!(f, "{}..{}", range.start, range.end)?;
            }
        }
        write!(f, "}}")
    }
}

/// Appends `range` to a sorted range list, merging with the last entry when
/// they touch.
fn push_merged(ranges: &mut Vec<Range<usize>>, range: Range<usize>) {
    if range.is_empty() {
        return;
    }
    if let Some(last) = ranges.last_mut() {
        if last.end >= range.start {
            last.end = last.end.max(range.end);
            return;
        }
    }
    ranges.push(range);
}

impl IndexSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the set holds no positions.
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of positions in the set.
    pub fn len(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }

    /// One past the largest member, or 0 for an empty set.
    pub fn end(&self) -> usize {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// The underlying ranges in ascending order.
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Iterates over every member in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.ranges.iter().flat_map(|r| r.clone())
    }

    pub fn contains(&self, index: usize) -> bool {
        let i = self.ranges.partition_point(|r| r.end <= index);
        self.ranges.get(i).is_some_and(|r| r.start <= index)
    }

    /// Number of members falling inside `range`.
    pub fn count(&self, range: Range<usize>) -> usize {
        let mut total = 0;
        for r in &self.ranges {
            if r.start >= range.end {
                break;
            }
            if r.end <= range.start {
                continue;
            }
            total += r.end.min(range.end) - r.start.max(range.start);
        }
        total
    }

    pub fn add(&mut self, index: usize) {
        self.add_range(index..index + 1);
    }

    /// Adds every position in `range`.
    pub fn add_range(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let first = self.ranges.partition_point(|r| r.end < range.start);
        let last = self.ranges.partition_point(|r| r.start <= range.end);
        if first == last {
            self.ranges.insert(first, range);
            return;
        }
        let start = range.start.min(self.ranges[first].start);
        let end = range.end.max(self.ranges[last - 1].end);
        self.ranges.drain(first + 1..last);
        self.ranges[first] = start..end;
    }

    /// Adds every member of `other`.
    pub fn add_set(&mut self, other: &IndexSet) {
        for range in &other.ranges {
            self.add_range(range.clone());
        }
    }

    pub fn remove(&mut self, index: usize) {
        let i = self.ranges.partition_point(|r| r.end <= index);
        let Some(range) = self.ranges.get(i).cloned() else {
            return;
        };
        if range.start > index {
            return;
        }
        if range.len() == 1 {
            self.ranges.remove(i);
        } else if range.start == index {
            self.ranges[i].start += 1;
        } else if range.end == index + 1 {
            self.ranges[i].end -= 1;
        } else {
            self.ranges[i].end = index;
            self.ranges.insert(i + 1, index + 1..range.end);
        }
    }

    /// Removes every member of `other`, without shifting.
    pub fn remove_all(&mut self, other: &IndexSet) {
        for index in other.iter() {
            self.remove(index);
        }
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    /// Replaces the contents with `0..len`.
    pub fn set(&mut self, len: usize) {
        self.ranges.clear();
        if len > 0 {
            self.ranges.push(0..len);
        }
    }

    /// Shifts members `>= index` up by `count` without adding anything.
    pub fn shift_for_insert_at(&mut self, index: usize, count: usize) {
        if count == 0 {
            return;
        }
        let mut shifted = Vec::with_capacity(self.ranges.len() + 1);
        for r in self.ranges.drain(..) {
            if r.end <= index {
                shifted.push(r);
            } else if r.start >= index {
                shifted.push(r.start + count..r.end + count);
            } else {
                shifted.push(r.start..index);
                shifted.push(index + count..r.end + count);
            }
        }
        self.ranges = shifted;
    }

    /// Shifts members `>= index` up by `count` and adds `index..index + count`.
    pub fn insert_at(&mut self, index: usize, count: usize) {
        self.shift_for_insert_at(index, count);
        self.add_range(index..index + count);
    }

    /// Removes `index` if present and shifts members `> index` down by one.
    pub fn erase_at(&mut self, index: usize) {
        let mut shifted = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            let r = if r.end <= index {
                r
            } else if r.start > index {
                r.start - 1..r.end - 1
            } else {
                r.start..r.end - 1
            };
            push_merged(&mut shifted, r);
        }
        self.ranges = shifted;
    }

    /// Erases `index` from the sequence.
    ///
    /// Returns `None` if `index` was a member. Otherwise returns the position
    /// `index` had among the non-members, i.e. `index` with members below it
    /// discounted.
    pub fn erase_or_unshift(&mut self, index: usize) -> Option<usize> {
        if self.contains(index) {
            self.erase_at(index);
            return None;
        }
        let unshifted = self.unshift(index);
        self.erase_at(index);
        Some(unshifted)
    }

    /// Position of non-member `index` among all non-members.
    pub fn unshift(&self, index: usize) -> usize {
        index - self.count(0..index)
    }

    /// Inverse of [`unshift`](Self::unshift): the `index`-th non-member.
    pub fn shift(&self, index: usize) -> usize {
        let mut shifted = index;
        for r in &self.ranges {
            if r.start > shifted {
                break;
            }
            shifted += r.len();
        }
        shifted
    }

    /// Adds the `index`-th non-member and returns it.
    pub fn add_shifted(&mut self, index: usize) -> usize {
        let shifted = self.shift(index);
        self.add(shifted);
        shifted
    }
}

impl From<Range<usize>> for IndexSet {
    fn from(range: Range<usize>) -> Self {
        let mut set = IndexSet::new();
        set.add_range(range);
        set
    }
}

impl FromIterator<usize> for IndexSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = IndexSet::new();
        for index in iter {
            set.add(index);
        }
        set
    }
}
