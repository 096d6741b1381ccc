//! Branch-target buffer (C7): a direct-mapped cache of previously resolved branch/jump targets,
//! consulted at Fetch and updated on resolution in Execute.
//!
//! Grounded in the teacher's allocator-backed array resources (`resources/ram.rs`'s
//! `A::ArrayId`-per-component pattern): entries live in one allocator array rather than behind
//! per-entry ids, since the whole table is always accessed and updated as a unit.

use space_time::allocator::{Allocator, ArrayAccessor, ArrayAccessorMut};
use thiserror::Error;

/// One row of the direct-mapped table. `Default`'s all-zero value is a valid "no entry" sentinel
/// because `valid == false`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
struct Entry {
    valid: bool,
    tag: u32,
    target: u32,
    is_unconditional: bool,
}

/// A prediction surfaced to Fetch: the target to fetch from next, and whether the branch/jump
/// that produced it was unconditional (used by the scheduler to decide whether a mispredict is
/// even possible for this instruction once it resolves).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Prediction {
    pub target: u32,
    pub is_unconditional: bool,
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("BTB entry count must be a nonzero power of two, got {0}")]
pub struct InvalidEntryCount(pub usize);

#[derive(Debug)]
pub struct Btb<A: Allocator> {
    entries: A::ArrayId<Entry>,
    /// `log2(entries.len())`, cached so index/tag extraction doesn't recompute it every lookup.
    index_bits: u32,
}

impl<A: Allocator> Btb<A> {
    /// Builds an empty (all-invalid) table with `entry_count` rows. `entry_count` must be a
    /// nonzero power of two (spec.md §4.3: "`N` a power of two, typically 64"); anything else is
    /// a configuration error, rejected before the first tick (spec.md §7).
    pub fn new(allocator: &mut A, entry_count: usize) -> Result<Self, InvalidEntryCount> {
        if entry_count == 0 || !entry_count.is_power_of_two() {
            return Err(InvalidEntryCount(entry_count));
        }
        Ok(Self {
            entries: allocator.insert_array(Entry::default(), entry_count),
            index_bits: entry_count.trailing_zeros(),
        })
    }

    pub fn reset(&self, allocator: &mut A) {
        let mut entries = allocator.get_array_mut(self.entries).unwrap();
        let len = entries.len();
        entries.write(0, &vec![Entry::default(); len]);
    }

    pub fn drop(self, allocator: &mut A) {
        allocator.remove_array(self.entries).unwrap()
    }

    fn index(&self, pc: u32) -> usize {
        ((pc >> 2) & ((1 << self.index_bits) - 1)) as usize
    }

    fn tag(&self, pc: u32) -> u32 {
        pc >> (2 + self.index_bits)
    }

    /// Looks up `pc`. Returns `None` on a miss (invalid entry or tag mismatch); Fetch falls back
    /// to the static direction rule on a miss (spec.md §4.3).
    pub fn lookup(&self, allocator: &A, pc: u32) -> Option<Prediction> {
        let entries = allocator.get_array(self.entries).unwrap();
        let mut entry = Entry::default();
        entries.read(std::slice::from_mut(&mut entry), self.index(pc));
        (entry.valid && entry.tag == self.tag(pc)).then_some(Prediction {
            target: entry.target,
            is_unconditional: entry.is_unconditional,
        })
    }

    /// Unconditionally overwrites the entry for `pc` (spec.md Open Question #3, resolved: no LRU,
    /// direct-mapped overwrite on every resolution that warrants an update).
    pub fn update(&self, allocator: &mut A, pc: u32, target: u32, is_unconditional: bool) {
        let entry = Entry {
            valid: true,
            tag: self.tag(pc),
            target,
            is_unconditional,
        };
        let mut entries = allocator.get_array_mut(self.entries).unwrap();
        entries.write(self.index(pc), std::slice::from_ref(&entry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use space_time::SpaceTime;

    #[test]
    fn miss_on_empty_table() {
        let mut allocator = SpaceTime::new();
        let btb = Btb::new(&mut allocator, 64).unwrap();
        assert_eq!(btb.lookup(&allocator, 0x1000), None);
    }

    #[test]
    fn hit_after_update_returns_recorded_target() {
        let mut allocator = SpaceTime::new();
        let btb = Btb::new(&mut allocator, 64).unwrap();
        btb.update(&mut allocator, 0x1000, 0x2000, false);
        assert_eq!(
            btb.lookup(&allocator, 0x1000),
            Some(Prediction {
                target: 0x2000,
                is_unconditional: false
            })
        );
    }

    #[test]
    fn aliasing_pcs_evict_each_other_without_lru() {
        let mut allocator = SpaceTime::new();
        let btb = Btb::new(&mut allocator, 64).unwrap();
        // Both PCs map to the same index (bits [7:2] both zero) but differ in tag.
        btb.update(&mut allocator, 0x0000_0000, 0x1111_0000, false);
        btb.update(&mut allocator, 0x0000_0100, 0x2222_0000, true);
        assert_eq!(btb.lookup(&allocator, 0x0000_0000), None);
        assert_eq!(
            btb.lookup(&allocator, 0x0000_0100),
            Some(Prediction {
                target: 0x2222_0000,
                is_unconditional: true
            })
        );
    }

    #[test]
    fn non_power_of_two_entry_count_is_rejected() {
        let mut allocator = SpaceTime::new();
        assert_eq!(Btb::new(&mut allocator, 100), Err(InvalidEntryCount(100)));
    }
}
