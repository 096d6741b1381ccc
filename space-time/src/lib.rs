//! A minimal [`Allocator`] backed by one [`generational_arena::Arena`] per stored Rust type.
//!
//! Components are expected to own their state indirectly, through ids minted by a shared
//! [`SpaceTime`], rather than through direct field ownership. This keeps a `Core` (or any other
//! simulatable component tree) free of interior mutability and lock coordination: every mutation
//! is a method call that takes `&mut SpaceTime` explicitly.

pub mod allocator;
pub mod errors;
pub mod ids;

use std::any::TypeId;
use std::cell::Cell;
use std::collections::HashMap;
use std::ops::RangeBounds;

use downcast_rs::{impl_downcast, Downcast};
use generational_arena::Arena;

pub use ids::SpaceTimeId;

use allocator::{Allocator, ArrayAccessor, ArrayAccessorMut};
use errors::InvalidIdError;

trait AnyArena: Downcast {}
impl_downcast!(AnyArena);
impl<T: 'static> AnyArena for Arena<T> {}

/// A homogeneous map from `TypeId` to one [`Arena<T>`] per distinct `T`.
#[derive(Default)]
struct ArenaMap(HashMap<TypeId, Box<dyn AnyArena>>);

impl ArenaMap {
    fn get<T: 'static>(&self) -> Option<&Arena<T>> {
        self.0
            .get(&TypeId::of::<T>())
            .map(|a| a.downcast_ref().expect("arena map type invariant violated"))
    }

    fn get_mut<T: 'static>(&mut self) -> &mut Arena<T> {
        self.0
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::<Arena<T>>::default())
            .downcast_mut()
            .expect("arena map type invariant violated")
    }
}

/// Storage for architectural state, indexed by [`SpaceTimeId`]s.
///
/// Every distinct `T` ever inserted gets its own arena, so unrelated component types never share
/// a free list. Ids returned by [`Allocator::insert`]/[`Allocator::insert_array`] stay valid (and
/// `Copy`) for as long as the backing slot has not been removed, independent of how many times the
/// id itself is copied around.
#[derive(Default)]
pub struct SpaceTime {
    scalars: ArenaMap,
    arrays: ArenaMap,
}

impl SpaceTime {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for SpaceTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceTime").finish_non_exhaustive()
    }
}

struct SliceAccessor<'a, T> {
    slice: &'a [T],
}

impl<'a, T: 'a + Copy> ArrayAccessor<'a, T> for SliceAccessor<'a, T> {
    fn len(&self) -> usize {
        self.slice.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.slice.get(index).copied()
    }

    fn get_ref(&self, index: usize) -> Option<&'a T> {
        self.slice.get(index)
    }

    fn read(&self, buf: &mut [T], index: usize) -> bool {
        let Some(src) = self.slice.get(index..index + buf.len()) else {
            return false;
        };
        buf.copy_from_slice(src);
        true
    }

    fn iter_range<R>(&self, index_range: R) -> Option<impl IntoIterator<Item = &'a T> + 'a>
    where
        R: RangeBounds<usize>,
    {
        slice_index_range(self.slice.len(), index_range).map(|r| self.slice[r].iter())
    }
}

/// Grants `&'a mut T` access to disjoint elements of a single array slot through a shared
/// reference, mirroring the cost/contract documented on [`ArrayAccessorMut`].
///
/// # Safety
/// Every method hands out references derived from [`Cell::as_ptr`]. Callers must not retain two
/// overlapping mutable borrows (or a mutable and an immutable borrow of the same index) at once;
/// the accessor itself only guarantees the backing storage is the right length and type.
struct SliceAccessorMut<'a, T> {
    cells: &'a [Cell<T>],
}

impl<'a, T: 'a + Copy> ArrayAccessor<'a, T> for SliceAccessorMut<'a, T> {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn get(&self, index: usize) -> Option<T> {
        self.cells.get(index).map(Cell::get)
    }

    fn get_ref(&self, index: usize) -> Option<&'a T> {
        self.cells.get(index).map(|c| unsafe { &*c.as_ptr() })
    }

    fn read(&self, buf: &mut [T], index: usize) -> bool {
        let Some(src) = self.cells.get(index..index + buf.len()) else {
            return false;
        };
        for (dst, cell) in buf.iter_mut().zip(src) {
            *dst = cell.get();
        }
        true
    }

    fn iter_range<R>(&self, index_range: R) -> Option<impl IntoIterator<Item = &'a T> + 'a>
    where
        R: RangeBounds<usize>,
    {
        slice_index_range(self.cells.len(), index_range)
            .map(|r| self.cells[r].iter().map(|c| unsafe { &*c.as_ptr() }))
    }
}

impl<'a, T: 'a + Copy> ArrayAccessorMut<'a, T> for SliceAccessorMut<'a, T> {
    fn get_mut(&self, index: usize) -> Option<&'a mut T> {
        self.cells.get(index).map(|c| unsafe { &mut *c.as_ptr() })
    }

    fn set(&self, index: usize, value: T) -> bool {
        match self.cells.get(index) {
            Some(cell) => {
                cell.set(value);
                true
            }
            None => false,
        }
    }

    fn write(&self, index: usize, buf: &[T]) -> bool {
        let Some(dst) = self.cells.get(index..index + buf.len()) else {
            return false;
        };
        for (cell, value) in dst.iter().zip(buf) {
            cell.set(*value);
        }
        true
    }

    fn iter_range_mut<R>(&self, index_range: R) -> Option<impl IntoIterator<Item = &'a mut T> + 'a>
    where
        R: RangeBounds<usize>,
    {
        slice_index_range(self.cells.len(), index_range)
            .map(|r| self.cells[r].iter().map(|c| unsafe { &mut *c.as_ptr() }))
    }
}

fn slice_index_range<R: RangeBounds<usize>>(
    len: usize,
    range: R,
) -> Option<std::ops::Range<usize>> {
    let start = match range.start_bound() {
        std::ops::Bound::Included(&i) => i,
        std::ops::Bound::Excluded(&i) => i + 1,
        std::ops::Bound::Unbounded => 0,
    };
    let end = match range.end_bound() {
        std::ops::Bound::Included(&i) => i + 1,
        std::ops::Bound::Excluded(&i) => i,
        std::ops::Bound::Unbounded => len,
    };
    (start <= end && end <= len).then_some(start..end)
}

impl Allocator for SpaceTime {
    type Id<T> = SpaceTimeId<T, false>;
    type ArrayId<T> = SpaceTimeId<T, true>;

    fn insert<T: Clone>(&mut self, object: T) -> Self::Id<T> {
        SpaceTimeId::new(self.scalars.get_mut::<T>().insert(object))
    }

    fn insert_array<T: Copy>(&mut self, object: T, n: usize) -> Self::ArrayId<T> {
        SpaceTimeId::new(self.arrays.get_mut::<Vec<T>>().insert(vec![object; n]))
    }

    fn remove<T: Clone>(&mut self, id: Self::Id<T>) -> Result<(), InvalidIdError> {
        self.scalars
            .get_mut::<T>()
            .remove(id.index)
            .map(|_| ())
            .ok_or(InvalidIdError)
    }

    fn remove_array<T: Copy>(&mut self, id: Self::ArrayId<T>) -> Result<(), InvalidIdError> {
        self.arrays
            .get_mut::<Vec<T>>()
            .remove(id.index)
            .map(|_| ())
            .ok_or(InvalidIdError)
    }

    fn pop<T: Clone>(&mut self, id: Self::Id<T>) -> Result<T, InvalidIdError> {
        self.scalars
            .get_mut::<T>()
            .remove(id.index)
            .ok_or(InvalidIdError)
    }

    fn get<T: Clone>(&self, id: Self::Id<T>) -> Result<&T, InvalidIdError> {
        self.scalars
            .get::<T>()
            .and_then(|a| a.get(id.index))
            .ok_or(InvalidIdError)
    }

    fn get_array<'a, T: 'a + Copy>(
        &'a self,
        id: Self::ArrayId<T>,
    ) -> Result<impl ArrayAccessor<'a, T>, InvalidIdError> {
        let slice = self
            .arrays
            .get::<Vec<T>>()
            .and_then(|a| a.get(id.index))
            .map(Vec::as_slice)
            .ok_or(InvalidIdError)?;
        Ok(SliceAccessor { slice })
    }

    fn get_mut<T: Clone>(&mut self, id: Self::Id<T>) -> Result<&mut T, InvalidIdError> {
        self.scalars
            .get_mut::<T>()
            .get_mut(id.index)
            .ok_or(InvalidIdError)
    }

    fn get_array_mut<'a, T: 'a + Copy>(
        &'a mut self,
        id: Self::ArrayId<T>,
    ) -> Result<impl ArrayAccessorMut<'a, T>, InvalidIdError> {
        let slice = self
            .arrays
            .get_mut::<Vec<T>>()
            .get_mut(id.index)
            .ok_or(InvalidIdError)?
            .as_mut_slice();
        Ok(SliceAccessorMut {
            cells: Cell::from_mut(slice).as_slice_of_cells(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_roundtrip() {
        let mut st = SpaceTime::new();
        let id = st.insert(42u32);
        assert_eq!(*st.get(id).unwrap(), 42);
        *st.get_mut(id).unwrap() = 7;
        assert_eq!(*st.get(id).unwrap(), 7);
    }

    #[test]
    fn remove_invalidates_id() {
        let mut st = SpaceTime::new();
        let id = st.insert(1u8);
        st.remove(id).unwrap();
        assert_eq!(st.get(id), Err(InvalidIdError));
        assert_eq!(st.remove(id), Err(InvalidIdError));
    }

    #[test]
    fn array_read_write_and_range() {
        let mut st = SpaceTime::new();
        let id = st.insert_array(0u32, 8);
        {
            let arr = st.get_array_mut(id).unwrap();
            assert!(arr.write(0, &[1, 2, 3]));
            assert!(!arr.write(6, &[1, 2, 3]));
        }
        let arr = st.get_array(id).unwrap();
        assert_eq!(arr.get(1), Some(2));
        let collected: Vec<u32> = arr.iter_range(0..3).unwrap().into_iter().copied().collect();
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[test]
    fn distinct_types_do_not_collide() {
        let mut st = SpaceTime::new();
        let a = st.insert(1u32);
        let b = st.insert(1u8);
        *st.get_mut(a).unwrap() = 9;
        assert_eq!(*st.get(b).unwrap(), 1);
    }
}
