#[macro_use]
extern crate static_assertions;

pub mod address_map;
pub mod address_range;
pub mod bus;
pub mod core;
pub mod debug;
pub mod instruction;
pub mod interconnect;
pub mod registers;

pub mod resources;
pub mod simulator;

// Re-export Allocator trait so dependants don't need to include space-time as a dependency
/// Trait for types that can store the state of simulated components.
pub use space_time::allocator::{Allocator, ArrayAccessor, ArrayAccessorMut};

/// Re-export of [`AddressRange`] for convenience.
pub use address_range::AddressRange;

pub mod unit {
    //! Collection of the units in which memory can be addressed (in bytes).

    /// A _byte_ is 8 bits.
    pub const BYTE: u32 = 1;

    /// A _halfword_ is 16 bits (2 bytes).
    pub const HALFWORD: u32 = 2;

    /// A _word_ is 32 bits (4 bytes).
    pub const WORD: u32 = 4;
}

/// Address alignment ranging from no alignment (`1`) to `1 << 31` alignment.
/// Representing `1 << 32` alignment is possible by specifying an alignment of `0`.
// Maintains the invariant that self.0 is a power of two, or 0.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u32);

impl Alignment {
    /// Byte alignment is equivalent to no alignment.
    pub const BYTE: Self = Self(1);

    /// Halfword alignment means the address is a multiple of 2 (`address & 0b1 == 0`).
    pub const HALFWORD: Self = Self(2);

    /// Word alignment means the address is a multiple of 4 (`address & 0b11 == 0`).
    pub const WORD: Self = Self(4);

    /// Creates the natural alignment for a unit of size `size`. Returns `None` if `size` is not a
    /// power of two, except if it is `0`, in which case `1 << 32` alignment is returned.
    pub fn natural_for_size(size: u32) -> Option<Self> {
        if size == 0 {
            Some(Self(0))
        } else {
            size.is_power_of_two().then_some(Self(size))
        }
    }

    /// Returns the alignment as a power of two, modulo `1 << 32`.
    /// This means an alignment of `1 << 32` will return `0`.
    pub fn as_power_of_two(self) -> u32 {
        self.0
    }

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u32) -> bool {
        address & self.0.wrapping_sub(1) == 0
    }
}

/// Sum type for the two possible byte orders: big-endian or little-endian.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Endianness {
    /// Little-endian (least significant byte at lowest address)
    LE,
    /// Big-endian (most significant byte at lowest address)
    BE,
}

/// Wrapper around [`Allocator`] for single objects of type `T` that are never deallocated during
/// the lifetime of this wrapper.
///
/// The primary goal of this wrapper is to provide a more convenient interface around
/// [`Allocator::get`] and [`Allocator::get_mut`], which returns a (mutable) reference directly
/// rather than a `Result`.
#[derive(Debug)]
pub struct Allocated<A: Allocator, T: 'static + Clone>(A::Id<T>);

impl<A: Allocator, T: 'static + Clone> Allocated<A, T> {
    /// Inserts `object` into `allocator`. See also [`Allocator::insert`].
    pub fn new(allocator: &mut A, object: T) -> Self {
        Self(allocator.insert(object))
    }

    /// Pops the inner object from `allocator`, returning it while consuming `self`.
    /// See also [`Allocator::pop`].
    ///
    /// # Panics
    ///
    /// Panics if the inner object was already removed from `allocator`.
    pub fn into_inner(self, allocator: &mut A) -> T {
        allocator.pop(self.0).unwrap()
    }

    /// Removes the inner object from `allocator`, consuming `self`. See also [`Allocator::remove`].
    ///
    /// If you need an owned version of the inner object, use [`into_inner`](Self::into_inner).
    ///
    /// # Panics
    ///
    /// Panics if the inner object was already removed from `allocator`.
    pub fn drop(self, allocator: &mut A) {
        allocator.remove(self.0).unwrap()
    }

    /// Returns a reference to the stored object. See also [`Allocator::get`].
    ///
    /// # Panics
    ///
    /// Panics if the inner object has been removed from `allocator`.
    pub fn get<'a>(&self, allocator: &'a A) -> &'a T {
        allocator.get(self.0).unwrap()
    }

    /// Returns a mutable reference to the stored object. See also [`Allocator::get_mut`].
    ///
    /// # Panics
    ///
    /// Panics if the inner object has been removed from `allocator`.
    pub fn get_mut<'a>(&self, allocator: &'a mut A) -> &'a mut T {
        allocator.get_mut(self.0).unwrap()
    }
}
