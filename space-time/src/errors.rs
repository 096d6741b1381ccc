/// This error indicates an invalid [`crate::Allocator::Id`] or [`crate::Allocator::ArrayId`] was
/// used.
///
/// Within the context of one [`crate::Allocator`], an id can be invalid if it has never been
/// created by that [`crate::Allocator`], or if it has already been removed or popped from it.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct InvalidIdError;

impl std::fmt::Display for InvalidIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid or stale allocator id")
    }
}

impl std::error::Error for InvalidIdError {}
