use core::fmt;

/// Errors returned by externally originated state store access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateError {
    /// Write touches an address below [`READ_ONLY_BOUNDARY`](crate::registers::READ_ONLY_BOUNDARY).
    ReadOnly,
    /// Access runs past the end of the store.
    OutOfBounds,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StateError::ReadOnly => write!(f, "write to read-only register"),
            StateError::OutOfBounds => write!(f, "address out of bounds"),
        }
    }
}
