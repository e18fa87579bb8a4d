use core::fmt;

/// Errors that can occur when addressing a channel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParameterError {
    /// Channel index is not below the configured channel count.
    InvalidChannel,
    /// Parameter index is out of bounds (must be < `PARAM_COUNT`).
    InvalidParam,
    /// Target index is out of bounds (must be < `TARGET_COUNT`).
    InvalidTarget,
}

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParameterError::InvalidChannel => write!(f, "invalid channel index"),
            ParameterError::InvalidParam => write!(f, "invalid parameter index"),
            ParameterError::InvalidTarget => write!(f, "invalid target index"),
        }
    }
}
