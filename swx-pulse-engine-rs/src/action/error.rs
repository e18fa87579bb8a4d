use core::fmt;

use crate::parameter::ParameterError;

/// Errors raised while decoding or running actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActionError {
    /// Action index is past the end of the action table.
    IndexOutOfRange,
    /// Record carries an unknown type code.
    UnknownType(u8),
    /// Record addresses a parameter or target that does not exist.
    InvalidParameter,
    /// EXECUTE actions nested deeper than the configured limit.
    DepthExceeded,
    /// A single top-level call ran more actions than allowed.
    BudgetExhausted,
}

impl From<ParameterError> for ActionError {
    fn from(_: ParameterError) -> Self {
        ActionError::InvalidParameter
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ActionError::IndexOutOfRange => write!(f, "action index out of range"),
            ActionError::UnknownType(t) => write!(f, "unknown action type {}", t),
            ActionError::InvalidParameter => write!(f, "action addresses an invalid parameter"),
            ActionError::DepthExceeded => write!(f, "action nesting too deep"),
            ActionError::BudgetExhausted => write!(f, "action execution budget exhausted"),
        }
    }
}
