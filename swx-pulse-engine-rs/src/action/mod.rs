//! Discrete actions stored in the action table.
//!
//! Each record is [`ACTION_SIZE`] bytes:
//!
//! ```text
//! byte 0   type code
//! byte 1   channel mask (bit n = channel n)
//! byte 2   param << 4 | target
//! byte 3-4 value (u16, little-endian)
//! ```
//!
//! Records are decoded into the [`Action`] sum type before they run, so an
//! unknown type code or an out-of-range parameter is caught once, at the
//! decode step. Running actions needs the whole engine and lives in
//! [`Engine::execute`](crate::engine::Engine::execute).

mod error;

pub use error::ActionError;

use core::ops::Range;

use crate::parameter::{Param, Target};
use crate::registers::{reg_action, ACTION_SIZE, MAX_ACTIONS};
use crate::state::StateStore;

// ---------------------------------------------------------------------------
// Type codes
// ---------------------------------------------------------------------------

pub const ACTION_NONE: u8 = 0;
pub const ACTION_SET: u8 = 1;
pub const ACTION_INCREMENT: u8 = 2;
pub const ACTION_DECREMENT: u8 = 3;
pub const ACTION_ENABLE: u8 = 4;
pub const ACTION_DISABLE: u8 = 5;
pub const ACTION_TOGGLE: u8 = 6;
pub const ACTION_EXECUTE: u8 = 7;
pub const ACTION_PARAM_UPDATE: u8 = 8;

/// Half-open range `[start, end)` of action indices.
///
/// Packed into a word with the start index in the upper byte. A range with
/// `start == end` is empty; so is one with `start > end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ActionRange {
    pub start: u8,
    pub end: u8,
}

impl ActionRange {
    pub const EMPTY: ActionRange = ActionRange { start: 0, end: 0 };

    pub const fn new(start: u8, end: u8) -> Self {
        Self { start, end }
    }

    pub const fn from_word(word: u16) -> Self {
        Self {
            start: (word >> 8) as u8,
            end: word as u8,
        }
    }

    pub const fn to_word(self) -> u16 {
        ((self.start as u16) << 8) | self.end as u16
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Action indices covered by the range.
    pub fn indices(&self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// A decoded action record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    None,
    /// Write `value` into the target slot.
    Set {
        channels: u8,
        param: Param,
        target: Target,
        value: u16,
    },
    /// Add `value` to the target slot, saturating.
    Increment {
        channels: u8,
        param: Param,
        target: Target,
        value: u16,
    },
    /// Subtract `value` from the target slot, saturating.
    Decrement {
        channels: u8,
        param: Param,
        target: Target,
        value: u16,
    },
    /// OR the mask into the channel enable register.
    Enable { channels: u8 },
    /// Clear the mask from the channel enable register.
    Disable { channels: u8 },
    /// XOR the mask into the channel enable register.
    Toggle { channels: u8 },
    /// Run another range of actions.
    Execute { range: ActionRange },
    /// Recompute the stepping record of `param` on the masked channels.
    ParamUpdate { channels: u8, param: Param },
}

impl Action {
    /// Decode a raw record.
    pub fn decode(raw: &[u8; ACTION_SIZE as usize]) -> Result<Self, ActionError> {
        let channels = raw[1];
        let value = u16::from_le_bytes([raw[3], raw[4]]);

        let param = || Param::try_from(raw[2] >> 4).map_err(ActionError::from);
        let slot = || -> Result<(Param, Target), ActionError> {
            Ok((param()?, Target::try_from(raw[2] & 0x0F)?))
        };

        let action = match raw[0] {
            ACTION_NONE => Action::None,
            ACTION_SET => {
                let (param, target) = slot()?;
                Action::Set { channels, param, target, value }
            }
            ACTION_INCREMENT => {
                let (param, target) = slot()?;
                Action::Increment { channels, param, target, value }
            }
            ACTION_DECREMENT => {
                let (param, target) = slot()?;
                Action::Decrement { channels, param, target, value }
            }
            ACTION_ENABLE => Action::Enable { channels },
            ACTION_DISABLE => Action::Disable { channels },
            ACTION_TOGGLE => Action::Toggle { channels },
            ACTION_EXECUTE => Action::Execute {
                range: ActionRange::from_word(value),
            },
            ACTION_PARAM_UPDATE => Action::ParamUpdate {
                channels,
                param: param()?,
            },
            other => return Err(ActionError::UnknownType(other)),
        };
        Ok(action)
    }

    /// Encode into a raw record. Unused fields are zero.
    pub fn encode(&self) -> [u8; ACTION_SIZE as usize] {
        let (kind, channels, packed, value) = match *self {
            Action::None => (ACTION_NONE, 0, 0, 0),
            Action::Set { channels, param, target, value } => {
                (ACTION_SET, channels, pack(param, target), value)
            }
            Action::Increment { channels, param, target, value } => {
                (ACTION_INCREMENT, channels, pack(param, target), value)
            }
            Action::Decrement { channels, param, target, value } => {
                (ACTION_DECREMENT, channels, pack(param, target), value)
            }
            Action::Enable { channels } => (ACTION_ENABLE, channels, 0, 0),
            Action::Disable { channels } => (ACTION_DISABLE, channels, 0, 0),
            Action::Toggle { channels } => (ACTION_TOGGLE, channels, 0, 0),
            Action::Execute { range } => (ACTION_EXECUTE, 0, 0, range.to_word()),
            Action::ParamUpdate { channels, param } => {
                (ACTION_PARAM_UPDATE, channels, pack(param, Target::Value), 0)
            }
        };
        let [lo, hi] = value.to_le_bytes();
        [kind, channels, packed, lo, hi]
    }
}

fn pack(param: Param, target: Target) -> u8 {
    ((param as u8) << 4) | target as u8
}

// ── Table access ─────────────────────────────────────────────────────

/// Read and decode the action at `index`.
pub fn read_action(store: &StateStore, index: usize) -> Result<Action, ActionError> {
    if index >= MAX_ACTIONS {
        return Err(ActionError::IndexOutOfRange);
    }
    let base = reg_action(index);
    let mut raw = [0u8; ACTION_SIZE as usize];
    for (i, byte) in raw.iter_mut().enumerate() {
        *byte = store.get8(base + i as u16);
    }
    Action::decode(&raw)
}

/// Encode and store `action` at `index`.
pub fn write_action(store: &mut StateStore, index: usize, action: &Action) -> Result<(), ActionError> {
    if index >= MAX_ACTIONS {
        return Err(ActionError::IndexOutOfRange);
    }
    let base = reg_action(index);
    for (i, byte) in action.encode().iter().enumerate() {
        store.set8(base + i as u16, *byte);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Ranges ──────────────────────────────────────────────────────

    #[test]
    fn range_word_layout() {
        let range = ActionRange::from_word(0x0A14);
        assert_eq!(range, ActionRange::new(10, 20));
        assert_eq!(range.to_word(), 0x0A14);
        assert_eq!(range.indices(), 10..20);
    }

    #[test]
    fn equal_or_inverted_ranges_are_empty() {
        assert!(ActionRange::new(5, 5).is_empty());
        assert!(ActionRange::new(6, 5).is_empty());
        assert_eq!(ActionRange::new(6, 5).indices().count(), 0);
        assert!(!ActionRange::new(5, 6).is_empty());
    }

    // ── Records ─────────────────────────────────────────────────────

    #[test]
    fn decode_set_record() {
        let raw = [ACTION_SET, 0b0011, 0x20, 0x96, 0x00];
        assert_eq!(
            Action::decode(&raw),
            Ok(Action::Set {
                channels: 0b0011,
                param: Param::PulseWidth,
                target: Target::Value,
                value: 150,
            })
        );
    }

    #[test]
    fn decode_execute_uses_value_as_range() {
        let raw = [ACTION_EXECUTE, 0, 0, 0x05, 0x02];
        assert_eq!(
            Action::decode(&raw),
            Ok(Action::Execute {
                range: ActionRange::new(2, 5)
            })
        );
    }

    #[test]
    fn decode_rejects_unknown_type_and_bad_slots() {
        assert_eq!(Action::decode(&[9, 0, 0, 0, 0]), Err(ActionError::UnknownType(9)));
        assert_eq!(
            Action::decode(&[ACTION_INCREMENT, 1, 0x90, 0, 0]),
            Err(ActionError::InvalidParameter)
        );
        assert_eq!(
            Action::decode(&[ACTION_DECREMENT, 1, 0x06, 0, 0]),
            Err(ActionError::InvalidParameter)
        );
        // Mask-only actions ignore the param byte.
        assert_eq!(
            Action::decode(&[ACTION_TOGGLE, 4, 0xFF, 0, 0]),
            Ok(Action::Toggle { channels: 4 })
        );
    }

    #[test]
    fn encode_matches_record_layout() {
        let action = Action::Decrement {
            channels: 0b1000,
            param: Param::OffTime,
            target: Target::Max,
            value: 0x1234,
        };
        assert_eq!(action.encode(), [ACTION_DECREMENT, 0b1000, 0x52, 0x34, 0x12]);
    }

    // ── Table ───────────────────────────────────────────────────────

    #[test]
    fn table_access_is_bounded() {
        let mut store = StateStore::new();
        let action = Action::Enable { channels: 0b0101 };
        write_action(&mut store, MAX_ACTIONS - 1, &action).unwrap();
        assert_eq!(read_action(&store, MAX_ACTIONS - 1), Ok(action));
        assert_eq!(read_action(&store, MAX_ACTIONS), Err(ActionError::IndexOutOfRange));
        assert_eq!(
            write_action(&mut store, MAX_ACTIONS, &action),
            Err(ActionError::IndexOutOfRange)
        );
    }

    #[test]
    fn empty_table_reads_as_none() {
        let store = StateStore::new();
        assert_eq!(read_action(&store, 0), Ok(Action::None));
    }
}
