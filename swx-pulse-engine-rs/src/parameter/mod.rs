//! Dynamic channel parameters.
//!
//! Every channel owns [`PARAM_COUNT`] parameters (power, frequency, pulse
//! width and the four waveform phase durations, plus two reserved kinds).
//! Each parameter is a group of six 16-bit **target** slots living in the
//! state store:
//!
//! ```text
//! VALUE  MIN  MAX  RATE  MODE  ACTION_RANGE
//! ```
//!
//! The stored slots are the source of truth; the [`Stepper`] next to each
//! parameter only caches how to walk VALUE between MIN and MAX at the
//! cycling RATE. It must be recomputed explicitly whenever MODE, RATE, MIN
//! or MAX change.
//!
//! # Mode word
//!
//! The MODE slot carries one of the [`Mode`] enumerators in its low bits and
//! a notify flag in bit 15 ([`ModeWord::NOTIFY_BIT`]). When the notify flag
//! is set and the value reaches an extreme, the engine records a flag bit
//! for the parameter and asserts the notify line.

mod error;
mod stepper;

pub use error::ParameterError;
pub use stepper::{Extreme, Stepper};

use crate::registers::{param_target_index, REG_CHNN_PARAM};
pub use crate::registers::{PARAM_COUNT, TARGET_COUNT};
use crate::state::StateStore;

/// Parameter kinds, in store order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Param {
    /// Output intensity, 0 to 1000.
    Power = 0,
    /// Pulse frequency in dHz (1 Hz = 10 dHz).
    Frequency,
    /// Width of each pulse phase in µs.
    PulseWidth,
    /// Milliseconds the output stays fully on.
    OnTime,
    /// Milliseconds to ramp from off to on. `_|‾`
    OnRampTime,
    /// Milliseconds the output stays off.
    OffTime,
    /// Milliseconds to ramp from on to off. `‾|_`
    OffRampTime,
    Reserved1,
    Reserved2,
}

impl Param {
    pub const ALL: [Param; PARAM_COUNT] = [
        Param::Power,
        Param::Frequency,
        Param::PulseWidth,
        Param::OnTime,
        Param::OnRampTime,
        Param::OffTime,
        Param::OffRampTime,
        Param::Reserved1,
        Param::Reserved2,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Bit for this parameter in the per-channel notify flags register.
    pub fn flag_bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl TryFrom<u8> for Param {
    type Error = ParameterError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::from_index(raw as usize).ok_or(ParameterError::InvalidParam)
    }
}

/// The six slots of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Target {
    /// The live parameter value.
    Value = 0,
    /// Lower bound for the value and for cycling.
    Min,
    /// Upper bound for the value and for cycling.
    Max,
    /// Cycling frequency in mHz (1 Hz = 1000 mHz).
    Rate,
    /// Cycling [`Mode`] plus the notify bit.
    Mode,
    /// Actions to run when the value reaches MIN or MAX.
    /// Upper byte is the start index, lower byte the end index.
    ActionRange,
}

impl Target {
    pub const ALL: [Target; TARGET_COUNT] = [
        Target::Value,
        Target::Min,
        Target::Max,
        Target::Rate,
        Target::Mode,
        Target::ActionRange,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Writing one of these slots may leave VALUE outside `[MIN, MAX]`.
    pub fn affects_bounds(self) -> bool {
        matches!(self, Target::Value | Target::Min | Target::Max)
    }

    /// Writing one of these slots invalidates the stepping record.
    pub fn affects_stepping(self) -> bool {
        matches!(self, Target::Min | Target::Max | Target::Rate | Target::Mode)
    }
}

impl TryFrom<u8> for Target {
    type Error = ParameterError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        Self::from_index(raw as usize).ok_or(ParameterError::InvalidTarget)
    }
}

/// How VALUE moves between MIN and MAX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Mode {
    Disabled = 0,
    /// Ramp between MIN and MAX, starting upwards.
    UpDown,
    /// Ramp between MAX and MIN, starting downwards.
    DownUp,
    /// Ramp from MIN to MAX, then jump back to MIN.
    UpReset,
    /// Ramp from MAX to MIN, then jump back to MAX.
    DownReset,
    /// Ramp from MIN to MAX once, then disable cycling.
    Up,
    /// Ramp from MAX to MIN once, then disable cycling.
    Down,
}

/// Raw contents of a MODE slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeWord(pub u16);

impl ModeWord {
    pub const NOTIFY_BIT: u16 = 1 << 15;

    pub fn new(mode: Mode, notify: bool) -> Self {
        let notify = if notify { Self::NOTIFY_BIT } else { 0 };
        Self(mode as u16 | notify)
    }

    /// The cycling mode, or `None` for unknown encodings.
    pub fn mode(self) -> Option<Mode> {
        match self.0 & !Self::NOTIFY_BIT {
            0 => Some(Mode::Disabled),
            1 => Some(Mode::UpDown),
            2 => Some(Mode::DownUp),
            3 => Some(Mode::UpReset),
            4 => Some(Mode::DownReset),
            5 => Some(Mode::Up),
            6 => Some(Mode::Down),
            _ => None,
        }
    }

    pub fn notify(self) -> bool {
        self.0 & Self::NOTIFY_BIT != 0
    }
}

// ── Store access ─────────────────────────────────────────────────────

/// Absolute store address of a parameter slot.
pub fn address(channel: usize, param: Param, target: Target) -> u16 {
    REG_CHNN_PARAM + param_target_index(channel, param.index(), target.index())
}

/// Read a parameter slot.
pub fn get(store: &StateStore, channel: usize, param: Param, target: Target) -> u16 {
    store.get16(address(channel, param, target))
}

/// Write a parameter slot.
///
/// Writing VALUE, MIN or MAX re-clamps VALUE into `[MIN, MAX]`. The
/// stepping record is **not** recomputed; callers do that explicitly.
pub fn set(store: &mut StateStore, channel: usize, param: Param, target: Target, value: u16) {
    store.set16(address(channel, param, target), value);
    if target.affects_bounds() {
        clamp_value(store, channel, param);
    }
}

/// Force VALUE into `[MIN, MAX]`.
pub fn clamp_value(store: &mut StateStore, channel: usize, param: Param) {
    let value = get(store, channel, param, Target::Value);
    let min = get(store, channel, param, Target::Min);
    let max = get(store, channel, param, Target::Max);
    store.set16(address(channel, param, Target::Value), clamp(value, min, max));
}

/// Clamp that tolerates `min > max` (MIN wins), matching controller tooling.
pub(crate) fn clamp(value: u16, min: u16, max: u16) -> u16 {
    if value < min {
        min
    } else if value > max {
        max
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trips() {
        for (i, p) in Param::ALL.iter().enumerate() {
            assert_eq!(Param::from_index(i), Some(*p));
        }
        assert_eq!(Param::from_index(PARAM_COUNT), None);
        assert_eq!(Target::from_index(5), Some(Target::ActionRange));
        assert_eq!(Target::from_index(6), None);

        assert_eq!(Param::try_from(9), Err(ParameterError::InvalidParam));
        assert_eq!(Target::try_from(2), Ok(Target::Max));
        assert_eq!(Target::try_from(15), Err(ParameterError::InvalidTarget));
    }

    #[test]
    fn mode_word_separates_notify_bit() {
        let word = ModeWord::new(Mode::DownReset, true);
        assert_eq!(word.0, 0x8004);
        assert_eq!(word.mode(), Some(Mode::DownReset));
        assert!(word.notify());

        let plain = ModeWord(1);
        assert_eq!(plain.mode(), Some(Mode::UpDown));
        assert!(!plain.notify());

        assert_eq!(ModeWord(7).mode(), None);
        assert_eq!(ModeWord(0x8000).mode(), Some(Mode::Disabled));
    }

    #[test]
    fn set_value_is_clamped() {
        let mut store = StateStore::new();
        set(&mut store, 0, Param::Power, Target::Max, 1000);
        for v in [0u16, 1, 999, 1000, 1001, 40000, u16::MAX] {
            set(&mut store, 0, Param::Power, Target::Value, v);
            let stored = get(&store, 0, Param::Power, Target::Value);
            assert!(stored <= 1000, "{} stored as {}", v, stored);
        }
    }

    #[test]
    fn narrowing_bounds_reclamps_value() {
        let mut store = StateStore::new();
        set(&mut store, 1, Param::Frequency, Target::Max, 5000);
        set(&mut store, 1, Param::Frequency, Target::Value, 1800);

        set(&mut store, 1, Param::Frequency, Target::Max, 1000);
        assert_eq!(get(&store, 1, Param::Frequency, Target::Value), 1000);

        set(&mut store, 1, Param::Frequency, Target::Min, 1200);
        assert_eq!(get(&store, 1, Param::Frequency, Target::Value), 1200);
    }

    #[test]
    fn non_bound_targets_do_not_clamp() {
        let mut store = StateStore::new();
        set(&mut store, 0, Param::OnTime, Target::Max, 10);
        store.set16(address(0, Param::OnTime, Target::Value), 50);
        set(&mut store, 0, Param::OnTime, Target::Rate, 1000);
        assert_eq!(get(&store, 0, Param::OnTime, Target::Value), 50);
    }

    #[test]
    fn channels_do_not_share_slots() {
        let mut store = StateStore::new();
        set(&mut store, 0, Param::PulseWidth, Target::Rate, 11);
        set(&mut store, 1, Param::PulseWidth, Target::Rate, 22);
        assert_eq!(get(&store, 0, Param::PulseWidth, Target::Rate), 11);
        assert_eq!(get(&store, 1, Param::PulseWidth, Target::Rate), 22);
    }

    #[test]
    fn flag_bits() {
        assert_eq!(Param::Power.flag_bit(), 0b1);
        assert_eq!(Param::OffRampTime.flag_bit(), 0b100_0000);
    }
}
