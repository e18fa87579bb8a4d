use crate::action::ActionRange;
use crate::state::StateStore;
use crate::time;

use super::{get, Mode, ModeWord, Param, Target};

/// Upper bound (exclusive) for the step size search.
const MAX_STEP: i8 = 100;

/// Cycling period of a full MIN to MAX traversal is `RATE_SCALE / rate` µs
/// for a rate in mHz.
const RATE_SCALE: u32 = 1_000_000_000;

/// Reported when a stepped value reaches MIN or MAX.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Extreme {
    pub channel: usize,
    pub param: Param,
    /// MODE had its notify bit set when the extreme was reached.
    pub notify: bool,
    /// Contents of the parameter's ACTION_RANGE slot.
    pub actions: ActionRange,
}

/// Stepping record for one (channel, parameter) pair.
///
/// Lives outside the state store and is derived from MIN, MAX, RATE and
/// MODE by [`recompute`](Stepper::recompute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Stepper {
    step: i8,
    update_period_us: u32,
    next_update_us: Option<u32>,
}

impl Stepper {
    pub const fn new() -> Self {
        Self {
            step: 0,
            update_period_us: 0,
            next_update_us: None,
        }
    }

    /// Signed amount added to VALUE per update. Zero means stepping is off.
    pub fn step(&self) -> i8 {
        self.step
    }

    /// Microseconds between two updates.
    pub fn update_period_us(&self) -> u32 {
        self.update_period_us
    }

    pub fn is_active(&self) -> bool {
        self.step != 0
    }

    /// Derive step size and update period from the stored slots.
    ///
    /// The smallest step for which one update is at least 1 µs apart is
    /// chosen. The direction follows the mode; for the bouncing modes the
    /// current direction is kept so a recompute mid-cycle does not reverse
    /// the sweep.
    pub fn recompute(&mut self, store: &StateStore, channel: usize, param: Param) {
        let mode = ModeWord(get(store, channel, param, Target::Mode)).mode();
        let rate = get(store, channel, param, Target::Rate);

        let mode = match mode {
            Some(Mode::Disabled) | None => return self.disable(),
            Some(_) if rate == 0 => return self.disable(),
            Some(mode) => mode,
        };

        let min = get(store, channel, param, Target::Min);
        let max = get(store, channel, param, Target::Max);
        let range = max.saturating_sub(min) as u32;
        let period = RATE_SCALE / rate as u32;

        let previous = self.step;
        let mut found = None;
        for step in 1..MAX_STEP {
            let delta = range / step as u32;
            if delta == 0 {
                break;
            }
            if period >= delta {
                found = Some((step, period / delta));
                break;
            }
        }

        let Some((step, update_period_us)) = found else {
            return self.disable();
        };

        let descending = match mode {
            Mode::DownReset | Mode::Down => true,
            Mode::DownUp => previous <= 0,
            Mode::UpDown => previous < 0,
            Mode::UpReset | Mode::Up | Mode::Disabled => false,
        };

        self.step = if descending { -step } else { step };
        self.update_period_us = update_period_us;
    }

    fn disable(&mut self) {
        self.step = 0;
        self.update_period_us = 0;
    }

    /// Advance VALUE by one step if the update is due.
    ///
    /// Returns the extreme that was reached, if any. Running the action
    /// range and raising notify flags is left to the caller.
    pub fn tick(
        &mut self,
        store: &mut StateStore,
        channel: usize,
        param: Param,
        now: u32,
    ) -> Option<Extreme> {
        let word = ModeWord(get(store, channel, param, Target::Mode));
        let rate = get(store, channel, param, Target::Rate);
        let mode = match word.mode() {
            Some(mode) if mode != Mode::Disabled && rate != 0 && self.step != 0 => mode,
            _ => {
                // An idle record must not hold a deadline across a counter wrap.
                self.next_update_us = None;
                return None;
            }
        };
        if !time::due(now, self.next_update_us) {
            return None;
        }
        self.next_update_us = Some(now.wrapping_add(self.update_period_us));

        let previous = get(store, channel, param, Target::Value);
        let mut value = previous.wrapping_add_signed(self.step as i16);
        let min = get(store, channel, param, Target::Min);
        let max = get(store, channel, param, Target::Max);

        let wrapped = (self.step < 0 && value > previous) || (self.step > 0 && value < previous);
        let at_extreme = value <= min || value >= max || wrapped;

        if at_extreme {
            match mode {
                Mode::UpDown | Mode::DownUp => {
                    value = if self.step < 0 { min } else { max };
                    self.step = -self.step;
                }
                Mode::UpReset => value = min,
                Mode::DownReset => value = max,
                Mode::Up => {
                    value = max;
                    store.set16(super::address(channel, param, Target::Mode), Mode::Disabled as u16);
                }
                Mode::Down => {
                    value = min;
                    store.set16(super::address(channel, param, Target::Mode), Mode::Disabled as u16);
                }
                Mode::Disabled => return None,
            }
        }

        store.set16(super::address(channel, param, Target::Value), value);

        if !at_extreme {
            return None;
        }

        #[cfg(feature = "defmt")]
        defmt::debug!("ch{} {} reached extreme {}", channel, param, value);

        Some(Extreme {
            channel,
            param,
            notify: word.notify(),
            actions: ActionRange::from_word(get(store, channel, param, Target::ActionRange)),
        })
    }
}
