//! Per-channel waveform timing.
//!
//! A channel cycles through four phases in a fixed order:
//!
//! ```text
//!   ON_RAMP ──▶ ON ──▶ OFF_RAMP ──▶ OFF ──┐
//!      ▲                                  │
//!      └──────────────────────────────────┘
//! ```
//!
//! Each phase lasts the current VALUE, in milliseconds, of the parameter of
//! the same name. Power is scaled by a per-mille modifier that rises
//! through ON_RAMP, holds in ON, falls through OFF_RAMP and is absent in
//! OFF.

mod sequencer;

pub use sequencer::{MacroSequencer, ALL_CHANNELS};

use crate::parameter::{self, Param, Target};
use crate::registers::CHANNEL_POWER_MAX;
use crate::state::StateStore;
use crate::time;

/// Modifier value for full power.
pub const MODIFIER_FULL: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Phase {
    OnRamp = 0,
    On,
    OffRamp,
    Off,
}

impl Phase {
    /// Parameter holding this phase's duration.
    pub fn param(self) -> Param {
        match self {
            Phase::OnRamp => Param::OnRampTime,
            Phase::On => Param::OnTime,
            Phase::OffRamp => Param::OffRampTime,
            Phase::Off => Param::OffTime,
        }
    }

    pub fn next(self) -> Phase {
        match self {
            Phase::OnRamp => Phase::On,
            Phase::On => Phase::OffRamp,
            Phase::OffRamp => Phase::Off,
            Phase::Off => Phase::OnRamp,
        }
    }
}

/// Phase state machine for one channel.
///
/// After [`reset`](PhaseTimer::reset) the timer is unarmed: the next
/// [`update`](PhaseTimer::update) starts the first phase at `now` instead
/// of advancing out of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhaseTimer {
    phase: Phase,
    deadline_us: Option<u32>,
}

impl Default for PhaseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTimer {
    pub const fn new() -> Self {
        Self {
            phase: Phase::OnRamp,
            deadline_us: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_armed(&self) -> bool {
        self.deadline_us.is_some()
    }

    /// Back to the first phase with the timer unarmed.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Arm or advance the timer. Returns `true` if the phase changed.
    pub fn update(&mut self, store: &StateStore, channel: usize, now: u32) -> bool {
        match self.deadline_us {
            None => {
                self.deadline_us = Some(now.wrapping_add(duration_us(store, channel, self.phase)));
                false
            }
            Some(deadline) if time::reached(now, deadline) => {
                self.phase = self.phase.next();
                self.deadline_us = Some(now.wrapping_add(duration_us(store, channel, self.phase)));
                true
            }
            Some(_) => false,
        }
    }

    /// Microseconds left in the current phase. Zero when unarmed or overdue.
    pub fn remaining_us(&self, now: u32) -> u32 {
        match self.deadline_us {
            Some(deadline) if !time::reached(now, deadline) => deadline.wrapping_sub(now),
            _ => 0,
        }
    }

    /// Power modifier for the current phase, `None` while OFF.
    pub fn modifier(&self, store: &StateStore, channel: usize, now: u32) -> Option<u32> {
        let duration_ms = parameter::get(store, channel, self.phase.param(), Target::Value);
        power_modifier(self.phase, self.remaining_us(now), duration_ms)
    }
}

fn duration_us(store: &StateStore, channel: usize, phase: Phase) -> u32 {
    parameter::get(store, channel, phase.param(), Target::Value) as u32 * 1000
}

/// Per-mille power modifier for `phase`.
///
/// Ramps scale by the time left in the phase relative to the ramp length,
/// capped at full; ON_RAMP runs the fraction backwards so power rises. A
/// zero-length ramp counts as complete.
pub fn power_modifier(phase: Phase, remaining_us: u32, ramp_ms: u16) -> Option<u32> {
    match phase {
        Phase::Off => None,
        Phase::On => Some(MODIFIER_FULL),
        Phase::OnRamp | Phase::OffRamp => {
            let ramp_us = ramp_ms as u64 * 1000;
            if ramp_us == 0 {
                return Some(MODIFIER_FULL);
            }
            let fraction = (remaining_us as u64 * MODIFIER_FULL as u64 / ramp_us).min(MODIFIER_FULL as u64) as u32;
            Some(match phase {
                Phase::OnRamp => MODIFIER_FULL - fraction,
                _ => fraction,
            })
        }
    }
}

/// Combine the POWER parameter, the channel power level and the phase
/// modifier. Both inputs are capped at [`CHANNEL_POWER_MAX`].
pub fn effective_power(param_power: u16, level: u16, modifier: u32) -> u16 {
    let max = CHANNEL_POWER_MAX as u64;
    let param_power = (param_power as u64).min(max);
    let level = (level as u64).min(max);
    let modifier = (modifier as u64).min(MODIFIER_FULL as u64);
    (param_power * level * modifier / (max * MODIFIER_FULL as u64)) as u16
}
