//! Engine configuration and start-up parameter values.

use crate::parameter::Param;
use crate::registers::MAX_CHANNELS;

// ── EngineConfig ─────────────────────────────────────────────────────────

/// Runtime tunables for [`Engine`](crate::engine::Engine).
///
/// [`EngineConfig::default()`] matches the reference four-channel board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EngineConfig {
    /// Number of channels driven. Default: 4. Max: [`MAX_CHANNELS`].
    pub channel_count: usize,
    /// Channels subject to calibration, bit n = channel n. Default: 0x0F.
    pub cal_enabled_mask: u8,
    /// DAC settling time per channel in µs. Default: 110.
    pub power_settle_us: u32,
    /// Minimum time between two trigger evaluations in µs. Default: 50 000.
    pub trigger_interval_us: u32,
    /// Deepest allowed nesting of EXECUTE actions. Default: 8.
    pub max_action_depth: u8,
    /// Most actions a single top-level execute may run. Default: 1024.
    pub action_budget: u16,
    /// Shortest pulse period the audio stage may emit in µs. Default: 2000.
    pub audio_min_pulse_period_us: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_count: MAX_CHANNELS,
            cal_enabled_mask: 0x0F,
            power_settle_us: 110,
            trigger_interval_us: 50_000,
            max_action_depth: 8,
            action_budget: 1024,
            audio_min_pulse_period_us: 2000,
        }
    }
}

impl EngineConfig {
    /// Channel count capped to what the register map holds.
    pub fn channels(&self) -> usize {
        self.channel_count.min(MAX_CHANNELS)
    }

    /// Minimum spacing of power updates for one channel.
    ///
    /// The DAC is shared, so every channel waits for all of them to settle.
    pub fn power_interval_us(&self) -> u32 {
        self.power_settle_us.saturating_mul(self.channels() as u32)
    }
}

// ── Start-up values ──────────────────────────────────────────────────────

/// Initial MAX and VALUE for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamDefault {
    pub param: Param,
    pub max: u16,
    pub value: u16,
}

/// Written to every channel by `Engine::new`. Slots not listed start at 0.
pub const PARAM_DEFAULTS: [ParamDefault; 7] = [
    // 100 %
    ParamDefault { param: Param::Power, max: 1000, value: 1000 },
    // 500 Hz soft limit, starts at 180 Hz
    ParamDefault { param: Param::Frequency, max: 5000, value: 1800 },
    // µs
    ParamDefault { param: Param::PulseWidth, max: 500, value: 150 },
    // ms
    ParamDefault { param: Param::OnTime, max: 10_000, value: 0 },
    ParamDefault { param: Param::OnRampTime, max: 5000, value: 0 },
    ParamDefault { param: Param::OffTime, max: 10_000, value: 0 },
    ParamDefault { param: Param::OffRampTime, max: 5000, value: 0 },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.channels(), 4);
        assert_eq!(config.power_interval_us(), 440);
        assert_eq!(config.trigger_interval_us, 50_000);
    }

    #[test]
    fn channel_count_is_capped() {
        let config = EngineConfig {
            channel_count: 12,
            ..EngineConfig::default()
        };
        assert_eq!(config.channels(), MAX_CHANNELS);
    }

    #[test]
    fn default_values_lie_within_their_bounds() {
        for d in PARAM_DEFAULTS.iter() {
            assert!(d.value <= d.max, "{:?}", d.param);
        }
    }
}
