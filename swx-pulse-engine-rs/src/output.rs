//! Collaborators the engine drives but does not own.
//!
//! The engine talks to hardware only through these traits:
//!
//! - [`Output`]: the pulse/DAC stage.
//! - [`AudioProcessor`]: audio-to-pulse conversion for channels with an
//!   audio source.
//! - [`NotifyLine`]: the out-of-band interrupt line towards the controller.
//! - [`TriggerLines`]: the digital trigger inputs.
//!
//! [`QueuedOutput`] is a ready-made [`Output`] that buffers commands in
//! bounded queues for a second core or a DMA stage to drain.

use heapless::Deque;

use crate::registers::{CHANNEL_POWER_MAX, MAX_CHANNELS};

/// Pulse and power sink.
pub trait Output {
    /// Queue a biphasic pulse. Returns `false` if it was dropped.
    fn pulse(&mut self, channel: usize, pos_us: u16, neg_us: u16, abs_time_us: u32) -> bool;

    /// Set a channel's output power, 0 to 1000.
    fn set_power(&mut self, channel: usize, level: u16);

    /// Whether the channel can accept pulses and power commands.
    fn channel_ready(&self, channel: usize) -> bool;

    /// Switch the output power supply.
    fn set_psu_enabled(&mut self, _enabled: bool) {}
}

/// Audio-to-pulse conversion for channels with an audio source.
///
/// `min_period_us` is the shortest pulse period the audio stage may emit.
pub trait AudioProcessor {
    fn process(&mut self, channel: usize, power_budget: u16, min_period_us: u32);
}

impl AudioProcessor for () {
    fn process(&mut self, _channel: usize, _power_budget: u16, _min_period_us: u32) {}
}

/// Interrupt line towards the external controller.
pub trait NotifyLine {
    fn assert(&mut self);
}

impl NotifyLine for () {
    fn assert(&mut self) {}
}

/// Digital trigger inputs, sampled as a bit field with trigger 1 in bit 0.
pub trait TriggerLines {
    fn read(&mut self) -> u8;
}

/// A fixed line state.
impl TriggerLines for u8 {
    fn read(&mut self) -> u8 {
        *self
    }
}

/// A pulse command as queued by [`QueuedOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pulse {
    pub channel: usize,
    pub pos_us: u16,
    pub neg_us: u16,
    pub abs_time_us: u32,
}

/// A power command as queued by [`QueuedOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerCommand {
    pub channel: usize,
    pub level: u16,
}

/// [`Output`] that buffers up to `N` pulse and `N` power commands.
///
/// Full queues drop the new command. Channels are reported ready according
/// to a bit mask set by the owner of the output stage.
pub struct QueuedOutput<const N: usize> {
    pulses: Deque<Pulse, N>,
    power: Deque<PowerCommand, N>,
    ready_mask: u8,
    psu_enabled: bool,
}

impl<const N: usize> Default for QueuedOutput<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> QueuedOutput<N> {
    /// Empty queues, no channel ready, PSU off.
    pub const fn new() -> Self {
        Self {
            pulses: Deque::new(),
            power: Deque::new(),
            ready_mask: 0,
            psu_enabled: false,
        }
    }

    pub fn set_ready(&mut self, channel: usize, ready: bool) {
        if channel >= MAX_CHANNELS {
            return;
        }
        if ready {
            self.ready_mask |= 1 << channel;
        } else {
            self.ready_mask &= !(1 << channel);
        }
    }

    pub fn set_ready_mask(&mut self, mask: u8) {
        self.ready_mask = mask;
    }

    pub fn psu_enabled(&self) -> bool {
        self.psu_enabled
    }

    pub fn pop_pulse(&mut self) -> Option<Pulse> {
        self.pulses.pop_front()
    }

    pub fn pop_power(&mut self) -> Option<PowerCommand> {
        self.power.pop_front()
    }

    pub fn pending_pulses(&self) -> usize {
        self.pulses.len()
    }

    pub fn pending_power(&self) -> usize {
        self.power.len()
    }

    pub fn clear(&mut self) {
        self.pulses.clear();
        self.power.clear();
    }
}

impl<const N: usize> Output for QueuedOutput<N> {
    fn pulse(&mut self, channel: usize, pos_us: u16, neg_us: u16, abs_time_us: u32) -> bool {
        self.pulses
            .push_back(Pulse {
                channel,
                pos_us,
                neg_us,
                abs_time_us,
            })
            .is_ok()
    }

    fn set_power(&mut self, channel: usize, level: u16) {
        let level = level.min(CHANNEL_POWER_MAX);
        if self.power.push_back(PowerCommand { channel, level }).is_err() {
            #[cfg(feature = "defmt")]
            defmt::warn!("power queue full, ch{} dropped", channel);
        }
    }

    fn channel_ready(&self, channel: usize) -> bool {
        channel < MAX_CHANNELS && self.ready_mask & (1 << channel) != 0
    }

    fn set_psu_enabled(&mut self, enabled: bool) {
        self.psu_enabled = enabled;
    }
}
