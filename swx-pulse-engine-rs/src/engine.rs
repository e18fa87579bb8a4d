//! The control loop core.
//!
//! [`Engine`] owns the state store and every runtime record derived from
//! it: stepping records, phase timers, the macro sequencer and the trigger
//! edge detector. It is driven by calling [`Engine::tick`] once per loop
//! iteration with the current microsecond timestamp.
//!
//! # Tick order
//!
//! 1. Consume the bus-write signal: apply PSU state and the command register.
//! 2. Poll triggers (gated by the trigger signal and the poll interval) and
//!    run the ranges of triggers that turned true.
//! 3. Advance the macro sequencer.
//! 4. Per channel: step every parameter (running extreme actions), then
//!    reset the phase timer if the channel is disabled, otherwise advance
//!    it and emit power and pulses.
//!
//! Nothing here blocks or panics. Failures are logged and cost at most one
//! channel for one tick.

use crate::action::{read_action, Action, ActionError, ActionRange};
use crate::config::{EngineConfig, PARAM_DEFAULTS};
use crate::output::{AudioProcessor, NotifyLine, Output, TriggerLines};
use crate::parameter::{self, Extreme, Param, ParameterError, Stepper, Target, PARAM_COUNT};
use crate::registers::*;
use crate::state::{Signals, StateError, StateStore};
use crate::time;
use crate::trigger::TriggerEvaluator;
use crate::waveform::{effective_power, MacroSequencer, Phase, PhaseTimer};

/// Pulse period is `PULSE_PERIOD_SCALE / frequency` µs for a frequency in dHz.
const PULSE_PERIOD_SCALE: u32 = 10_000_000;

/// Scheduler state of one channel.
#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    timer: PhaseTimer,
    last_power_us: Option<u32>,
    next_pulse_us: Option<u32>,
}

impl ChannelState {
    const fn new() -> Self {
        Self {
            timer: PhaseTimer::new(),
            last_power_us: None,
            next_pulse_us: None,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Pulse generation and parameter engine.
///
/// `O` receives pulse and power commands, `A` takes over channels with an
/// audio source and `N` is the notify interrupt line. Use `()` for `A` or
/// `N` when the board has no such collaborator.
pub struct Engine<'s, O, A = (), N = ()> {
    signals: &'s Signals,
    store: StateStore,
    config: EngineConfig,
    steppers: [[Stepper; PARAM_COUNT]; MAX_CHANNELS],
    channels: [ChannelState; MAX_CHANNELS],
    sequencer: MacroSequencer,
    triggers: TriggerEvaluator,
    psu_enabled: bool,
    output: O,
    audio: A,
    notify: N,
}

impl<'s, O, A, N> Engine<'s, O, A, N>
where
    O: Output,
    A: AudioProcessor,
    N: NotifyLine,
{
    /// Build an engine with a fresh store.
    ///
    /// Identity registers and parameter defaults are written and every
    /// channel starts `Uncalibrated`; the calibration collaborator promotes
    /// channels through [`set_channel_status`](Self::set_channel_status).
    pub fn new(signals: &'s Signals, config: EngineConfig, output: O, audio: A, notify: N) -> Self {
        let mut engine = Self {
            signals,
            store: StateStore::new(),
            config,
            steppers: [[Stepper::new(); PARAM_COUNT]; MAX_CHANNELS],
            channels: [ChannelState::new(); MAX_CHANNELS],
            sequencer: MacroSequencer::new(),
            triggers: TriggerEvaluator::new(),
            psu_enabled: false,
            output,
            audio,
            notify,
        };

        let count = engine.config.channels();
        engine.store.set16(REG_VERSION, SWX_VERSION);
        engine.store.set8(REG_CHANNEL_COUNT, count as u8);
        engine.store.set8(REG_CH_CAL_ENABLED, engine.config.cal_enabled_mask);

        for ch in 0..count {
            for d in PARAM_DEFAULTS.iter() {
                parameter::set(&mut engine.store, ch, d.param, Target::Max, d.max);
                parameter::set(&mut engine.store, ch, d.param, Target::Value, d.value);
            }
            engine.store.set8(reg_status(ch), ChannelStatus::Uncalibrated as u8);
        }

        #[cfg(feature = "defmt")]
        defmt::info!("swx engine v{} with {} channels", SWX_VERSION, count);

        engine
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Unrestricted store access for engine-side collaborators.
    pub fn store_mut(&mut self) -> &mut StateStore {
        &mut self.store
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }

    pub fn audio(&self) -> &A {
        &self.audio
    }

    pub fn notify_line(&self) -> &N {
        &self.notify
    }

    /// Current phase of a channel.
    pub fn phase(&self, channel: usize) -> Option<Phase> {
        self.phase_timer(channel).map(PhaseTimer::phase)
    }

    pub fn phase_timer(&self, channel: usize) -> Option<&PhaseTimer> {
        self.channels[..self.config.channels()].get(channel).map(|c| &c.timer)
    }

    pub fn stepper(&self, channel: usize, param: Param) -> Option<&Stepper> {
        self.steppers[..self.config.channels()]
            .get(channel)
            .map(|row| &row[param.index()])
    }

    fn check_channel(&self, channel: usize) -> Result<(), ParameterError> {
        if channel < self.config.channels() {
            Ok(())
        } else {
            Err(ParameterError::InvalidChannel)
        }
    }

    // ── Parameters ───────────────────────────────────────────────────

    /// Write a parameter slot, clamping VALUE when a bound or VALUE changes.
    ///
    /// Stepping is not recomputed; call
    /// [`recompute_stepping`](Self::recompute_stepping) after changing MIN,
    /// MAX, RATE or MODE.
    pub fn set_parameter(
        &mut self,
        channel: usize,
        param: Param,
        target: Target,
        value: u16,
    ) -> Result<(), ParameterError> {
        self.check_channel(channel)?;
        parameter::set(&mut self.store, channel, param, target, value);
        Ok(())
    }

    pub fn get_parameter(&self, channel: usize, param: Param, target: Target) -> Result<u16, ParameterError> {
        self.check_channel(channel)?;
        Ok(parameter::get(&self.store, channel, param, target))
    }

    /// Rebuild the stepping record of one parameter from its slots.
    pub fn recompute_stepping(&mut self, channel: usize, param: Param) -> Result<(), ParameterError> {
        self.check_channel(channel)?;
        self.steppers[channel][param.index()].recompute(&self.store, channel, param);
        Ok(())
    }

    fn recompute_all(&mut self) {
        for ch in 0..self.config.channels() {
            for param in Param::ALL {
                self.steppers[ch][param.index()].recompute(&self.store, ch, param);
            }
        }
    }

    // ── Calibration collaborator ─────────────────────────────────────

    pub fn set_channel_status(&mut self, channel: usize, status: ChannelStatus) -> Result<(), ParameterError> {
        self.check_channel(channel)?;
        self.store.set8(reg_status(channel), status as u8);
        Ok(())
    }

    pub fn channel_status(&self, channel: usize) -> ChannelStatus {
        if channel >= self.config.channels() {
            return ChannelStatus::Invalid;
        }
        ChannelStatus::from_u8(self.store.get8(reg_status(channel)))
    }

    pub fn set_calibration(&mut self, channel: usize, value: u16) -> Result<(), ParameterError> {
        self.check_channel(channel)?;
        self.store.set16(reg_cal_value(channel), value);
        Ok(())
    }

    /// Calibrated and accepted by the output stage.
    fn channel_usable(&self, channel: usize) -> bool {
        self.channel_status(channel) == ChannelStatus::Ready && self.output.channel_ready(channel)
    }

    // ── Bus ──────────────────────────────────────────────────────────

    /// Apply a write from the external controller.
    ///
    /// Rejected as a whole if it touches the read-only region or runs past
    /// the store. Touched parameter slots get the same treatment as a
    /// parameter write: VALUE is re-clamped after VALUE/MIN/MAX changes and
    /// the stepping record is rebuilt after MIN/MAX/RATE/MODE changes. PSU
    /// and command registers are handled on the next tick.
    pub fn bus_write(&mut self, address: u16, data: &[u8]) -> Result<(), StateError> {
        self.store.bus_write(address, data)?;

        let block_start = REG_CHNN_PARAM as usize;
        let block_end = block_start + PARAM_BLOCK_SIZE as usize;
        let start = (address as usize).max(block_start);
        let end = (address as usize + data.len()).min(block_end);

        let mut last = None;
        for addr in start..end {
            let Some(slot) = param_slot_at((addr - block_start) as u16) else {
                continue;
            };
            if last == Some(slot) {
                continue;
            }
            last = Some(slot);

            let (ch, param, target) = slot;
            if ch >= self.config.channels() {
                #[cfg(feature = "defmt")]
                defmt::warn!("bus write to inactive channel {}", ch);
                continue;
            }
            let (Some(param), Some(target)) = (Param::from_index(param), Target::from_index(target)) else {
                continue;
            };
            if target.affects_bounds() {
                parameter::clamp_value(&mut self.store, ch, param);
            }
            if target.affects_stepping() {
                self.steppers[ch][param.index()].recompute(&self.store, ch, param);
            }
        }

        self.signals.bus_write.raise();
        Ok(())
    }

    /// Read on behalf of the external controller. Any address is readable.
    pub fn bus_read(&self, address: u16, buffer: &mut [u8]) -> Result<(), StateError> {
        self.store.bus_read(address, buffer)
    }

    /// Re-validate registers after a completed bus write.
    fn apply_bus_write(&mut self) {
        let psu = self.store.get8(REG_PSU_ENABLE) != 0;
        if psu != self.psu_enabled {
            #[cfg(feature = "defmt")]
            defmt::info!("PSU {}", if psu { "on" } else { "off" });
            self.psu_enabled = psu;
            self.output.set_psu_enabled(psu);
        }
        self.store.set8(REG_PSU_STATE, psu as u8);

        let command = self.store.get8(REG_CMD);
        match command {
            CMD_NONE => return,
            CMD_EXECUTE => {
                let range = ActionRange::from_word(self.store.get16(REG_CMD_ARG));
                #[cfg(feature = "defmt")]
                defmt::debug!("cmd execute {}..{}", range.start, range.end);
                self.run_range(range);
            }
            CMD_PARAM_UPDATE_ALL => {
                #[cfg(feature = "defmt")]
                defmt::debug!("cmd param update all");
                self.recompute_all();
            }
            CMD_RESET_PHASES => {
                #[cfg(feature = "defmt")]
                defmt::debug!("cmd reset phases");
                for state in self.channels.iter_mut() {
                    state.reset();
                }
            }
            _other => {
                #[cfg(feature = "defmt")]
                defmt::warn!("unknown command {}", _other);
            }
        }
        self.store.set8(REG_CMD, CMD_NONE);
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Run the action at `index`.
    ///
    /// Errors leave the engine consistent: a failing action is skipped,
    /// EXECUTE nesting deeper than `max_action_depth` is cut off and
    /// running more than `action_budget` actions stops the call.
    pub fn execute(&mut self, index: usize) -> Result<(), ActionError> {
        let mut budget = self.config.action_budget;
        self.execute_at(index, 0, &mut budget)
    }

    /// Run every action in `[range.start, range.end)`, in order.
    ///
    /// A failing action does not stop the rest of the range; the first
    /// error is returned once the range is done.
    pub fn execute_range(&mut self, range: ActionRange) -> Result<(), ActionError> {
        let mut budget = self.config.action_budget;
        self.execute_range_at(range, 0, &mut budget)
    }

    fn run_range(&mut self, range: ActionRange) {
        if let Err(_e) = self.execute_range(range) {
            #[cfg(feature = "defmt")]
            defmt::warn!("actions {}..{} failed: {}", range.start, range.end, _e);
        }
    }

    fn execute_range_at(&mut self, range: ActionRange, depth: u8, budget: &mut u16) -> Result<(), ActionError> {
        let mut result = Ok(());
        for index in range.indices() {
            match self.execute_at(index, depth, budget) {
                Ok(()) => {}
                Err(ActionError::BudgetExhausted) => return Err(ActionError::BudgetExhausted),
                Err(e) => {
                    #[cfg(feature = "defmt")]
                    defmt::warn!("action {} skipped: {}", index, e);
                    result = result.and(Err(e));
                }
            }
        }
        result
    }

    fn execute_at(&mut self, index: usize, depth: u8, budget: &mut u16) -> Result<(), ActionError> {
        let action = read_action(&self.store, index)?;
        if *budget == 0 {
            return Err(ActionError::BudgetExhausted);
        }
        *budget -= 1;

        let count = self.config.channels();
        match action {
            Action::None => {}
            Action::Set { channels, param, target, value } => {
                for ch in masked(channels, count) {
                    self.write_target(ch, param, target, value);
                }
            }
            Action::Increment { channels, param, target, value } => {
                for ch in masked(channels, count) {
                    let current = parameter::get(&self.store, ch, param, target);
                    self.write_target(ch, param, target, current.saturating_add(value));
                }
            }
            Action::Decrement { channels, param, target, value } => {
                for ch in masked(channels, count) {
                    let current = parameter::get(&self.store, ch, param, target);
                    self.write_target(ch, param, target, current.saturating_sub(value));
                }
            }
            Action::Enable { channels } => {
                let en = self.store.get8(REG_CH_GEN_ENABLE);
                self.store.set8(REG_CH_GEN_ENABLE, en | channels);
            }
            Action::Disable { channels } => {
                let en = self.store.get8(REG_CH_GEN_ENABLE);
                self.store.set8(REG_CH_GEN_ENABLE, en & !channels);
            }
            Action::Toggle { channels } => {
                let en = self.store.get8(REG_CH_GEN_ENABLE);
                self.store.set8(REG_CH_GEN_ENABLE, en ^ channels);
            }
            Action::Execute { range } => {
                if depth >= self.config.max_action_depth {
                    return Err(ActionError::DepthExceeded);
                }
                self.execute_range_at(range, depth + 1, budget)?;
            }
            Action::ParamUpdate { channels, param } => {
                for ch in masked(channels, count) {
                    self.steppers[ch][param.index()].recompute(&self.store, ch, param);
                }
            }
        }
        Ok(())
    }

    /// Action writes clamp only when VALUE itself is written.
    fn write_target(&mut self, channel: usize, param: Param, target: Target, value: u16) {
        self.store.set16(parameter::address(channel, param, target), value);
        if target == Target::Value {
            parameter::clamp_value(&mut self.store, channel, param);
        }
    }

    // ── Control loop ─────────────────────────────────────────────────

    /// Run one control loop iteration.
    ///
    /// `trigger_lines` is read only when the trigger table is evaluated.
    pub fn tick<L: TriggerLines>(&mut self, now: u32, trigger_lines: &mut L) {
        if self.signals.bus_write.take() {
            self.apply_bus_write();
        }

        let fired = self.triggers.poll(
            &self.store,
            trigger_lines,
            now,
            self.config.trigger_interval_us,
            &self.signals.triggers,
        );
        for range in fired {
            self.run_range(range);
        }

        let slot_mask = self.sequencer.update(&self.store, now);

        for ch in 0..self.config.channels() {
            self.step_parameters(ch, now);

            let enabled = self.store.get8(REG_CH_GEN_ENABLE) & slot_mask;
            if enabled & (1 << ch) == 0 {
                self.channels[ch].reset();
                continue;
            }
            self.process_channel(ch, now);
        }
    }

    fn step_parameters(&mut self, channel: usize, now: u32) {
        for param in Param::ALL {
            let extreme = self.steppers[channel][param.index()].tick(&mut self.store, channel, param, now);
            if let Some(extreme) = extreme {
                self.on_extreme(extreme);
            }
        }
    }

    fn on_extreme(&mut self, extreme: Extreme) {
        if !extreme.actions.is_empty() {
            self.run_range(extreme.actions);
        }
        if extreme.notify {
            let address = reg_param_flags(extreme.channel);
            let flags = self.store.get16(address);
            self.store.set16(address, flags | extreme.param.flag_bit());
            self.notify.assert();
        }
    }

    fn process_channel(&mut self, ch: usize, now: u32) {
        let state = &mut self.channels[ch];
        state.timer.update(&self.store, ch, now);
        let Some(modifier) = state.timer.modifier(&self.store, ch, now) else {
            return;
        };

        let param_power = parameter::get(&self.store, ch, Param::Power, Target::Value);
        let level = self.store.get16(reg_power(ch));
        let power = effective_power(param_power, level, modifier);
        if power == 0 {
            return;
        }

        if !self.channel_usable(ch) {
            return;
        }

        if self.store.get8(reg_audio_src(ch)) != 0 {
            self.audio.process(ch, power, self.config.audio_min_pulse_period_us);
            return;
        }

        let interval = self.config.power_interval_us();
        let state = &mut self.channels[ch];
        let power_due = state
            .last_power_us
            .map_or(true, |last| now.wrapping_sub(last) > interval);
        if power_due {
            state.last_power_us = Some(now);
            self.output.set_power(ch, power);
        }

        if !time::due(now, state.next_pulse_us) {
            return;
        }
        let frequency = parameter::get(&self.store, ch, Param::Frequency, Target::Value);
        let width = parameter::get(&self.store, ch, Param::PulseWidth, Target::Value);
        if frequency == 0 || width == 0 {
            return;
        }
        state.next_pulse_us = Some(now.wrapping_add(PULSE_PERIOD_SCALE / frequency as u32));
        if !self.output.pulse(ch, width, width, now) {
            #[cfg(feature = "defmt")]
            defmt::warn!("pulse queue full, ch{} dropped", ch);
        }
    }

    // ── Low-level output ─────────────────────────────────────────────

    /// Emit one pulse immediately, bypassing the scheduler.
    pub fn pulse_now(&mut self, channel: usize, width_us: u16, now: u32) -> Result<bool, ParameterError> {
        self.check_channel(channel)?;
        Ok(self.output.pulse(channel, width_us, width_us, now))
    }

    /// Set output power immediately, bypassing the scheduler.
    pub fn set_power_now(&mut self, channel: usize, level: u16) -> Result<(), ParameterError> {
        self.check_channel(channel)?;
        self.output.set_power(channel, level.min(CHANNEL_POWER_MAX));
        Ok(())
    }
}

/// Channels below `count` selected by `mask`.
fn masked(mask: u8, count: usize) -> impl Iterator<Item = usize> {
    (0..count).filter(move |&ch| mask & (1 << ch) != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::write_action;
    use crate::output::{PowerCommand, QueuedOutput};
    use crate::parameter::{Mode, ModeWord};
    use crate::trigger::{Combinator, Trigger};

    #[derive(Default)]
    struct RecordingAudio {
        calls: std::vec::Vec<(usize, u16, u32)>,
    }

    impl AudioProcessor for RecordingAudio {
        fn process(&mut self, channel: usize, power_budget: u16, min_period_us: u32) {
            self.calls.push((channel, power_budget, min_period_us));
        }
    }

    #[derive(Default)]
    struct CountingNotify {
        asserted: usize,
    }

    impl NotifyLine for CountingNotify {
        fn assert(&mut self) {
            self.asserted += 1;
        }
    }

    type TestEngine<'s> = Engine<'s, QueuedOutput<64>, RecordingAudio, CountingNotify>;

    fn engine_with(signals: &Signals, config: EngineConfig) -> TestEngine<'_> {
        let mut output = QueuedOutput::new();
        output.set_ready_mask(0xFF);
        let mut engine = Engine::new(signals, config, output, RecordingAudio::default(), CountingNotify::default());
        for ch in 0..config.channels() {
            engine.set_channel_status(ch, ChannelStatus::Ready).unwrap();
        }
        engine
    }

    fn engine(signals: &Signals) -> TestEngine<'_> {
        engine_with(signals, EngineConfig::default())
    }

    /// Enable `ch` at full power with the given phase durations.
    fn run_channel(e: &mut TestEngine, ch: usize, on_ramp: u16, on: u16, off_ramp: u16, off: u16) {
        e.store_mut().set16(reg_power(ch), 1000);
        for (param, ms) in [
            (Param::OnRampTime, on_ramp),
            (Param::OnTime, on),
            (Param::OffRampTime, off_ramp),
            (Param::OffTime, off),
        ] {
            e.set_parameter(ch, param, Target::Value, ms).unwrap();
        }
        let en = e.store().get8(REG_CH_GEN_ENABLE);
        e.store_mut().set8(REG_CH_GEN_ENABLE, en | (1 << ch));
    }

    fn drain(e: &mut TestEngine) -> (usize, usize) {
        let mut pulses = 0;
        let mut power = 0;
        while e.output_mut().pop_pulse().is_some() {
            pulses += 1;
        }
        while e.output_mut().pop_power().is_some() {
            power += 1;
        }
        (pulses, power)
    }

    // ── Start-up ─────────────────────────────────────────────────────

    #[test]
    fn new_writes_identity_and_defaults() {
        let signals = Signals::new();
        let e: Engine<QueuedOutput<4>> = Engine::new(&signals, EngineConfig::default(), QueuedOutput::new(), (), ());
        assert_eq!(e.store().get16(REG_VERSION), SWX_VERSION);
        assert_eq!(e.store().get8(REG_CHANNEL_COUNT), 4);
        assert_eq!(e.store().get8(REG_CH_CAL_ENABLED), 0x0F);
        for ch in 0..4 {
            assert_eq!(e.get_parameter(ch, Param::Frequency, Target::Value), Ok(1800));
            assert_eq!(e.get_parameter(ch, Param::PulseWidth, Target::Max), Ok(500));
            assert_eq!(e.get_parameter(ch, Param::OffRampTime, Target::Max), Ok(5000));
            assert_eq!(e.channel_status(ch), ChannelStatus::Uncalibrated);
        }
        assert_eq!(
            e.get_parameter(4, Param::Power, Target::Value),
            Err(ParameterError::InvalidChannel)
        );
    }

    // ── Scheduler ────────────────────────────────────────────────────

    #[test]
    fn off_phase_emits_nothing() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 0, 0, 10, 0, 10);
        e.set_parameter(0, Param::Frequency, Target::Value, 5000).unwrap();

        let mut off_ticks = 0;
        let mut on_pulses = 0;
        for ms in 0..60u32 {
            e.tick(ms * 1000, &mut 0u8);
            let (pulses, power) = drain(&mut e);
            match e.phase(0) {
                Some(Phase::Off) => {
                    off_ticks += 1;
                    assert_eq!((pulses, power), (0, 0), "output during OFF at {} ms", ms);
                }
                Some(Phase::On) => on_pulses += pulses,
                _ => {}
            }
        }
        assert!(off_ticks >= 10);
        assert!(on_pulses > 0);
    }

    #[test]
    fn pulses_follow_frequency_and_width() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 1, 0, 10_000, 0, 0);
        // 1800 dHz -> 5555 µs between pulses.
        let mut times = std::vec::Vec::new();
        for t in (0..20_000u32).step_by(100) {
            e.tick(t, &mut 0u8);
            while let Some(p) = e.output_mut().pop_pulse() {
                assert_eq!((p.channel, p.pos_us, p.neg_us), (1, 150, 150));
                times.push(p.abs_time_us);
            }
        }
        assert_eq!(times, [0, 5600, 11200, 16800]);
    }

    #[test]
    fn zero_frequency_or_width_skips_pulses() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 0, 0, 10_000, 0, 0);
        e.set_parameter(0, Param::Frequency, Target::Value, 0).unwrap();
        e.tick(0, &mut 0u8);
        e.tick(1000, &mut 0u8);
        assert_eq!(e.output().pending_pulses(), 0);

        e.set_parameter(0, Param::Frequency, Target::Value, 100).unwrap();
        e.set_parameter(0, Param::PulseWidth, Target::Value, 0).unwrap();
        e.tick(2000, &mut 0u8);
        assert_eq!(e.output().pending_pulses(), 0);
    }

    #[test]
    fn power_updates_are_rate_limited() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 0, 0, 10_000, 0, 0);
        for t in [0, 100, 440, 441, 500, 881, 882] {
            e.tick(t, &mut 0u8);
        }
        let mut sent = std::vec::Vec::new();
        while let Some(cmd) = e.output_mut().pop_power() {
            sent.push(cmd);
        }
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], PowerCommand { channel: 0, level: 1000 });
    }

    #[test]
    fn ramp_scales_power() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 0, 100, 100, 0, 0);
        e.tick(0, &mut 0u8);
        drain(&mut e);
        e.tick(50_000, &mut 0u8);
        assert_eq!(e.phase(0), Some(Phase::OnRamp));
        assert_eq!(e.output_mut().pop_power(), Some(PowerCommand { channel: 0, level: 500 }));
    }

    #[test]
    fn unready_channels_stay_silent() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 0, 0, 10_000, 0, 0);
        run_channel(&mut e, 1, 0, 10_000, 0, 0);
        e.set_channel_status(0, ChannelStatus::Calibrating).unwrap();
        e.output_mut().set_ready(1, false);

        e.tick(0, &mut 0u8);
        e.tick(1000, &mut 0u8);
        assert_eq!(drain(&mut e), (0, 0));
    }

    #[test]
    fn audio_source_hands_channel_over() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 2, 0, 10_000, 0, 0);
        e.store_mut().set16(reg_power(2), 500);
        e.store_mut().set8(reg_audio_src(2), 1);

        e.tick(0, &mut 0u8);
        assert_eq!(drain(&mut e), (0, 0));
        assert_eq!(e.audio().calls, [(2, 500, 2000)]);
    }

    #[test]
    fn audio_stage_receives_configured_min_period() {
        let signals = Signals::new();
        let config = EngineConfig {
            audio_min_pulse_period_us: 5000,
            ..EngineConfig::default()
        };
        let mut e = engine_with(&signals, config);
        run_channel(&mut e, 0, 0, 10_000, 0, 0);
        e.store_mut().set8(reg_audio_src(0), 1);

        e.tick(0, &mut 0u8);
        assert_eq!(e.audio().calls, [(0, 1000, 5000)]);
    }

    #[test]
    fn zero_power_level_emits_nothing() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 0, 0, 10_000, 0, 0);
        e.store_mut().set16(reg_power(0), 0);
        e.tick(0, &mut 0u8);
        assert_eq!(drain(&mut e), (0, 0));
    }

    #[test]
    fn sequencer_disable_restarts_the_cycle() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 0, 5, 100, 5, 100);
        e.store_mut().set16(REG_SEQ_PERIOD, 20);
        e.store_mut().set8(REG_SEQ_COUNT, 2);
        e.store_mut().set8(reg_seq_mask(0), 0b0001);
        e.store_mut().set8(reg_seq_mask(1), 0b0000);

        for ms in 0..20u32 {
            e.tick(ms * 1000, &mut 0u8);
        }
        assert_eq!(e.phase(0), Some(Phase::On));

        e.tick(20_000, &mut 0u8);
        let timer = e.phase_timer(0).copied().unwrap();
        assert_eq!(timer.phase(), Phase::OnRamp);
        assert!(!timer.is_armed());

        // Back on at 40 ms: a full ON_RAMP before ON.
        for ms in 40..45u32 {
            e.tick(ms * 1000, &mut 0u8);
            assert_eq!(e.phase(0), Some(Phase::OnRamp));
        }
        e.tick(45_000, &mut 0u8);
        assert_eq!(e.phase(0), Some(Phase::On));
    }

    #[test]
    fn clearing_enable_resets_phase() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 3, 1, 100, 1, 1);
        e.tick(0, &mut 0u8);
        e.tick(1000, &mut 0u8);
        assert_eq!(e.phase(3), Some(Phase::On));

        e.store_mut().set8(REG_CH_GEN_ENABLE, 0);
        e.tick(2000, &mut 0u8);
        assert_eq!(e.phase(3), Some(Phase::OnRamp));
        assert!(!e.phase_timer(3).unwrap().is_armed());
    }

    // ── Actions ──────────────────────────────────────────────────────

    #[test]
    fn empty_range_executes_nothing() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        let set = Action::Set { channels: 1, param: Param::Power, target: Target::Value, value: 10 };
        write_action(e.store_mut(), 3, &set).unwrap();

        assert_eq!(e.execute_range(ActionRange::new(3, 3)), Ok(()));
        assert_eq!(e.get_parameter(0, Param::Power, Target::Value), Ok(1000));

        assert_eq!(e.execute_range(ActionRange::new(3, 4)), Ok(()));
        assert_eq!(e.get_parameter(0, Param::Power, Target::Value), Ok(10));
    }

    #[test]
    fn set_clamps_only_value() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        let actions = [
            Action::Set { channels: 0b0011, param: Param::Power, target: Target::Value, value: 5000 },
            Action::Set { channels: 0b0001, param: Param::Power, target: Target::Max, value: 200 },
        ];
        for (i, a) in actions.iter().enumerate() {
            write_action(e.store_mut(), i, a).unwrap();
        }

        e.execute(0).unwrap();
        assert_eq!(e.get_parameter(0, Param::Power, Target::Value), Ok(1000));
        assert_eq!(e.get_parameter(1, Param::Power, Target::Value), Ok(1000));
        assert_eq!(e.get_parameter(2, Param::Power, Target::Value), Ok(1000));

        e.execute(1).unwrap();
        assert_eq!(e.get_parameter(0, Param::Power, Target::Max), Ok(200));
        assert_eq!(e.get_parameter(0, Param::Power, Target::Value), Ok(1000));
    }

    #[test]
    fn increment_and_decrement_saturate_then_clamp() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        let inc = Action::Increment { channels: 1, param: Param::PulseWidth, target: Target::Value, value: 300 };
        let dec = Action::Decrement { channels: 1, param: Param::PulseWidth, target: Target::Value, value: 1000 };
        write_action(e.store_mut(), 0, &inc).unwrap();
        write_action(e.store_mut(), 1, &dec).unwrap();

        e.execute(0).unwrap();
        assert_eq!(e.get_parameter(0, Param::PulseWidth, Target::Value), Ok(450));
        e.execute(0).unwrap();
        assert_eq!(e.get_parameter(0, Param::PulseWidth, Target::Value), Ok(500));
        e.execute(1).unwrap();
        assert_eq!(e.get_parameter(0, Param::PulseWidth, Target::Value), Ok(0));
    }

    #[test]
    fn enable_disable_toggle() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        write_action(e.store_mut(), 0, &Action::Enable { channels: 0b0011 }).unwrap();
        write_action(e.store_mut(), 1, &Action::Disable { channels: 0b0001 }).unwrap();
        write_action(e.store_mut(), 2, &Action::Toggle { channels: 0b0110 }).unwrap();

        e.execute(0).unwrap();
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0b0011);
        e.execute(1).unwrap();
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0b0010);
        e.execute(2).unwrap();
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0b0100);
    }

    #[test]
    fn param_update_recomputes_masked_channels() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        for ch in 0..2 {
            e.set_parameter(ch, Param::Frequency, Target::Min, 0).unwrap();
            e.set_parameter(ch, Param::Frequency, Target::Rate, 1000).unwrap();
            e.set_parameter(ch, Param::Frequency, Target::Mode, Mode::UpDown as u16).unwrap();
        }
        write_action(e.store_mut(), 0, &Action::ParamUpdate { channels: 0b0010, param: Param::Frequency }).unwrap();
        e.execute(0).unwrap();

        assert!(!e.stepper(0, Param::Frequency).unwrap().is_active());
        assert!(e.stepper(1, Param::Frequency).unwrap().is_active());
    }

    #[test]
    fn nested_execute_runs_inner_range() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        write_action(e.store_mut(), 0, &Action::Execute { range: ActionRange::new(10, 12) }).unwrap();
        write_action(e.store_mut(), 10, &Action::Enable { channels: 0b0001 }).unwrap();
        write_action(e.store_mut(), 11, &Action::Enable { channels: 0b1000 }).unwrap();

        e.execute(0).unwrap();
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0b1001);
    }

    #[test]
    fn self_referencing_execute_is_cut_off() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        write_action(e.store_mut(), 0, &Action::Toggle { channels: 1 }).unwrap();
        write_action(e.store_mut(), 1, &Action::Execute { range: ActionRange::new(0, 2) }).unwrap();

        assert_eq!(e.execute(1), Err(ActionError::DepthExceeded));
        // One toggle per level below the limit: 8 toggles leave bit 0 clear.
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0);
    }

    #[test]
    fn fan_out_is_bounded_by_budget() {
        let signals = Signals::new();
        let config = EngineConfig { action_budget: 100, ..EngineConfig::default() };
        let mut e = engine_with(&signals, config);
        let fork = Action::Execute { range: ActionRange::new(0, 2) };
        write_action(e.store_mut(), 0, &fork).unwrap();
        write_action(e.store_mut(), 1, &fork).unwrap();

        assert_eq!(e.execute(0), Err(ActionError::BudgetExhausted));
    }

    #[test]
    fn bad_records_are_skipped_without_stopping_the_range() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        e.store_mut().set8(reg_action(0), 42);
        write_action(e.store_mut(), 1, &Action::Enable { channels: 0b0100 }).unwrap();

        assert_eq!(e.execute_range(ActionRange::new(0, 2)), Err(ActionError::UnknownType(42)));
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0b0100);
        assert_eq!(e.execute(MAX_ACTIONS), Err(ActionError::IndexOutOfRange));
    }

    // ── Stepping in the loop ─────────────────────────────────────────

    #[test]
    fn extreme_runs_actions_and_notifies() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        write_action(e.store_mut(), 7, &Action::Toggle { channels: 0b0100 }).unwrap();

        let p = Param::PulseWidth;
        e.set_parameter(1, p, Target::Max, 10).unwrap();
        e.set_parameter(1, p, Target::Value, 9).unwrap();
        e.set_parameter(1, p, Target::Rate, 1000).unwrap();
        e.set_parameter(1, p, Target::ActionRange, ActionRange::new(7, 8).to_word()).unwrap();
        e.set_parameter(1, p, Target::Mode, ModeWord::new(Mode::UpReset, true).0).unwrap();
        e.recompute_stepping(1, p).unwrap();

        e.tick(0, &mut 0u8);
        assert_eq!(e.get_parameter(1, p, Target::Value), Ok(0));
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0b0100);
        assert_eq!(e.store().get16(reg_param_flags(1)), p.flag_bit());
        assert_eq!(e.notify_line().asserted, 1);

        // Controller clears the flags with a plain write.
        e.bus_write(reg_param_flags(1), &[0, 0]).unwrap();
        assert_eq!(e.store().get16(reg_param_flags(1)), 0);
    }

    #[test]
    fn stepping_runs_on_disabled_channels() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        let p = Param::Power;
        e.set_parameter(0, p, Target::Value, 0).unwrap();
        e.set_parameter(0, p, Target::Rate, 1000).unwrap();
        e.set_parameter(0, p, Target::Mode, Mode::UpDown as u16).unwrap();
        e.recompute_stepping(0, p).unwrap();

        e.tick(0, &mut 0u8);
        e.tick(1000, &mut 0u8);
        assert_eq!(e.get_parameter(0, p, Target::Value), Ok(2));
    }

    // ── Bus & commands ───────────────────────────────────────────────

    #[test]
    fn bus_write_respects_read_only_boundary() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        assert_eq!(e.bus_write(REG_VERSION, &[9, 9]), Err(StateError::ReadOnly));
        assert_eq!(e.store().get16(REG_VERSION), SWX_VERSION);
        assert!(!signals.bus_write.is_raised());

        e.bus_write(REG_CH_GEN_ENABLE, &[0b1111]).unwrap();
        assert!(signals.bus_write.is_raised());

        let mut buf = [0u8; 1];
        e.bus_read(REG_CHANNEL_COUNT, &mut buf).unwrap();
        assert_eq!(buf, [4]);
    }

    #[test]
    fn bus_parameter_writes_clamp_and_recompute() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        let value = parameter::address(2, Param::Power, Target::Value);
        e.bus_write(value, &5000u16.to_le_bytes()).unwrap();
        assert_eq!(e.get_parameter(2, Param::Power, Target::Value), Ok(1000));

        // RATE and MODE in one transaction.
        let rate = parameter::address(2, Param::Power, Target::Rate);
        let mut frame = [0u8; 4];
        frame[..2].copy_from_slice(&1000u16.to_le_bytes());
        frame[2..].copy_from_slice(&(Mode::DownUp as u16).to_le_bytes());
        e.bus_write(rate, &frame).unwrap();
        assert_eq!(e.stepper(2, Param::Power).unwrap().step(), -1);
    }

    #[test]
    fn psu_enable_is_mirrored_after_bus_write() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        e.bus_write(REG_PSU_ENABLE, &[1]).unwrap();
        assert!(!e.output().psu_enabled());

        e.tick(0, &mut 0u8);
        assert!(e.output().psu_enabled());
        assert_eq!(e.store().get8(REG_PSU_STATE), 1);

        e.bus_write(REG_PSU_ENABLE, &[0]).unwrap();
        e.tick(1, &mut 0u8);
        assert!(!e.output().psu_enabled());
        assert_eq!(e.store().get8(REG_PSU_STATE), 0);
    }

    #[test]
    fn command_register_executes_and_clears() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        write_action(e.store_mut(), 20, &Action::Enable { channels: 0b0010 }).unwrap();

        e.bus_write(REG_CMD_ARG, &ActionRange::new(20, 21).to_word().to_le_bytes()).unwrap();
        e.bus_write(REG_CMD, &[CMD_EXECUTE]).unwrap();
        e.tick(0, &mut 0u8);

        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0b0010);
        assert_eq!(e.store().get8(REG_CMD), CMD_NONE);
    }

    #[test]
    fn command_param_update_all_and_reset_phases() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        run_channel(&mut e, 0, 1, 100, 1, 1);
        e.set_parameter(3, Param::OnTime, Target::Rate, 500).unwrap();
        e.set_parameter(3, Param::OnTime, Target::Mode, Mode::UpReset as u16).unwrap();
        e.tick(0, &mut 0u8);
        e.tick(1000, &mut 0u8);
        assert_eq!(e.phase(0), Some(Phase::On));
        assert!(!e.stepper(3, Param::OnTime).unwrap().is_active());

        e.bus_write(REG_CMD, &[CMD_PARAM_UPDATE_ALL]).unwrap();
        e.tick(2000, &mut 0u8);
        assert!(e.stepper(3, Param::OnTime).unwrap().is_active());

        e.bus_write(REG_CMD, &[CMD_RESET_PHASES]).unwrap();
        e.tick(3000, &mut 0u8);
        // Reset then re-armed in the same tick.
        assert_eq!(e.phase(0), Some(Phase::OnRamp));
    }

    #[test]
    fn unknown_command_is_dropped() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        e.bus_write(REG_CMD, &[0x77]).unwrap();
        e.tick(0, &mut 0u8);
        assert_eq!(e.store().get8(REG_CMD), CMD_NONE);
    }

    // ── Triggers ─────────────────────────────────────────────────────

    #[test]
    fn trigger_edge_runs_action_range() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        write_action(e.store_mut(), 0, &Action::Toggle { channels: 0b0001 }).unwrap();
        Trigger {
            input_mask: 0b0001,
            invert_mask: 0,
            combinator: Some(Combinator::OrOrOr),
            output_invert: false,
            actions: ActionRange::new(0, 1),
        }
        .store(e.store_mut(), 0);

        // No edge interrupt yet: lines are not looked at.
        e.tick(0, &mut 0b0001u8);
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0);

        signals.triggers.raise();
        e.tick(1000, &mut 0b0001u8);
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 1);

        // Sustained high does not fire again.
        signals.triggers.raise();
        e.tick(60_000, &mut 0b0001u8);
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 1);

        signals.triggers.raise();
        e.tick(120_000, &mut 0u8);
        signals.triggers.raise();
        e.tick(180_000, &mut 0b0001u8);
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0);
    }

    /// Lines whose level changes, with its edge interrupt, right after
    /// each sample.
    struct EdgeAfterSample<'a> {
        level: u8,
        next: Option<u8>,
        signals: &'a Signals,
    }

    impl TriggerLines for EdgeAfterSample<'_> {
        fn read(&mut self) -> u8 {
            let sampled = self.level;
            if let Some(next) = self.next.take() {
                self.level = next;
                self.signals.triggers.raise();
            }
            sampled
        }
    }

    #[test]
    fn edge_racing_the_sample_is_not_lost() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        write_action(e.store_mut(), 0, &Action::Enable { channels: 0b0001 }).unwrap();
        Trigger {
            input_mask: 0b0001,
            invert_mask: 0,
            combinator: Some(Combinator::OrOrOr),
            output_invert: false,
            actions: ActionRange::new(0, 1),
        }
        .store(e.store_mut(), 0);

        let mut lines = EdgeAfterSample {
            level: 0,
            next: Some(1),
            signals: &signals,
        };
        signals.triggers.raise();
        e.tick(0, &mut lines);
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 0);
        assert!(signals.triggers.is_raised());

        // The line stays high; the re-raised flag gets it evaluated.
        e.tick(60_000, &mut lines);
        assert_eq!(e.store().get8(REG_CH_GEN_ENABLE), 1);
    }

    // ── Low-level output ─────────────────────────────────────────────

    #[test]
    fn low_level_output_bypasses_scheduler() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        assert_eq!(e.pulse_now(1, 80, 1234), Ok(true));
        e.set_power_now(1, 9999).unwrap();
        assert_eq!(e.pulse_now(9, 80, 0), Err(ParameterError::InvalidChannel));

        let pulse = e.output_mut().pop_pulse().unwrap();
        assert_eq!((pulse.channel, pulse.pos_us, pulse.abs_time_us), (1, 80, 1234));
        assert_eq!(e.output_mut().pop_power(), Some(PowerCommand { channel: 1, level: 1000 }));
    }

    #[test]
    fn calibration_hook_writes_read_only_region() {
        let signals = Signals::new();
        let mut e = engine(&signals);
        e.set_calibration(2, 0x0321).unwrap();
        assert_eq!(e.store().get16(reg_cal_value(2)), 0x0321);
        assert_eq!(e.channel_status(2), ChannelStatus::Ready);
        assert_eq!(e.channel_status(7), ChannelStatus::Invalid);
    }
}
