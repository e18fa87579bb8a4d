//! Pulse generation and parameter engine for the swx multi-channel
//! electro-pulse stimulator.
//!
//! The external controller drives the device by writing registers in a
//! byte-addressed [`StateStore`]. Every loop iteration the [`Engine`]
//! turns those registers into timed, ramped pulse output:
//!
//! - [`parameter`]: per-channel parameters that cycle between MIN and MAX.
//! - [`waveform`]: the ON_RAMP / ON / OFF_RAMP / OFF phase scheduler and
//!   the macro sequencer that multiplexes channel enablement.
//! - [`action`]: small commands (set, increment, enable, ...) addressed by
//!   index and run in ranges.
//! - [`trigger`]: digital inputs combined into conditions that fire action
//!   ranges on a rising result.
//!
//! Hardware stays behind the traits in [`output`].
//!
//! # Quick Start
//!
//! ```
//! use swx::{ChannelStatus, Engine, EngineConfig, QueuedOutput, Signals};
//! use swx::registers::{reg_power, REG_CH_GEN_ENABLE};
//!
//! let signals = Signals::new();
//! let mut output: QueuedOutput<16> = QueuedOutput::new();
//! output.set_ready(0, true);
//!
//! let mut engine = Engine::new(&signals, EngineConfig::default(), output, (), ());
//! engine.set_channel_status(0, ChannelStatus::Ready).unwrap();
//!
//! // What the controller would do over the bus.
//! engine.bus_write(reg_power(0), &1000u16.to_le_bytes()).unwrap();
//! engine.bus_write(REG_CH_GEN_ENABLE, &[0b0001]).unwrap();
//!
//! engine.tick(0, &mut 0u8);
//! let pulse = engine.output_mut().pop_pulse().unwrap();
//! assert_eq!(pulse.pos_us, 150);
//! ```
//!
//! # Crate Features
//!
//! - **`defmt`**: structured logging via [`defmt`](https://docs.rs/defmt).
//! - **`task`**: Embassy control-loop and trigger-edge tasks in [`task`].

#![cfg_attr(not(test), no_std)]

pub mod action;
pub mod config;
pub mod engine;
pub mod output;
pub mod parameter;
pub mod registers;
pub mod state;
#[cfg(feature = "task")]
pub mod task;
pub mod time;
pub mod trigger;
pub mod waveform;

// ── Re-exports for convenience ───────────────────────────────────────────

pub use action::{Action, ActionError, ActionRange};
pub use config::EngineConfig;
pub use engine::Engine;
pub use output::{AudioProcessor, NotifyLine, Output, QueuedOutput, TriggerLines};
pub use parameter::{Mode, ModeWord, Param, ParameterError, Target};
pub use registers::ChannelStatus;
pub use state::{DirtyFlag, Signals, StateError, StateStore};
#[cfg(feature = "task")]
pub use task::{control_loop_task, trigger_edge_task, SharedEngine};
pub use trigger::{Combinator, Trigger};
pub use waveform::Phase;
