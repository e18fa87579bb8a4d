//! Register map for the swx state store.
//!
//! The store is a flat byte array split at [`READ_ONLY_BOUNDARY`]:
//! - Below the boundary: identity, calibration and status, written only by
//!   the engine and its calibration collaborator.
//! - At or above the boundary: live parameters, commands and the
//!   action/trigger/sequence tables, writable by the external controller.
//!
//! 16-bit fields occupy two consecutive bytes, low byte first. Per-channel
//! fields are laid out as `BASE + channel * width`.

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Version reported in [`REG_VERSION`].
pub const SWX_VERSION: u16 = 1;

/// Number of channel slots compiled into the engine.
pub const MAX_CHANNELS: usize = 4;

/// Total size of the addressable state store in bytes.
pub const STATE_MEM_SIZE: usize = 2048;

/// First externally writable address. Bus writes below this are rejected.
pub const READ_ONLY_BOUNDARY: u16 = 32;

/// Upper bound for channel power levels and the POWER parameter.
pub const CHANNEL_POWER_MAX: u16 = 1000;

// ---------------------------------------------------------------------------
// Read-only region
// ---------------------------------------------------------------------------

/// Firmware version (u16).
pub const REG_VERSION: u16 = 0;

/// Number of active channels (u8).
pub const REG_CHANNEL_COUNT: u16 = 2;

/// Bitmask of channels subject to calibration (u8).
pub const REG_CH_CAL_ENABLED: u16 = 3;

/// Per-channel calibration value (u16 × [`MAX_CHANNELS`]).
pub const REG_CHNN_CAL_VALUE: u16 = 8;

/// Per-channel [`ChannelStatus`] (u8 × [`MAX_CHANNELS`]).
///
/// Shares address 15 with the high byte of the last channel's calibration
/// value. Controllers depend on this address, so the overlap stays.
pub const REG_CHN_STATUS: u16 = 15;

/// Current PSU state as applied by the engine (u8, 0/1).
pub const REG_PSU_STATE: u16 = 19;

// ---------------------------------------------------------------------------
// Writable region
// ---------------------------------------------------------------------------

/// Requested PSU state (u8, non-zero = on).
pub const REG_PSU_ENABLE: u16 = 32;

/// Global channel enable bitmask (u8, bit n = channel n).
pub const REG_CH_GEN_ENABLE: u16 = 33;

/// Per-channel power level, 0..=1000 (u16 × [`MAX_CHANNELS`]).
pub const REG_CHNN_POWER: u16 = 34;

/// Per-channel audio source. Non-zero hands the channel to the audio
/// collaborator (u8 × [`MAX_CHANNELS`]).
pub const REG_CHN_AUDIO_SRC: u16 = 42;

/// Command register (u8). Cleared by the engine once handled.
pub const REG_CMD: u16 = 46;

/// Command argument (u16).
pub const REG_CMD_ARG: u16 = 47;

/// Per-channel parameter notify flags, bit n = parameter n
/// (u16 × [`MAX_CHANNELS`]).
pub const REG_CHNN_PARAM_FLAGS: u16 = 50;

/// Macro sequencer slot period in milliseconds (u16).
pub const REG_SEQ_PERIOD: u16 = 58;

/// Number of used macro sequencer slots (u8).
pub const REG_SEQ_COUNT: u16 = 60;

/// Macro sequencer channel masks (u8 × [`MAX_SEQ`]).
pub const REG_SEQ_MASKS: u16 = 61;

/// Trigger table base address.
pub const REG_TRIGGERS: u16 = 72;

/// Channel parameter block base address. See [`param_target_index`].
pub const REG_CHNN_PARAM: u16 = 152;

/// Action table base address.
pub const REG_ACTIONS: u16 = 592;

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Maximum number of macro sequencer slots.
pub const MAX_SEQ: usize = 8;

/// Number of trigger slots.
pub const MAX_TRIGGERS: usize = 8;

/// Bytes per trigger record: input, output, action range (u16).
pub const TRIGGER_SIZE: u16 = 4;

/// Offset of the input select byte within a trigger record.
pub const TRIG_INPUT: u16 = 0;

/// Offset of the output operation byte within a trigger record.
pub const TRIG_OUTPUT: u16 = 1;

/// Offset of the action range word within a trigger record.
pub const TRIG_ACTION: u16 = 2;

/// Number of action slots (indices `0..=254`).
pub const MAX_ACTIONS: usize = 255;

/// Bytes per action record: type, channel mask, param/target, value (u16).
pub const ACTION_SIZE: u16 = 5;

// ---------------------------------------------------------------------------
// Commands (REG_CMD)
// ---------------------------------------------------------------------------

/// No pending command.
pub const CMD_NONE: u8 = 0;

/// Execute the action range held in [`REG_CMD_ARG`].
pub const CMD_EXECUTE: u8 = 1;

/// Recompute stepping records for every channel and parameter.
pub const CMD_PARAM_UPDATE_ALL: u8 = 2;

/// Restart every channel's waveform at its first phase.
pub const CMD_RESET_PHASES: u8 = 3;

// ---------------------------------------------------------------------------
// Parameter addressing
// ---------------------------------------------------------------------------

/// Number of parameter kinds per channel, including the reserved ones.
pub const PARAM_COUNT: usize = 9;

/// Number of 16-bit target slots per parameter.
pub const TARGET_COUNT: usize = 6;

/// Byte offset of a (param, target) slot inside one channel's block.
pub const fn param_target_offset(param: usize, target: usize) -> u16 {
    ((param * 2 * TARGET_COUNT) + (target * 2)) as u16
}

/// Size of one channel's parameter block: the highest offset plus one slot.
pub const PARAM_BLOCK_PER_CHANNEL: u16 = param_target_offset(PARAM_COUNT - 1, TARGET_COUNT - 1) + 2;

/// Byte offset of a (channel, param, target) slot relative to [`REG_CHNN_PARAM`].
///
/// The trailing `channel * 2` term is part of the wire layout that existing
/// controllers were built against and must stay.
pub const fn param_target_index(channel: usize, param: usize, target: usize) -> u16 {
    (channel as u16 * PARAM_BLOCK_PER_CHANNEL) + param_target_offset(param, target) + (channel as u16 * 2)
}

/// Distance between the first slot of consecutive channels.
const PARAM_CHANNEL_STRIDE: u16 = PARAM_BLOCK_PER_CHANNEL + 2;

/// Total bytes used by the parameter blocks of all channels.
pub const PARAM_BLOCK_SIZE: u16 = param_target_index(MAX_CHANNELS - 1, PARAM_COUNT - 1, TARGET_COUNT - 1) + 2;

/// Inverse of [`param_target_index`]: maps a byte offset relative to
/// [`REG_CHNN_PARAM`] back to `(channel, param, target)`.
///
/// Returns `None` for offsets outside the block or inside the padding
/// between channels. Odd offsets resolve to the slot they belong to.
pub fn param_slot_at(offset: u16) -> Option<(usize, usize, usize)> {
    if offset >= PARAM_BLOCK_SIZE {
        return None;
    }
    let channel = (offset / PARAM_CHANNEL_STRIDE) as usize;
    let within = offset % PARAM_CHANNEL_STRIDE;
    if within >= PARAM_BLOCK_PER_CHANNEL || channel >= MAX_CHANNELS {
        return None;
    }
    let param = within as usize / (2 * TARGET_COUNT);
    let target = (within as usize % (2 * TARGET_COUNT)) / 2;
    Some((channel, param, target))
}

// ---------------------------------------------------------------------------
// Per-channel / per-slot addresses
// ---------------------------------------------------------------------------

/// Address of a channel's calibration value.
pub const fn reg_cal_value(channel: usize) -> u16 {
    REG_CHNN_CAL_VALUE + (channel as u16 * 2)
}

/// Address of a channel's status byte.
pub const fn reg_status(channel: usize) -> u16 {
    REG_CHN_STATUS + channel as u16
}

/// Address of a channel's power level.
pub const fn reg_power(channel: usize) -> u16 {
    REG_CHNN_POWER + (channel as u16 * 2)
}

/// Address of a channel's audio source byte.
pub const fn reg_audio_src(channel: usize) -> u16 {
    REG_CHN_AUDIO_SRC + channel as u16
}

/// Address of a channel's parameter notify flags.
pub const fn reg_param_flags(channel: usize) -> u16 {
    REG_CHNN_PARAM_FLAGS + (channel as u16 * 2)
}

/// Address of a macro sequencer slot mask.
pub const fn reg_seq_mask(slot: usize) -> u16 {
    REG_SEQ_MASKS + slot as u16
}

/// Address of a trigger record.
pub const fn reg_trigger(index: usize) -> u16 {
    REG_TRIGGERS + (index as u16 * TRIGGER_SIZE)
}

/// Address of an action record.
pub const fn reg_action(index: usize) -> u16 {
    REG_ACTIONS + (index as u16 * ACTION_SIZE)
}

// Layout sanity: tables must not overlap each other or run off the store.
const _: () = assert!(REG_CHNN_PARAM_FLAGS + (MAX_CHANNELS as u16 * 2) <= REG_SEQ_PERIOD);
const _: () = assert!(REG_SEQ_MASKS + MAX_SEQ as u16 <= REG_TRIGGERS);
const _: () = assert!(REG_TRIGGERS + (MAX_TRIGGERS as u16 * TRIGGER_SIZE) <= REG_CHNN_PARAM);
const _: () = assert!(REG_CHNN_PARAM + PARAM_BLOCK_SIZE <= REG_ACTIONS);
const _: () = assert!(REG_ACTIONS as usize + MAX_ACTIONS * ACTION_SIZE as usize <= STATE_MEM_SIZE);
const _: () = assert!(REG_PSU_STATE < READ_ONLY_BOUNDARY);

// ---------------------------------------------------------------------------
// Channel status
// ---------------------------------------------------------------------------

/// Channel status as published in [`REG_CHN_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ChannelStatus {
    Invalid = 0,
    Fault,
    Uncalibrated,
    Calibrating,
    Ready,
}

impl ChannelStatus {
    /// Decode a raw status byte. Unknown values read as `Invalid`.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ChannelStatus::Fault,
            2 => ChannelStatus::Uncalibrated,
            3 => ChannelStatus::Calibrating,
            4 => ChannelStatus::Ready,
            _ => ChannelStatus::Invalid,
        }
    }
}
