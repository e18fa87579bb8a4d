use crate::registers::{reg_seq_mask, MAX_SEQ, REG_SEQ_COUNT, REG_SEQ_PERIOD};
use crate::state::StateStore;
use crate::time;

/// Mask returned while the sequencer is off.
pub const ALL_CHANNELS: u8 = 0xFF;

/// Time-multiplexes channel enablement through the SEQ_MASKS table.
///
/// With a zero period or an empty table every channel is allowed. Otherwise
/// the current slot's mask is returned and the slot advances every
/// `SEQ_PERIOD` milliseconds, wrapping after `SEQ_COUNT` slots.
#[derive(Debug, Default)]
pub struct MacroSequencer {
    slot: usize,
    next_step_us: Option<u32>,
}

impl MacroSequencer {
    pub const fn new() -> Self {
        Self {
            slot: 0,
            next_step_us: None,
        }
    }

    /// Index of the active slot.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Advance if due and return the active channel mask.
    pub fn update(&mut self, store: &StateStore, now: u32) -> u8 {
        let period_ms = store.get16(REG_SEQ_PERIOD);
        let count = (store.get8(REG_SEQ_COUNT) as usize).min(MAX_SEQ);
        if period_ms == 0 || count == 0 {
            self.slot = 0;
            self.next_step_us = None;
            return ALL_CHANNELS;
        }

        let period_us = period_ms as u32 * 1000;
        match self.next_step_us {
            None => self.next_step_us = Some(now.wrapping_add(period_us)),
            Some(deadline) if time::reached(now, deadline) => {
                self.slot += 1;
                self.next_step_us = Some(now.wrapping_add(period_us));
            }
            Some(_) => {}
        }
        if self.slot >= count {
            self.slot = 0;
        }

        store.get8(reg_seq_mask(self.slot))
    }
}
