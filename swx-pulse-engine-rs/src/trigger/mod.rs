//! Digital trigger inputs mapped to action ranges.
//!
//! Each trigger record is [`TRIGGER_SIZE`] bytes:
//!
//! ```text
//! byte 0   input mask << 4 | invert mask
//! byte 1   combinator << 4 | output invert (any non-zero nibble inverts)
//! byte 2-3 action range word
//! ```
//!
//! Up to four input lines are sampled as a bit field, t1 in bit 0. Lines
//! outside the input mask read as zero, then the invert mask is applied and
//! the record's [`Combinator`] reduces the four bits to one result. The
//! action range fires only when that result goes from false to true.

use heapless::Vec;

use crate::action::ActionRange;
use crate::output::TriggerLines;
use crate::registers::{reg_trigger, MAX_TRIGGERS, TRIGGER_SIZE, TRIG_ACTION, TRIG_INPUT, TRIG_OUTPUT};
use crate::state::{DirtyFlag, StateStore};
use crate::time;

/// Combinator nibble that disables a trigger slot.
pub const COMBINATOR_DISABLED: u8 = 0x0F;

/// Boolean reduction over inputs t1..t4. AND binds tighter than OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Combinator {
    /// `t1 || t2 || t3 || t4`
    OrOrOr = 0,
    /// `t1 || t2 || t3 && t4`
    OrOrAnd,
    /// `t1 || t2 && t3 || t4`
    OrAndOr,
    /// `t1 || t2 && t3 && t4`
    OrAndAnd,
    /// `t1 && t2 || t3 || t4`
    AndOrOr,
    /// `t1 && t2 || t3 && t4`
    AndOrAnd,
    /// `t1 && t2 && t3 || t4`
    AndAndOr,
    /// `t1 && t2 && t3 && t4`
    AndAndAnd,
}

impl Combinator {
    pub const ALL: [Combinator; 8] = [
        Combinator::OrOrOr,
        Combinator::OrOrAnd,
        Combinator::OrAndOr,
        Combinator::OrAndAnd,
        Combinator::AndOrOr,
        Combinator::AndOrAnd,
        Combinator::AndAndOr,
        Combinator::AndAndAnd,
    ];

    /// Decode the high nibble of the output byte. Unassigned codes,
    /// [`COMBINATOR_DISABLED`] included, read as `None`.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        Self::ALL.get(nibble as usize).copied()
    }

    /// Reduce a 4-bit input state.
    pub fn apply(self, s: u8) -> bool {
        match self {
            Combinator::OrOrOr => s & 0b1111 != 0,
            Combinator::OrOrAnd => s & 0b0011 != 0 || s & 0b1100 == 0b1100,
            Combinator::OrAndOr => s & 0b1001 != 0 || s & 0b0110 == 0b0110,
            Combinator::OrAndAnd => s & 0b0001 != 0 || s & 0b1110 == 0b1110,
            Combinator::AndOrOr => s & 0b1100 != 0 || s & 0b0011 == 0b0011,
            Combinator::AndOrAnd => s & 0b1100 == 0b1100 || s & 0b0011 == 0b0011,
            Combinator::AndAndOr => s & 0b1000 != 0 || s & 0b0111 == 0b0111,
            Combinator::AndAndAnd => s & 0b1111 == 0b1111,
        }
    }
}

/// A decoded trigger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Trigger {
    pub input_mask: u8,
    pub invert_mask: u8,
    /// `None` when the slot is disabled.
    pub combinator: Option<Combinator>,
    pub output_invert: bool,
    pub actions: ActionRange,
}

impl Trigger {
    pub fn decode(raw: &[u8; TRIGGER_SIZE as usize]) -> Self {
        let input = raw[TRIG_INPUT as usize];
        let output = raw[TRIG_OUTPUT as usize];
        let action = TRIG_ACTION as usize;
        Self {
            input_mask: input >> 4,
            invert_mask: input & 0x0F,
            combinator: Combinator::from_nibble(output >> 4),
            output_invert: output & 0x0F != 0,
            actions: ActionRange::from_word(u16::from_le_bytes([raw[action], raw[action + 1]])),
        }
    }

    pub fn encode(&self) -> [u8; TRIGGER_SIZE as usize] {
        let op = self.combinator.map_or(COMBINATOR_DISABLED, |c| c as u8);
        let [lo, hi] = self.actions.to_word().to_le_bytes();
        [
            (self.input_mask << 4) | (self.invert_mask & 0x0F),
            (op << 4) | self.output_invert as u8,
            lo,
            hi,
        ]
    }

    /// Read the record in slot `index`.
    pub fn load(store: &StateStore, index: usize) -> Self {
        let base = reg_trigger(index);
        let mut raw = [0u8; TRIGGER_SIZE as usize];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = store.get8(base + i as u16);
        }
        Self::decode(&raw)
    }

    /// Write the record into slot `index`.
    pub fn store(&self, store: &mut StateStore, index: usize) {
        let base = reg_trigger(index);
        for (i, byte) in self.encode().iter().enumerate() {
            store.set8(base + i as u16, *byte);
        }
    }

    /// Evaluate against the raw line state.
    ///
    /// Returns `None` for slots that take no part in polling: no input
    /// lines selected, disabled combinator, or an empty action range.
    pub fn evaluate(&self, lines: u8) -> Option<bool> {
        if self.input_mask == 0 || self.actions.is_empty() {
            return None;
        }
        let combinator = self.combinator?;
        let state = (lines & self.input_mask) ^ self.invert_mask;
        Some(combinator.apply(state) ^ self.output_invert)
    }
}

/// Edge detector over the trigger table.
#[derive(Debug, Default)]
pub struct TriggerEvaluator {
    previous: [bool; MAX_TRIGGERS],
    next_poll_us: Option<u32>,
}

impl TriggerEvaluator {
    pub const fn new() -> Self {
        Self {
            previous: [false; MAX_TRIGGERS],
            next_poll_us: None,
        }
    }

    /// Gated evaluation for the control loop.
    ///
    /// Nothing happens unless `dirty` is raised and at least `interval_us`
    /// passed since the last evaluation. A raise that arrives inside the
    /// interval is kept for a later tick.
    ///
    /// The flag is cleared before `lines` is sampled, so an edge racing the
    /// sample raises it again and is evaluated on a later tick.
    pub fn poll<L: TriggerLines>(
        &mut self,
        store: &StateStore,
        lines: &mut L,
        now: u32,
        interval_us: u32,
        dirty: &DirtyFlag,
    ) -> Vec<ActionRange, MAX_TRIGGERS> {
        if !dirty.is_raised() || !time::due(now, self.next_poll_us) {
            return Vec::new();
        }
        dirty.clear();
        self.next_poll_us = Some(now.wrapping_add(interval_us));
        let state = lines.read();
        self.evaluate(store, state)
    }

    /// Evaluate every slot and collect the ranges of triggers that just
    /// turned true, in slot order.
    pub fn evaluate(&mut self, store: &StateStore, lines: u8) -> Vec<ActionRange, MAX_TRIGGERS> {
        let mut fired = Vec::new();
        for (index, previous) in self.previous.iter_mut().enumerate() {
            let trigger = Trigger::load(store, index);
            let Some(result) = trigger.evaluate(lines) else {
                continue;
            };
            if result != *previous {
                *previous = result;
                if result {
                    // At most one entry per slot, capacity cannot run out.
                    let _ = fired.push(trigger.actions);
                }
            }
        }
        fired
    }

    /// Last recorded result of slot `index`.
    pub fn state(&self, index: usize) -> bool {
        self.previous.get(index).copied().unwrap_or(false)
    }
}
