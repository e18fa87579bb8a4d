//! Cross-context handshake flags.
//!
//! Interrupt handlers and secondary tasks never touch the engine directly.
//! They raise a [`DirtyFlag`]; the control loop consumes it on its next
//! tick. Only plain atomic loads and stores are used so the flags work on
//! cores without compare-and-swap.

use core::sync::atomic::{AtomicBool, Ordering};

/// A one-bit "something changed" flag shared with an interrupt context.
pub struct DirtyFlag(AtomicBool);

impl DirtyFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Mark the flag. Safe to call from interrupt context.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` if the flag is set, without clearing it.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag.
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    /// Read and clear the flag.
    ///
    /// The flag is cleared before the caller acts on it, so a raise that
    /// lands while the caller is working stays set for the next pass.
    pub fn take(&self) -> bool {
        if self.is_raised() {
            self.clear();
            true
        } else {
            false
        }
    }
}

impl Default for DirtyFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of flags shared between the control loop and its producers.
#[derive(Default)]
pub struct Signals {
    /// Raised when a bus write transaction has completed.
    pub bus_write: DirtyFlag,
    /// Raised by the trigger input edge interrupt.
    pub triggers: DirtyFlag,
}

impl Signals {
    pub const fn new() -> Self {
        Self {
            bus_write: DirtyFlag::new(),
            triggers: DirtyFlag::new(),
        }
    }
}
