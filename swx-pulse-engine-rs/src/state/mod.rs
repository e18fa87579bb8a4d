//! Byte-addressed state store shared between the engine and the bus.
//!
//! [`StateStore`] is the single owner of the register memory described in
//! [`registers`](crate::registers). Engine code goes through the
//! unrestricted accessors ([`get8`](StateStore::get8),
//! [`set16`](StateStore::set16), ...). Externally originated traffic goes
//! through [`bus_write`](StateStore::bus_write) and
//! [`bus_read`](StateStore::bus_read), which enforce the read-only boundary
//! and the store bounds.
//!
//! # Addressing
//!
//! Engine accessors never fail: addresses wrap modulo the store size, and
//! callers validate indices against the known table sizes before building
//! an address. 16-bit values are little-endian.

mod error;
mod signal;

pub use error::StateError;
pub use signal::{DirtyFlag, Signals};

use crate::registers::{READ_ONLY_BOUNDARY, STATE_MEM_SIZE};

/// The register memory.
pub struct StateStore {
    mem: [u8; STATE_MEM_SIZE],
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create a zeroed store.
    pub const fn new() -> Self {
        Self {
            mem: [0; STATE_MEM_SIZE],
        }
    }

    #[inline]
    fn slot(address: u16) -> usize {
        address as usize % STATE_MEM_SIZE
    }

    // ── Engine accessors ─────────────────────────────────────────────

    pub fn get8(&self, address: u16) -> u8 {
        self.mem[Self::slot(address)]
    }

    pub fn set8(&mut self, address: u16, value: u8) {
        self.mem[Self::slot(address)] = value;
    }

    pub fn get16(&self, address: u16) -> u16 {
        let lo = self.get8(address);
        let hi = self.get8(address.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    pub fn set16(&mut self, address: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.set8(address, lo);
        self.set8(address.wrapping_add(1), hi);
    }

    // ── Bus accessors ────────────────────────────────────────────────

    /// Write a run of bytes on behalf of the external controller.
    ///
    /// The whole transaction is rejected, and nothing is written, if any
    /// byte falls below the read-only boundary or past the end of the store.
    pub fn bus_write(&mut self, address: u16, data: &[u8]) -> Result<(), StateError> {
        if address < READ_ONLY_BOUNDARY {
            return Err(StateError::ReadOnly);
        }
        let start = address as usize;
        let end = start + data.len();
        if end > STATE_MEM_SIZE {
            return Err(StateError::OutOfBounds);
        }
        self.mem[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Read a run of bytes on behalf of the external controller.
    pub fn bus_read(&self, address: u16, buffer: &mut [u8]) -> Result<(), StateError> {
        let start = address as usize;
        let end = start + buffer.len();
        if end > STATE_MEM_SIZE {
            return Err(StateError::OutOfBounds);
        }
        buffer.copy_from_slice(&self.mem[start..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{REG_CH_GEN_ENABLE, REG_VERSION};

    #[test]
    fn starts_zeroed() {
        let store = StateStore::new();
        assert_eq!(store.get8(0), 0);
        assert_eq!(store.get16(100), 0);
    }

    #[test]
    fn sixteen_bit_values_are_little_endian() {
        let mut store = StateStore::new();
        store.set16(40, 0x1234);
        assert_eq!(store.get8(40), 0x34);
        assert_eq!(store.get8(41), 0x12);
        assert_eq!(store.get16(40), 0x1234);
    }

    #[test]
    fn engine_accessors_wrap_instead_of_panicking() {
        let mut store = StateStore::new();
        store.set8(STATE_MEM_SIZE as u16 + 5, 9);
        assert_eq!(store.get8(5), 9);

        store.set16(STATE_MEM_SIZE as u16 - 1, 0xABCD);
        assert_eq!(store.get8(STATE_MEM_SIZE as u16 - 1), 0xCD);
        assert_eq!(store.get8(0), 0xAB);
    }

    #[test]
    fn engine_may_write_read_only_region() {
        let mut store = StateStore::new();
        store.set16(REG_VERSION, 7);
        assert_eq!(store.get16(REG_VERSION), 7);
    }

    #[test]
    fn bus_write_rejects_read_only_region() {
        let mut store = StateStore::new();
        assert_eq!(store.bus_write(0, &[1]), Err(StateError::ReadOnly));
        assert_eq!(
            store.bus_write(READ_ONLY_BOUNDARY - 1, &[1, 2]),
            Err(StateError::ReadOnly)
        );
        assert_eq!(store.get8(READ_ONLY_BOUNDARY - 1), 0);
        assert_eq!(store.get8(READ_ONLY_BOUNDARY), 0);
    }

    #[test]
    fn bus_write_accepts_writable_region() {
        let mut store = StateStore::new();
        store.bus_write(REG_CH_GEN_ENABLE, &[0b0101]).unwrap();
        assert_eq!(store.get8(REG_CH_GEN_ENABLE), 0b0101);
    }

    #[test]
    fn bus_access_past_the_end_is_rejected() {
        let mut store = StateStore::new();
        let last = STATE_MEM_SIZE as u16 - 1;
        assert_eq!(store.bus_write(last, &[1, 2]), Err(StateError::OutOfBounds));
        assert_eq!(store.get8(last), 0);

        let mut buf = [0u8; 2];
        assert_eq!(store.bus_read(last, &mut buf), Err(StateError::OutOfBounds));
        assert!(store.bus_write(last, &[3]).is_ok());
    }

    #[test]
    fn bus_read_can_see_read_only_region() {
        let mut store = StateStore::new();
        store.set16(REG_VERSION, 0x0102);
        let mut buf = [0u8; 2];
        store.bus_read(REG_VERSION, &mut buf).unwrap();
        assert_eq!(buf, [0x02, 0x01]);
    }
}
