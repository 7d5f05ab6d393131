//! Mock bus for testing without real hardware
//!
//! [`MockBus`] models each attached peripheral as a byte-addressed register
//! file. `read_byte(reg)` returns the byte stored at `reg`, so a register word
//! loaded with [`MockBus::load_word`] occupies `reg` (high byte) and `reg + 1`
//! (low byte), exactly as the driver composes it. Word writes are kept apart in
//! a write log and do not alter the readable bytes.
//!
//! # Usage
//!
//! ```no_run
//! use batmon_hal::mock::MockBus;
//!
//! let bus = MockBus::with_device(0x42);
//! // 7.4 V on the bus voltage register (1850 counts of 4 mV)
//! bus.load_word(0x42, 0x02, 1850 << 3);
//! // Make every following transaction fail
//! bus.set_offline(true);
//! ```

use crate::BusError;
use crate::bus::{BusRegisterClient, validate_address};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// One recorded word write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordWrite {
    pub address: u8,
    pub register: u8,
    pub value: u16,
}

/// Shared mock state for synchronized access
#[derive(Debug, Default)]
struct MockBusState {
    /// Addresses that acknowledge transactions
    devices: HashSet<u8>,
    /// Readable bytes keyed by (address, register)
    bytes: HashMap<(u8, u8), u8>,
    /// Last word written to each (address, register)
    words: HashMap<(u8, u8), u16>,
    /// Every word write in order
    writes: Vec<WordWrite>,
    /// Number of byte reads served
    reads: usize,
    /// When set, every transaction times out
    offline: bool,
}

/// In-memory register bus
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<RwLock<MockBusState>>,
}

impl MockBus {
    /// Create a bus with no attached devices
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus with one device attached at `address`
    pub fn with_device(address: u8) -> Self {
        let bus = Self::new();
        bus.attach(address);
        bus
    }

    /// Attach a device so it acknowledges transactions
    pub fn attach(&self, address: u8) {
        if let Ok(mut state) = self.state.write() {
            state.devices.insert(address);
        }
    }

    /// Remove a device; further transactions to it are not acknowledged
    pub fn detach(&self, address: u8) {
        if let Ok(mut state) = self.state.write() {
            state.devices.remove(&address);
        }
    }

    /// Simulate a bus that stopped responding
    pub fn set_offline(&self, offline: bool) {
        if let Ok(mut state) = self.state.write() {
            state.offline = offline;
        }
        tracing::debug!("[MOCK] Bus offline: {}", offline);
    }

    /// Store a single readable byte
    pub fn load_byte(&self, address: u8, register: u8, value: u8) {
        if let Ok(mut state) = self.state.write() {
            state.bytes.insert((address, register), value);
        }
    }

    /// Store `word` big-endian across `register` and `register + 1`
    pub fn load_word(&self, address: u8, register: u8, word: u16) {
        let [high, low] = word.to_be_bytes();
        self.load_byte(address, register, high);
        self.load_byte(address, register.wrapping_add(1), low);
    }

    /// Last word written to a register
    pub fn written_word(&self, address: u8, register: u8) -> Option<u16> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.words.get(&(address, register)).copied())
    }

    /// All word writes in order
    pub fn writes(&self) -> Vec<WordWrite> {
        self.state
            .read()
            .map(|s| s.writes.clone())
            .unwrap_or_default()
    }

    /// Number of byte reads served so far
    pub fn read_count(&self) -> usize {
        self.state.read().map(|s| s.reads).unwrap_or(0)
    }

    fn check(state: &MockBusState, address: u8, register: u8) -> Result<(), BusError> {
        validate_address(address)?;
        if state.offline {
            return Err(BusError::Timeout { address, register });
        }
        if !state.devices.contains(&address) {
            return Err(BusError::Nack { address, register });
        }
        Ok(())
    }
}

impl BusRegisterClient for MockBus {
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8, BusError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| BusError::Malformed { address, register })?;
        Self::check(&state, address, register)?;
        state.reads += 1;
        Ok(state.bytes.get(&(address, register)).copied().unwrap_or(0))
    }

    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| BusError::Malformed { address, register })?;
        Self::check(&state, address, register)?;
        state.words.insert((address, register), value);
        state.writes.push(WordWrite {
            address,
            register,
            value,
        });
        tracing::trace!(
            "[MOCK] Wrote 0x{:04x} to 0x{:02x}:0x{:02x}",
            value,
            address,
            register
        );
        Ok(())
    }
}
