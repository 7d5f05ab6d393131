//! Register bus primitives
//!
//! A [`BusRegisterClient`] performs single register transactions on an addressed
//! peripheral. It carries no policy: no retries, no caching. Reads are single
//! bytes, writes are full 16-bit words sent in the bus's native word order.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Highest valid 7-bit peripheral address
pub const MAX_ADDRESS: u8 = 0x7F;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Failed to open bus device {}: {}", path.display(), source)]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No acknowledge from device 0x{address:02x} (register 0x{register:02x})")]
    Nack { address: u8, register: u8 },

    #[error("Transaction with device 0x{address:02x} (register 0x{register:02x}) timed out")]
    Timeout { address: u8, register: u8 },

    #[error("Malformed response from device 0x{address:02x} (register 0x{register:02x})")]
    Malformed { address: u8, register: u8 },

    #[error("Invalid 7-bit peripheral address 0x{0:02x}")]
    InvalidAddress(u8),

    #[error("Bus error on device 0x{address:02x} (register 0x{register:02x}): {source}")]
    Io {
        address: u8,
        register: u8,
        #[source]
        source: std::io::Error,
    },
}

impl BusError {
    /// Peripheral address involved in the failed transaction, if any
    pub fn address(&self) -> Option<u8> {
        match self {
            BusError::Nack { address, .. }
            | BusError::Timeout { address, .. }
            | BusError::Malformed { address, .. }
            | BusError::Io { address, .. } => Some(*address),
            BusError::InvalidAddress(address) => Some(*address),
            BusError::Open { .. } => None,
        }
    }

    /// Register involved in the failed transaction, if any
    pub fn register(&self) -> Option<u8> {
        match self {
            BusError::Nack { register, .. }
            | BusError::Timeout { register, .. }
            | BusError::Malformed { register, .. }
            | BusError::Io { register, .. } => Some(*register),
            BusError::InvalidAddress(_) | BusError::Open { .. } => None,
        }
    }
}

/// Check that `address` fits in 7 bits
pub fn validate_address(address: u8) -> Result<u8, BusError> {
    if address > MAX_ADDRESS {
        return Err(BusError::InvalidAddress(address));
    }
    Ok(address)
}

/// Register-oriented bus transport
///
/// Reads and writes are asymmetric: a register word is read as two
/// independent byte transactions and combined by the caller, while a word
/// write is one 16-bit transaction.
pub trait BusRegisterClient {
    /// Read one byte from `register` on the peripheral at `address`
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8, BusError>;

    /// Write a 16-bit word to `register` in a single transaction
    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError>;

    /// Read `register` and `register + 1` back to back
    ///
    /// Returns `(high, low)`. Transports shared between threads override this
    /// so no other transaction can land between the two reads.
    fn read_byte_pair(&mut self, address: u8, register: u8) -> Result<(u8, u8), BusError> {
        let high = self.read_byte(address, register)?;
        let low = self.read_byte(address, register.wrapping_add(1))?;
        Ok((high, low))
    }
}

impl<B: BusRegisterClient + ?Sized> BusRegisterClient for &mut B {
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8, BusError> {
        (**self).read_byte(address, register)
    }

    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError> {
        (**self).write_word(address, register, value)
    }

    fn read_byte_pair(&mut self, address: u8, register: u8) -> Result<(u8, u8), BusError> {
        (**self).read_byte_pair(address, register)
    }
}

impl<B: BusRegisterClient + ?Sized> BusRegisterClient for Box<B> {
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8, BusError> {
        (**self).read_byte(address, register)
    }

    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError> {
        (**self).write_word(address, register, value)
    }

    fn read_byte_pair(&mut self, address: u8, register: u8) -> Result<(u8, u8), BusError> {
        (**self).read_byte_pair(address, register)
    }
}

/// Bus handle that can be cloned and used from several threads
///
/// Every transaction takes the lock; [`BusRegisterClient::read_byte_pair`]
/// holds it across both byte reads.
pub struct SharedBus<B> {
    inner: Arc<Mutex<B>>,
}

impl<B> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    /// Run `f` with exclusive access to the underlying transport
    pub fn with_bus<T>(&self, f: impl FnOnce(&mut B) -> T) -> T {
        let mut bus = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut bus)
    }
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BusRegisterClient> BusRegisterClient for SharedBus<B> {
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8, BusError> {
        self.with_bus(|bus| bus.read_byte(address, register))
    }

    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError> {
        self.with_bus(|bus| bus.write_word(address, register, value))
    }

    fn read_byte_pair(&mut self, address: u8, register: u8) -> Result<(u8, u8), BusError> {
        self.with_bus(|bus| bus.read_byte_pair(address, register))
    }
}
