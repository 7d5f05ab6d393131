//! Linux i2c-dev transport
//!
//! Talks to `/dev/i2c-<n>` through the SMBus ioctl interface: byte-data reads
//! and word-data writes, the same transactions `i2cget -y <n> <addr> <reg> b`
//! and `i2cset -y <n> <addr> <reg> <value> w` issue.

use crate::bus::{BusError, BusRegisterClient, validate_address};
use nix::errno::Errno;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod ffi {
    //! Kernel interface from `<linux/i2c-dev.h>` and `<linux/i2c.h>`

    pub const I2C_RETRIES: u16 = 0x0701;
    pub const I2C_TIMEOUT: u16 = 0x0702;
    pub const I2C_SLAVE: u16 = 0x0703;
    pub const I2C_SMBUS: u16 = 0x0720;

    pub const I2C_SMBUS_WRITE: u8 = 0;
    pub const I2C_SMBUS_READ: u8 = 1;

    pub const I2C_SMBUS_BYTE_DATA: u32 = 2;
    pub const I2C_SMBUS_WORD_DATA: u32 = 3;

    const I2C_SMBUS_BLOCK_MAX: usize = 32;

    #[repr(C)]
    #[derive(Clone, Copy)]
    pub union I2cSmbusData {
        pub byte: u8,
        pub word: u16,
        pub block: [u8; I2C_SMBUS_BLOCK_MAX + 2],
    }

    #[repr(C)]
    pub struct I2cSmbusIoctlData {
        pub read_write: u8,
        pub command: u8,
        pub size: u32,
        pub data: *mut I2cSmbusData,
    }

    nix::ioctl_write_int_bad!(set_retries, I2C_RETRIES);
    nix::ioctl_write_int_bad!(set_timeout, I2C_TIMEOUT);
    nix::ioctl_write_int_bad!(set_slave_address, I2C_SLAVE);
    nix::ioctl_write_ptr_bad!(smbus_access, I2C_SMBUS, I2cSmbusIoctlData);
}

/// Register bus backed by a Linux i2c adapter
#[derive(Debug)]
pub struct LinuxI2cBus {
    file: File,
    path: PathBuf,
    selected: Option<u8>,
}

impl LinuxI2cBus {
    /// Open `/dev/i2c-<bus>`
    pub fn open(bus: u8, timeout: Duration) -> Result<Self, BusError> {
        Self::open_path(Path::new(&format!("/dev/i2c-{}", bus)), timeout)
    }

    /// Open an explicit adapter device node
    ///
    /// Retries are disabled and the adapter timeout is set to `timeout`
    /// (rounded up to the kernel's 10 ms granularity).
    pub fn open_path(path: &Path, timeout: Duration) -> Result<Self, BusError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| BusError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let fd = file.as_raw_fd();
        let ticks = timeout_ticks(timeout);
        let configure = || -> nix::Result<()> {
            // SAFETY: fd is an open i2c-dev node for the lifetime of `file`
            unsafe {
                ffi::set_retries(fd, 0)?;
                ffi::set_timeout(fd, ticks)?;
            }
            Ok(())
        };
        configure().map_err(|errno| BusError::Open {
            path: path.to_path_buf(),
            source: errno.into(),
        })?;

        tracing::info!(
            "Opened i2c adapter {} (timeout {:?}, no retries)",
            path.display(),
            timeout
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            selected: None,
        })
    }

    /// Adapter device path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn select(&mut self, address: u8, register: u8) -> Result<(), BusError> {
        validate_address(address)?;
        if self.selected == Some(address) {
            return Ok(());
        }

        // SAFETY: fd is an open i2c-dev node for the lifetime of `self.file`
        let result =
            unsafe { ffi::set_slave_address(self.file.as_raw_fd(), libc::c_int::from(address)) };
        result.map_err(|errno| map_errno(errno, address, register))?;
        self.selected = Some(address);
        Ok(())
    }

    fn smbus(
        &mut self,
        address: u8,
        read_write: u8,
        register: u8,
        size: u32,
        data: &mut ffi::I2cSmbusData,
    ) -> Result<(), BusError> {
        self.select(address, register)?;

        let request = ffi::I2cSmbusIoctlData {
            read_write,
            command: register,
            size,
            data: std::ptr::from_mut(data),
        };
        // SAFETY: `request.data` points at a live union large enough for any SMBus transfer
        let result = unsafe { ffi::smbus_access(self.file.as_raw_fd(), &request) };
        result.map_err(|errno| map_errno(errno, address, register))?;
        Ok(())
    }
}

/// Adapter timeout in the kernel's 10 ms units, at least one unit
fn timeout_ticks(timeout: Duration) -> libc::c_int {
    timeout
        .as_millis()
        .div_ceil(10)
        .clamp(1, libc::c_int::MAX as u128) as libc::c_int
}

fn map_errno(errno: Errno, address: u8, register: u8) -> BusError {
    match errno {
        Errno::ENXIO | Errno::EREMOTEIO | Errno::EIO => BusError::Nack { address, register },
        Errno::ETIMEDOUT | Errno::EAGAIN => BusError::Timeout { address, register },
        Errno::EPROTO | Errno::EBADMSG => BusError::Malformed { address, register },
        other => BusError::Io {
            address,
            register,
            source: other.into(),
        },
    }
}

impl BusRegisterClient for LinuxI2cBus {
    fn read_byte(&mut self, address: u8, register: u8) -> Result<u8, BusError> {
        let mut data = ffi::I2cSmbusData { word: 0 };
        self.smbus(
            address,
            ffi::I2C_SMBUS_READ,
            register,
            ffi::I2C_SMBUS_BYTE_DATA,
            &mut data,
        )?;
        // SAFETY: a byte-data read fills `byte`
        Ok(unsafe { data.byte })
    }

    fn write_word(&mut self, address: u8, register: u8, value: u16) -> Result<(), BusError> {
        // The adapter puts the low byte on the wire first (SMBus word order)
        let mut data = ffi::I2cSmbusData { word: value };
        self.smbus(
            address,
            ffi::I2C_SMBUS_WRITE,
            register,
            ffi::I2C_SMBUS_WORD_DATA,
            &mut data,
        )
    }
}
