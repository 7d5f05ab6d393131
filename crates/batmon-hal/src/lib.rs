//! Hardware Abstraction Layer (HAL)
//!
//! Register-level access to the battery fuel gauge found on Raspberry Pi UPS
//! boards. The crate is split in two layers:
//!
//! - [`bus`]: the [`BusRegisterClient`] transport primitive (byte reads and word
//!   writes on a 7-bit addressed peripheral), with a Linux i2c-dev backend and
//!   a mutex-guarded [`SharedBus`] wrapper.
//! - [`gauge`]: the INA219 [`FuelGauge`] driver that calibrates the chip and
//!   decodes raw register words into volts, milliamps, milliwatts and a
//!   state-of-charge percentage.
//!
//! # Example
//!
//! ```no_run
//! use batmon_hal::{CalibrationProfile, FuelGauge, LinuxI2cBus, VoltageCurve};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = LinuxI2cBus::open(1, Duration::from_millis(100))?;
//!     let profile = CalibrationProfile::new(4096, 0x19FF, 0.1, 2.0)?;
//!     let mut gauge = FuelGauge::new(bus, 0x42, profile, VoltageCurve::linear_2s())?;
//!
//!     gauge.calibrate()?;
//!     println!("Battery at {:.1}%", gauge.capacity_percent()?);
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod gauge;
pub mod i2c;
pub mod mock;
pub mod register;

pub use bus::{BusError, BusRegisterClient, SharedBus, validate_address};
pub use gauge::{
    CalibrationProfile, ConfigurationError, FuelGauge, PhysicalSample, RawSample, VoltageCurve,
};
pub use i2c::LinuxI2cBus;
pub use register::Register;
