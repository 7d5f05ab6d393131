//! INA219 fuel gauge driver
//!
//! Calibrates the chip and turns raw register words into physical quantities.
//! Board-specific values (address, calibration/configuration words, LSB scales
//! and the voltage curve) are all passed in; nothing here assumes a particular
//! UPS board.

use crate::bus::{BusError, BusRegisterClient, validate_address};
use crate::register::{BUS_VOLTAGE_MATH_OVERFLOW, Register};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Volts per bus voltage count
pub const BUS_VOLTAGE_LSB_V: f64 = 0.004;

/// Millivolts per shunt voltage count
pub const SHUNT_VOLTAGE_LSB_MV: f64 = 0.01;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("Invalid voltage curve: v_full ({v_full} V) must exceed v_empty ({v_empty} V)")]
    InvertedCurve { v_empty: f64, v_full: f64 },

    #[error("Invalid {name}: {value} (must be finite and positive)")]
    InvalidScale { name: &'static str, value: f64 },

    #[error("Invalid calibration word: 0 disables current and power measurement")]
    ZeroCalibration,

    #[error("Invalid 7-bit peripheral address 0x{0:02x}")]
    InvalidAddress(u8),
}

fn check_scale(name: &'static str, value: f64) -> Result<f64, ConfigurationError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigurationError::InvalidScale { name, value })
    }
}

/// Words written to the chip at setup plus the scales they imply
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Value written to the calibration register
    pub calibration_word: u16,
    /// Value written to the configuration register
    pub config_word: u16,
    /// Milliamps per current register count
    pub current_lsb_ma: f64,
    /// Milliwatts per power register count
    pub power_lsb_mw: f64,
}

impl CalibrationProfile {
    pub fn new(
        calibration_word: u16,
        config_word: u16,
        current_lsb_ma: f64,
        power_lsb_mw: f64,
    ) -> Result<Self, ConfigurationError> {
        let profile = Self {
            calibration_word,
            config_word,
            current_lsb_ma,
            power_lsb_mw,
        };
        profile.validate()?;
        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.calibration_word == 0 {
            return Err(ConfigurationError::ZeroCalibration);
        }
        check_scale("current_lsb_ma", self.current_lsb_ma)?;
        check_scale("power_lsb_mw", self.power_lsb_mw)?;
        Ok(())
    }
}

/// Linear voltage-to-capacity mapping for a battery pack
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageCurve {
    /// Pack voltage reported as 0%
    pub v_empty: f64,
    /// Pack voltage reported as 100%
    pub v_full: f64,
}

impl VoltageCurve {
    pub fn new(v_empty: f64, v_full: f64) -> Result<Self, ConfigurationError> {
        let curve = Self { v_empty, v_full };
        curve.validate()?;
        Ok(curve)
    }

    /// Two 18650 cells in series
    pub const fn linear_2s() -> Self {
        Self {
            v_empty: 6.0,
            v_full: 8.4,
        }
    }

    /// Single Li-ion cell
    pub const fn single_cell() -> Self {
        Self {
            v_empty: 3.0,
            v_full: 4.2,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        check_scale("v_empty", self.v_empty)?;
        check_scale("v_full", self.v_full)?;
        if self.v_full <= self.v_empty {
            return Err(ConfigurationError::InvertedCurve {
                v_empty: self.v_empty,
                v_full: self.v_full,
            });
        }
        Ok(())
    }

    /// State of charge in percent, saturating at both ends
    pub fn capacity_pct(&self, voltage_v: f64) -> f64 {
        let pct = (voltage_v - self.v_empty) / (self.v_full - self.v_empty) * 100.0;
        pct.clamp(0.0, 100.0)
    }
}

/// Register words read for one sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
    pub bus_voltage_raw: u16,
    pub shunt_voltage_raw: u16,
    pub current_raw: u16,
    pub power_raw: u16,
}

impl RawSample {
    /// Math overflow flag from the bus voltage register
    pub fn math_overflow(&self) -> bool {
        self.bus_voltage_raw & BUS_VOLTAGE_MATH_OVERFLOW != 0
    }
}

/// Decoded measurements for one sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSample {
    pub voltage_v: f64,
    pub shunt_voltage_mv: f64,
    pub current_ma: f64,
    pub power_mw: f64,
    pub capacity_pct: f64,
}

impl PhysicalSample {
    pub fn from_raw(raw: &RawSample, profile: &CalibrationProfile, curve: &VoltageCurve) -> Self {
        let voltage_v = bus_voltage_from_raw(raw.bus_voltage_raw);
        Self {
            voltage_v,
            shunt_voltage_mv: shunt_voltage_from_raw(raw.shunt_voltage_raw),
            current_ma: current_from_raw(raw.current_raw, profile.current_lsb_ma),
            power_mw: power_from_raw(raw.power_raw, profile.power_lsb_mw),
            capacity_pct: curve.capacity_pct(voltage_v),
        }
    }
}

/// Reinterpret a register word as two's complement
fn signed(raw: u16) -> i32 {
    let raw = i32::from(raw);
    if raw > 32767 { raw - 65536 } else { raw }
}

/// Bus voltage in volts; the three flag bits are shifted out first
pub fn bus_voltage_from_raw(raw: u16) -> f64 {
    f64::from(raw >> 3) * BUS_VOLTAGE_LSB_V
}

/// Shunt voltage in millivolts
pub fn shunt_voltage_from_raw(raw: u16) -> f64 {
    f64::from(signed(raw)) * SHUNT_VOLTAGE_LSB_MV
}

/// Current in the unit of `current_lsb` (milliamps for a [`CalibrationProfile`])
pub fn current_from_raw(raw: u16, current_lsb: f64) -> f64 {
    f64::from(signed(raw)) * current_lsb
}

/// Power in the unit of `power_lsb`; the chip reports power unsigned
pub fn power_from_raw(raw: u16, power_lsb: f64) -> f64 {
    f64::from(raw) * power_lsb
}

/// INA219 driver bound to one peripheral on a register bus
pub struct FuelGauge<B> {
    bus: B,
    address: u8,
    profile: CalibrationProfile,
    curve: VoltageCurve,
}

impl<B: BusRegisterClient> FuelGauge<B> {
    /// Create a driver; the chip is not touched until [`FuelGauge::calibrate`]
    pub fn new(
        bus: B,
        address: u8,
        profile: CalibrationProfile,
        curve: VoltageCurve,
    ) -> Result<Self, ConfigurationError> {
        validate_address(address).map_err(|_| ConfigurationError::InvalidAddress(address))?;
        profile.validate()?;
        curve.validate()?;

        Ok(Self {
            bus,
            address,
            profile,
            curve,
        })
    }

    /// Write the calibration register, then the configuration register
    ///
    /// Writing the same words again leaves the chip in the same state, so this
    /// is also the recovery path after a bus fault or a chip power cycle.
    pub fn calibrate(&mut self) -> Result<(), BusError> {
        self.write_register(Register::Calibration, self.profile.calibration_word)?;
        self.write_register(Register::Config, self.profile.config_word)?;
        tracing::info!(
            "Fuel gauge 0x{:02x} calibrated (calibration=0x{:04x}, config=0x{:04x})",
            self.address,
            self.profile.calibration_word,
            self.profile.config_word
        );
        Ok(())
    }

    fn write_register(&mut self, register: Register, value: u16) -> Result<(), BusError> {
        self.bus.write_word(self.address, register.addr(), value)
    }

    /// Read a register word as `(byte[reg] << 8) | byte[reg + 1]`
    pub fn read_word(&mut self, register: Register) -> Result<u16, BusError> {
        let (high, low) = self.bus.read_byte_pair(self.address, register.addr())?;
        Ok(u16::from_be_bytes([high, low]))
    }

    /// Bus voltage in volts
    pub fn bus_voltage(&mut self) -> Result<f64, BusError> {
        Ok(bus_voltage_from_raw(self.read_word(Register::BusVoltage)?))
    }

    /// Shunt voltage in millivolts
    pub fn shunt_voltage_mv(&mut self) -> Result<f64, BusError> {
        Ok(shunt_voltage_from_raw(self.read_word(Register::ShuntVoltage)?))
    }

    /// Current in milliamps; negative while the battery is discharging
    pub fn current(&mut self) -> Result<f64, BusError> {
        let raw = self.read_word(Register::Current)?;
        Ok(current_from_raw(raw, self.profile.current_lsb_ma))
    }

    /// Power in milliwatts
    pub fn power(&mut self) -> Result<f64, BusError> {
        let raw = self.read_word(Register::Power)?;
        Ok(power_from_raw(raw, self.profile.power_lsb_mw))
    }

    /// State of charge derived from the bus voltage
    pub fn capacity_percent(&mut self) -> Result<f64, BusError> {
        let voltage = self.bus_voltage()?;
        Ok(self.curve.capacity_pct(voltage))
    }

    /// Read every measurement register once
    pub fn read_raw(&mut self) -> Result<RawSample, BusError> {
        Ok(RawSample {
            bus_voltage_raw: self.read_word(Register::BusVoltage)?,
            shunt_voltage_raw: self.read_word(Register::ShuntVoltage)?,
            current_raw: self.read_word(Register::Current)?,
            power_raw: self.read_word(Register::Power)?,
        })
    }

    /// Fresh decoded sample
    pub fn sample(&mut self) -> Result<PhysicalSample, BusError> {
        let raw = self.read_raw()?;
        if raw.math_overflow() {
            tracing::debug!(
                "Fuel gauge 0x{:02x} reports math overflow, current/power may be clipped",
                self.address
            );
        }
        let sample = PhysicalSample::from_raw(&raw, &self.profile, &self.curve);
        tracing::debug!(
            "Voltage: {:.2}V, Current: {:.0}mA, Capacity: {:.1}%",
            sample.voltage_v,
            sample.current_ma,
            sample.capacity_pct
        );
        Ok(sample)
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBus;

    const ADDR: u8 = 0x42;

    fn ups_hat_profile() -> CalibrationProfile {
        CalibrationProfile::new(4096, 0x19FF, 0.1, 2.0).unwrap()
    }

    fn gauge(curve: VoltageCurve) -> (MockBus, FuelGauge<MockBus>) {
        let bus = MockBus::with_device(ADDR);
        let gauge = FuelGauge::new(bus.clone(), ADDR, ups_hat_profile(), curve).unwrap();
        (bus, gauge)
    }

    #[test]
    fn test_bus_voltage_formula() {
        for raw in [0u16, 1, 7, 8, 0x1234, 0x7FFF, 0x8000, 0xFFF8, 0xFFFF] {
            assert_eq!(bus_voltage_from_raw(raw), f64::from(raw >> 3) * 0.004);
        }
        // Flag bits do not contribute to the magnitude
        assert_eq!(bus_voltage_from_raw(0b1000), bus_voltage_from_raw(0b1111));
    }

    #[test]
    fn test_bus_voltage_monotonic() {
        let mut previous = bus_voltage_from_raw(0);
        for raw in 1..=u16::MAX {
            let voltage = bus_voltage_from_raw(raw);
            assert!(voltage >= previous, "not monotonic at {raw}");
            previous = voltage;
        }
    }

    #[test]
    fn test_current_sign_handling() {
        assert!((current_from_raw(0xFFFF, 0.1) - -0.1).abs() < 1e-12);
        assert_eq!(current_from_raw(0x8000, 1.0), -32768.0);
        assert_eq!(current_from_raw(0x7FFF, 1.0), 32767.0);
        assert_eq!(current_from_raw(0, 0.1), 0.0);
        assert!((current_from_raw(1000, 0.1) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_power_is_unsigned() {
        assert_eq!(power_from_raw(0xFFFF, 2.0), 131070.0);
        assert_eq!(power_from_raw(500, 2.0), 1000.0);
    }

    #[test]
    fn test_shunt_voltage_signed() {
        assert!((shunt_voltage_from_raw(100) - 1.0).abs() < 1e-12);
        assert!((shunt_voltage_from_raw(0xFF9C) - -1.0).abs() < 1e-12);
    }

    #[test]
    fn test_capacity_clamped_and_linear() {
        let curve = VoltageCurve::single_cell();
        assert_eq!(curve.capacity_pct(4.2), 100.0);
        assert_eq!(curve.capacity_pct(5.0), 100.0);
        assert_eq!(curve.capacity_pct(3.0), 0.0);
        assert_eq!(curve.capacity_pct(0.0), 0.0);
        assert!((curve.capacity_pct(3.6) - 50.0).abs() < 1e-9);

        let curve = VoltageCurve::linear_2s();
        assert_eq!(curve.capacity_pct(8.4), 100.0);
        assert_eq!(curve.capacity_pct(6.0), 0.0);
        assert!((curve.capacity_pct(7.2) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_curve_validation() {
        assert!(matches!(
            VoltageCurve::new(4.2, 3.0),
            Err(ConfigurationError::InvertedCurve { .. })
        ));
        assert!(matches!(
            VoltageCurve::new(3.0, 3.0),
            Err(ConfigurationError::InvertedCurve { .. })
        ));
        assert!(VoltageCurve::new(f64::NAN, 4.2).is_err());
        assert!(VoltageCurve::new(3.0, 4.2).is_ok());
    }

    #[test]
    fn test_profile_validation() {
        assert_eq!(
            CalibrationProfile::new(0, 0x19FF, 0.1, 2.0),
            Err(ConfigurationError::ZeroCalibration)
        );
        assert!(matches!(
            CalibrationProfile::new(4096, 0x19FF, 0.0, 2.0),
            Err(ConfigurationError::InvalidScale {
                name: "current_lsb_ma",
                ..
            })
        ));
        assert!(matches!(
            CalibrationProfile::new(4096, 0x19FF, 0.1, -2.0),
            Err(ConfigurationError::InvalidScale {
                name: "power_lsb_mw",
                ..
            })
        ));
    }

    #[test]
    fn test_new_rejects_bad_address() {
        let result = FuelGauge::new(
            MockBus::new(),
            0x80,
            ups_hat_profile(),
            VoltageCurve::linear_2s(),
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidAddress(0x80))
        ));
    }

    #[test]
    fn test_calibrate_writes_calibration_then_config() {
        let (bus, mut gauge) = gauge(VoltageCurve::linear_2s());
        gauge.calibrate().unwrap();

        let writes = bus.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].register, Register::Calibration.addr());
        assert_eq!(writes[0].value, 4096);
        assert_eq!(writes[1].register, Register::Config.addr());
        assert_eq!(writes[1].value, 0x19FF);
        assert!(writes.iter().all(|w| w.address == ADDR));
    }

    #[test]
    fn test_read_word_combines_high_then_low() {
        let (bus, mut gauge) = gauge(VoltageCurve::linear_2s());
        bus.load_byte(ADDR, 0x02, 0x3A);
        bus.load_byte(ADDR, 0x03, 0x98);

        assert_eq!(gauge.read_word(Register::BusVoltage).unwrap(), 0x3A98);
        assert_eq!(bus.read_count(), 2);
    }

    #[test]
    fn test_bus_voltage_and_capacity_from_bus() {
        let (bus, mut gauge) = gauge(VoltageCurve::linear_2s());
        // 1850 counts * 4 mV = 7.4 V, conversion-ready flag set
        bus.load_word(ADDR, Register::BusVoltage.addr(), (1850 << 3) | 0b010);

        assert!((gauge.bus_voltage().unwrap() - 7.4).abs() < 1e-9);
        let expected = (7.4 - 6.0) / 2.4 * 100.0;
        assert!((gauge.capacity_percent().unwrap() - expected).abs() < 1e-6);
    }

    #[test]
    fn test_current_from_bus_is_signed() {
        let (bus, mut gauge) = gauge(VoltageCurve::linear_2s());
        bus.load_word(ADDR, Register::Current.addr(), 0xFFFF);
        assert!((gauge.current().unwrap() - -0.1).abs() < 1e-12);

        bus.load_word(ADDR, Register::Current.addr(), (-5000i16) as u16);
        assert!((gauge.current().unwrap() - -500.0).abs() < 1e-9);
    }

    #[test]
    fn test_bus_errors_propagate() {
        let (bus, mut gauge) = gauge(VoltageCurve::linear_2s());
        bus.set_offline(true);

        assert!(matches!(
            gauge.calibrate(),
            Err(BusError::Timeout {
                address: ADDR,
                register: 0x05
            })
        ));
        assert!(gauge.bus_voltage().is_err());
        assert!(gauge.sample().is_err());
    }

    #[test]
    fn test_calibrate_is_idempotent() {
        let (bus, mut gauge) = gauge(VoltageCurve::single_cell());
        bus.load_word(ADDR, Register::BusVoltage.addr(), 950 << 3);
        bus.load_word(ADDR, Register::Current.addr(), 0xFF00);

        gauge.calibrate().unwrap();
        let once_config = bus.written_word(ADDR, Register::Config.addr());
        let once_cal = bus.written_word(ADDR, Register::Calibration.addr());
        let once = gauge.sample().unwrap();

        gauge.calibrate().unwrap();
        let twice = gauge.sample().unwrap();

        assert_eq!(once, twice);
        assert_eq!(bus.written_word(ADDR, Register::Config.addr()), once_config);
        assert_eq!(
            bus.written_word(ADDR, Register::Calibration.addr()),
            once_cal
        );
    }

    #[test]
    fn test_raw_sample_flags() {
        let raw = RawSample {
            bus_voltage_raw: (1000 << 3) | 0b011,
            shunt_voltage_raw: 0,
            current_raw: 0,
            power_raw: 0,
        };
        assert!(raw.math_overflow());

        let sample = PhysicalSample::from_raw(
            &raw,
            &ups_hat_profile(),
            &VoltageCurve::single_cell(),
        );
        assert!((sample.voltage_v - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_sample_serializes() {
        let sample = PhysicalSample {
            voltage_v: 7.4,
            shunt_voltage_mv: -1.5,
            current_ma: -150.0,
            power_mw: 1100.0,
            capacity_pct: 58.3,
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"capacity_pct\":58.3"));
    }
}
