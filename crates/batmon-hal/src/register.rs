//! INA219 register map

use serde::{Deserialize, Serialize};

/// Addresses of the INA219 internal registers
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    /// Configuration (ranges, ADC resolution, operating mode)
    Config = 0x00,
    /// Shunt voltage, two's complement, 10 µV per count
    ShuntVoltage = 0x01,
    /// Bus voltage, 4 mV per count in bits 15..3, flags in bits 2..0
    BusVoltage = 0x02,
    /// Power, unsigned, scaled by the calibration power LSB
    Power = 0x03,
    /// Current, two's complement, scaled by the calibration current LSB
    Current = 0x04,
    /// Calibration
    Calibration = 0x05,
}

impl Register {
    /// Register address on the bus
    pub const fn addr(self) -> u8 {
        self as u8
    }
}

/// Bus voltage register flag: power or current calculation overflowed
pub const BUS_VOLTAGE_MATH_OVERFLOW: u16 = 0b001;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_addresses() {
        assert_eq!(Register::Config.addr(), 0x00);
        assert_eq!(Register::ShuntVoltage.addr(), 0x01);
        assert_eq!(Register::BusVoltage.addr(), 0x02);
        assert_eq!(Register::Power.addr(), 0x03);
        assert_eq!(Register::Current.addr(), 0x04);
        assert_eq!(Register::Calibration.addr(), 0x05);
    }
}
