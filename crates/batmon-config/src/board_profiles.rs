//! Board profile configuration
//!
//! Stores the fuel gauge wiring and calibration for known UPS boards. Boards in
//! the field disagree on peripheral address, configuration word and battery
//! pack, so each one is a named profile rather than a driver default.

use batmon_hal::{CalibrationProfile, VoltageCurve};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::ConfigError;

/// Fuel gauge setup for one UPS board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardProfile {
    /// Board identifier
    pub id: String,
    /// Board display name
    pub name: String,
    /// 7-bit fuel gauge address
    pub address: u8,
    /// Calibration and configuration words
    pub calibration: CalibrationProfile,
    /// Battery pack voltage curve
    pub curve: VoltageCurve,
}

impl Default for BoardProfile {
    fn default() -> Self {
        // Default to the 2S UPS HAT
        Self::ups_hat()
    }
}

impl BoardProfile {
    /// UPS HAT with two 18650 cells in series (INA219 at 0x42, 16 V range)
    pub fn ups_hat() -> Self {
        Self {
            id: "ups-hat".to_string(),
            name: "UPS HAT (2S)".to_string(),
            address: 0x42,
            calibration: CalibrationProfile {
                calibration_word: 4096,
                config_word: 0x19FF,
                current_lsb_ma: 0.1,
                power_lsb_mw: 2.0,
            },
            curve: VoltageCurve::linear_2s(),
        }
    }

    /// UPS HAT (C) for the Pi Zero, single cell (INA219 at 0x43, /2 gain, 32 samples)
    pub fn ups_hat_c() -> Self {
        Self {
            id: "ups-hat-c".to_string(),
            name: "UPS HAT (C), single cell".to_string(),
            address: 0x43,
            calibration: CalibrationProfile {
                calibration_word: 26868,
                config_word: 0x0EEF,
                current_lsb_ma: 0.1524,
                power_lsb_mw: 3.048,
            },
            curve: VoltageCurve::single_cell(),
        }
    }

    /// Bare INA219 breakout at the factory address with power-on configuration
    pub fn ina219_breakout() -> Self {
        Self {
            id: "ina219-breakout".to_string(),
            name: "INA219 breakout, single cell".to_string(),
            address: 0x40,
            calibration: CalibrationProfile {
                calibration_word: 4096,
                config_word: 0x399F,
                current_lsb_ma: 0.1,
                power_lsb_mw: 2.0,
            },
            curve: VoltageCurve::single_cell(),
        }
    }

    /// Built-in board profiles
    pub fn builtin() -> Vec<Self> {
        vec![Self::ups_hat(), Self::ups_hat_c(), Self::ina219_breakout()]
    }
}

/// Load board profiles from configuration directory
///
/// Built-in profiles come first; `<config_dir>/boards/*.toml` may add boards or
/// replace a built-in one with the same id.
pub fn load_board_profiles(
    config_dir: &Path,
) -> Result<HashMap<String, BoardProfile>, ConfigError> {
    let boards_dir = config_dir.join("boards");
    let mut profiles: HashMap<String, BoardProfile> = BoardProfile::builtin()
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    // Load custom profiles from directory
    if boards_dir.exists() {
        for entry in std::fs::read_dir(&boards_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|e| e == "toml") {
                let contents = std::fs::read_to_string(&path)?;
                let profile: BoardProfile = toml::from_str(&contents)?;
                tracing::debug!("Loaded board profile {} from {}", profile.id, path.display());
                profiles.insert(profile.id.clone(), profile);
            }
        }
    }

    Ok(profiles)
}
