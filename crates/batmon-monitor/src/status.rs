//! Battery status levels and per-tick reports

use batmon_hal::PhysicalSample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Capacity below which the battery is critical
pub const CRITICAL_THRESHOLD_PCT: f64 = 5.0;

/// Discrete battery level, ordered from empty to full
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    Critical,
    Caution,
    Low,
    Good,
    Full,
}

impl StatusLevel {
    /// Classify a capacity percentage
    ///
    /// Boundaries belong to the higher band (`75.0` is Good, `50.0` is Low),
    /// except the critical cutoff which is strictly below 5%.
    pub fn classify(capacity_pct: f64) -> Self {
        if capacity_pct > 75.0 {
            StatusLevel::Full
        } else if capacity_pct > 50.0 {
            StatusLevel::Good
        } else if capacity_pct > 25.0 {
            StatusLevel::Low
        } else if capacity_pct >= CRITICAL_THRESHOLD_PCT {
            StatusLevel::Caution
        } else {
            StatusLevel::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusLevel::Critical => "critical",
            StatusLevel::Caution => "caution",
            StatusLevel::Low => "low",
            StatusLevel::Good => "good",
            StatusLevel::Full => "full",
        }
    }

    /// Freedesktop icon theme name
    pub fn icon_name(&self) -> &'static str {
        match self {
            StatusLevel::Full => "battery-full",
            StatusLevel::Good => "battery-good",
            StatusLevel::Low => "battery-low",
            StatusLevel::Caution => "battery-caution",
            StatusLevel::Critical => "battery-empty",
        }
    }

    pub fn all() -> &'static [StatusLevel] {
        &[
            StatusLevel::Critical,
            StatusLevel::Caution,
            StatusLevel::Low,
            StatusLevel::Good,
            StatusLevel::Full,
        ]
    }
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the presentation layer should show for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    /// Fresh sample classified into a level
    Level(StatusLevel),
    /// This tick's read failed
    Unknown,
    /// Several consecutive ticks failed
    SensorUnavailable,
}

impl Indicator {
    pub fn icon_name(&self) -> &'static str {
        match self {
            Indicator::Level(level) => level.icon_name(),
            Indicator::Unknown | Indicator::SensorUnavailable => "battery-missing",
        }
    }

    pub fn level(&self) -> Option<StatusLevel> {
        match self {
            Indicator::Level(level) => Some(*level),
            _ => None,
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Indicator::Level(level) => write!(f, "{}", level),
            Indicator::Unknown => f.write_str("unknown"),
            Indicator::SensorUnavailable => f.write_str("sensor unavailable"),
        }
    }
}

/// Everything published to the presentation sink for one tick
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub indicator: Indicator,
    /// Present only when the tick read the gauge successfully
    pub sample: Option<PhysicalSample>,
    pub timestamp: SystemTime,
    /// Failed ticks in a row, 0 after a good sample
    pub consecutive_failures: u32,
    /// Indicator differs from the previous tick
    pub changed: bool,
}

impl StatusReport {
    pub fn from_sample(sample: PhysicalSample, timestamp: SystemTime) -> Self {
        Self {
            indicator: Indicator::Level(StatusLevel::classify(sample.capacity_pct)),
            sample: Some(sample),
            timestamp,
            consecutive_failures: 0,
            changed: false,
        }
    }

    pub fn failed(indicator: Indicator, consecutive_failures: u32, timestamp: SystemTime) -> Self {
        Self {
            indicator,
            sample: None,
            timestamp,
            consecutive_failures,
            changed: false,
        }
    }

    pub fn level(&self) -> Option<StatusLevel> {
        self.indicator.level()
    }

    pub fn icon_name(&self) -> &'static str {
        self.indicator.icon_name()
    }

    /// Human-readable tooltip, e.g. `Battery: 58.3% | 7.40V | -412mA`
    pub fn tooltip(&self) -> String {
        match (&self.sample, self.indicator) {
            (Some(sample), _) => format!(
                "Battery: {:.1}% | {:.2}V | {:.0}mA",
                sample.capacity_pct, sample.voltage_v, sample.current_ma
            ),
            (None, Indicator::SensorUnavailable) => "Battery: sensor unavailable".to_string(),
            (None, _) => "Battery: unknown".to_string(),
        }
    }
}
