//! Configuration management for batmon
//!
//! Everything that differs between deployments lives here: which i2c adapter
//! to open, which board profile describes the fuel gauge (with per-field
//! overrides), sampling cadence, the shutdown command and the status file.
//!
//! Configuration is TOML. [`BatmonConfig::load_layered`] reads the file (if
//! any) and then applies `BATMON_<SECTION>__<KEY>` environment overrides.

mod board_profiles;

pub use board_profiles::{BoardProfile, load_board_profiles};

use batmon_hal::{CalibrationProfile, ConfigurationError, VoltageCurve};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown board profile: {0}")]
    UnknownBoard(String),

    #[error("Invalid gauge configuration: {0}")]
    Gauge(#[from] ConfigurationError),

    #[error("Failed to load configuration: {0}")]
    Layered(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Standard configuration paths
pub const CONFIG_DIR: &str = "/etc/batmon";
pub const CONFIG_FILE: &str = "config.toml";

/// Prefix for environment overrides, e.g. `BATMON_MONITOR__INTERVAL_MS=2000`
pub const ENV_PREFIX: &str = "BATMON";

/// i2c adapter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Adapter number, opened as `/dev/i2c-<bus>`
    #[serde(default = "default_bus")]
    pub bus: u8,

    /// Explicit adapter device node, takes precedence over `bus`
    #[serde(default)]
    pub device: Option<PathBuf>,

    /// Per-transaction timeout in milliseconds
    #[serde(default = "default_bus_timeout")]
    pub timeout_ms: u64,
}

fn default_bus() -> u8 {
    1
}

fn default_bus_timeout() -> u64 {
    100
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus: default_bus(),
            device: None,
            timeout_ms: default_bus_timeout(),
        }
    }
}

impl BusConfig {
    /// Adapter device node to open
    pub fn device_path(&self) -> PathBuf {
        self.device
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/dev/i2c-{}", self.bus)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Named voltage curve presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CurvePreset {
    /// 6.0 V to 8.4 V
    #[serde(rename = "linear-2s")]
    Linear2s,
    /// 3.0 V to 4.2 V
    SingleCell,
}

impl CurvePreset {
    pub fn curve(self) -> VoltageCurve {
        match self {
            CurvePreset::Linear2s => VoltageCurve::linear_2s(),
            CurvePreset::SingleCell => VoltageCurve::single_cell(),
        }
    }
}

/// Fuel gauge selection: a board profile plus optional per-field overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeConfig {
    /// Board profile id
    #[serde(default = "default_board")]
    pub board: String,

    #[serde(default)]
    pub address: Option<u8>,

    #[serde(default)]
    pub calibration_word: Option<u16>,

    #[serde(default)]
    pub config_word: Option<u16>,

    #[serde(default)]
    pub current_lsb_ma: Option<f64>,

    #[serde(default)]
    pub power_lsb_mw: Option<f64>,

    /// Curve preset replacing the board's curve
    #[serde(default)]
    pub curve: Option<CurvePreset>,

    /// Explicit endpoints, applied after `curve`
    #[serde(default)]
    pub v_empty: Option<f64>,

    #[serde(default)]
    pub v_full: Option<f64>,
}

fn default_board() -> String {
    "ups-hat".to_string()
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self {
            board: default_board(),
            address: None,
            calibration_word: None,
            config_word: None,
            current_lsb_ma: None,
            power_lsb_mw: None,
            curve: None,
            v_empty: None,
            v_full: None,
        }
    }
}

/// Validated fuel gauge settings ready for the driver
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSettings {
    pub board: String,
    pub address: u8,
    pub calibration: CalibrationProfile,
    pub curve: VoltageCurve,
}

impl GaugeConfig {
    /// Apply the overrides on top of `board`
    pub fn apply(&self, board: &BoardProfile) -> Result<GaugeSettings, ConfigError> {
        let mut calibration = board.calibration;
        if let Some(word) = self.calibration_word {
            calibration.calibration_word = word;
        }
        if let Some(word) = self.config_word {
            calibration.config_word = word;
        }
        if let Some(lsb) = self.current_lsb_ma {
            calibration.current_lsb_ma = lsb;
        }
        if let Some(lsb) = self.power_lsb_mw {
            calibration.power_lsb_mw = lsb;
        }
        calibration.validate()?;

        let mut curve = self.curve.map(CurvePreset::curve).unwrap_or(board.curve);
        if let Some(v) = self.v_empty {
            curve.v_empty = v;
        }
        if let Some(v) = self.v_full {
            curve.v_full = v;
        }
        curve.validate()?;

        let address = self.address.unwrap_or(board.address);
        batmon_hal::validate_address(address)
            .map_err(|_| ConfigurationError::InvalidAddress(address))?;

        Ok(GaugeSettings {
            board: board.id.clone(),
            address,
            calibration,
            curve,
        })
    }

    /// Look up the board among `boards` and apply the overrides
    pub fn resolve(
        &self,
        boards: &HashMap<String, BoardProfile>,
    ) -> Result<GaugeSettings, ConfigError> {
        let board = boards
            .get(&self.board)
            .ok_or_else(|| ConfigError::UnknownBoard(self.board.clone()))?;
        self.apply(board)
    }
}

/// Sampling loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Time between samples in milliseconds
    #[serde(default = "default_interval")]
    pub interval_ms: u64,

    /// Delay after the initial calibration before the first sample
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// Consecutive failed ticks before the sensor is reported unavailable
    #[serde(default = "default_unavailable_after")]
    pub unavailable_after: u32,

    /// Re-run calibration on the tick after a failure
    #[serde(default = "default_true")]
    pub recalibrate_after_failure: bool,

    /// Request a host shutdown when the battery is critical
    #[serde(default = "default_true")]
    pub shutdown_on_critical: bool,
}

fn default_interval() -> u64 {
    5000
}

fn default_settle() -> u64 {
    500
}

fn default_unavailable_after() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            settle_ms: default_settle(),
            unavailable_after: default_unavailable_after(),
            recalibrate_after_failure: true,
            shutdown_on_critical: true,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Critical battery action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Program and arguments
    #[serde(default = "default_shutdown_command")]
    pub command: Vec<String>,
}

fn default_shutdown_command() -> Vec<String> {
    vec!["shutdown".to_string(), "-h".to_string(), "now".to_string()]
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            command: default_shutdown_command(),
        }
    }
}

/// Status output for external presentation (tray applets, bars)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusConfig {
    /// JSON file rewritten on every tick
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Main batmon configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatmonConfig {
    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub gauge: GaugeConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub status: StatusConfig,
}

impl BatmonConfig {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` (or the default location) and the process environment
    pub fn load_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_layered(path, None)
    }

    /// Load configuration in layers: defaults, file, environment
    ///
    /// An explicit `path` must exist; the default location is optional.
    /// `env` replaces the process environment as the override source.
    pub fn load_layered(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path.to_path_buf()));
                }
                (path.to_path_buf(), true)
            }
            None => (Path::new(CONFIG_DIR).join(CONFIG_FILE), false),
        };

        if !file.exists() {
            tracing::warn!("No configuration file found, using defaults");
        }

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(" ")
            .with_list_parse_key("shutdown.command")
            .source(env);

        let layered = config::Config::builder()
            .add_source(
                config::File::from(file)
                    .format(config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(environment)
            .build()?;

        let config: Self = layered.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, contents)?;
        tracing::info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check values the type system cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.timeout_ms == 0 {
            return Err(ConfigError::Invalid("bus.timeout_ms must be > 0".into()));
        }
        if self.monitor.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.interval_ms must be > 0".into(),
            ));
        }
        if self.monitor.unavailable_after == 0 {
            return Err(ConfigError::Invalid(
                "monitor.unavailable_after must be >= 1".into(),
            ));
        }
        if self.shutdown.command.first().is_none_or(|p| p.is_empty()) {
            return Err(ConfigError::Invalid(
                "shutdown.command must name a program".into(),
            ));
        }
        Ok(())
    }

    /// Resolve gauge settings against built-in boards and `<config_dir>/boards`
    pub fn gauge_settings(&self, config_dir: &Path) -> Result<GaugeSettings, ConfigError> {
        let boards = load_board_profiles(config_dir)?;
        self.gauge.resolve(&boards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatmonConfig::default();
        assert_eq!(config.bus.bus, 1);
        assert_eq!(config.bus.device_path(), PathBuf::from("/dev/i2c-1"));
        assert_eq!(config.gauge.board, "ups-hat");
        assert_eq!(config.monitor.interval(), Duration::from_secs(5));
        assert_eq!(config.monitor.settle(), Duration::from_millis(500));
        assert_eq!(config.monitor.unavailable_after, 3);
        assert_eq!(config.shutdown.command, vec!["shutdown", "-h", "now"]);
        assert!(config.status.file.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = BatmonConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: BatmonConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::NotFound(PathBuf::from("/etc/batmon/config.toml"));
        assert!(format!("{}", err).contains("not found"));

        let err = ConfigError::UnknownBoard("ups-hat-z".to_string());
        assert_eq!(format!("{}", err), "Unknown board profile: ups-hat-z");

        let err = ConfigError::from(ConfigurationError::InvertedCurve {
            v_empty: 4.2,
            v_full: 3.0,
        });
        assert!(format!("{}", err).contains("v_full"));
    }

    #[test]
    fn test_resolve_board_defaults() {
        let boards = load_board_profiles(Path::new("/nonexistent")).unwrap();
        let settings = GaugeConfig::default().resolve(&boards).unwrap();
        assert_eq!(settings.address, 0x42);
        assert_eq!(settings.calibration, BoardProfile::ups_hat().calibration);
        assert_eq!(settings.curve, VoltageCurve::linear_2s());
    }

    #[test]
    fn test_resolve_with_overrides() {
        let gauge = GaugeConfig {
            board: "ups-hat".into(),
            address: Some(0x40),
            config_word: Some(0x399F),
            curve: Some(CurvePreset::SingleCell),
            v_full: Some(4.1),
            ..Default::default()
        };
        let settings = gauge.apply(&BoardProfile::ups_hat()).unwrap();
        assert_eq!(settings.address, 0x40);
        assert_eq!(settings.calibration.config_word, 0x399F);
        assert_eq!(settings.calibration.calibration_word, 4096);
        assert_eq!(settings.curve.v_empty, 3.0);
        assert_eq!(settings.curve.v_full, 4.1);
    }

    #[test]
    fn test_resolve_rejects_inverted_curve() {
        let gauge = GaugeConfig {
            v_empty: Some(8.4),
            v_full: Some(6.0),
            ..Default::default()
        };
        assert!(matches!(
            gauge.apply(&BoardProfile::ups_hat()),
            Err(ConfigError::Gauge(ConfigurationError::InvertedCurve { .. }))
        ));
    }

    #[test]
    fn test_resolve_rejects_bad_address() {
        let gauge = GaugeConfig {
            address: Some(0xA0),
            ..Default::default()
        };
        assert!(matches!(
            gauge.apply(&BoardProfile::ups_hat()),
            Err(ConfigError::Gauge(ConfigurationError::InvalidAddress(0xA0)))
        ));
    }

    #[test]
    fn test_resolve_unknown_board() {
        let gauge = GaugeConfig {
            board: "nope".into(),
            ..Default::default()
        };
        assert!(matches!(
            gauge.resolve(&HashMap::new()),
            Err(ConfigError::UnknownBoard(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = BatmonConfig::default();
        config.monitor.interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = BatmonConfig::default();
        config.shutdown.command.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_curve_preset_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            curve: CurvePreset,
        }
        let w: Wrapper = toml::from_str(r#"curve = "linear-2s""#).unwrap();
        assert_eq!(w.curve, CurvePreset::Linear2s);
        let w: Wrapper = toml::from_str(r#"curve = "single-cell""#).unwrap();
        assert_eq!(w.curve, CurvePreset::SingleCell);
    }

    #[test]
    fn test_constants() {
        assert_eq!(CONFIG_DIR, "/etc/batmon");
        assert_eq!(ENV_PREFIX, "BATMON");
    }
}
