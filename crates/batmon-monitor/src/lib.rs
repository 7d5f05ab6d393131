//! Battery monitoring
//!
//! Turns fuel gauge samples into status levels, publishes them to a
//! presentation sink and requests a shutdown when the battery runs critically
//! low. The sampling loop lives in [`monitor`]; it is generic over the bus,
//! the sink and the shutdown action so it can be driven against
//! [`batmon_hal::mock::MockBus`] in tests.

pub mod monitor;
pub mod shutdown;
pub mod sink;
pub mod status;

pub use monitor::{BatteryMonitor, MonitorSettings};
pub use shutdown::{CommandShutdown, ShutdownAction};
pub use sink::{LogSink, PresentationSink, StatusFileSink};
pub use status::{CRITICAL_THRESHOLD_PCT, Indicator, StatusLevel, StatusReport};

use batmon_hal::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Fuel gauge calibration failed: {0}")]
    Calibration(#[source] BusError),

    #[error("Invalid monitor settings: {0}")]
    InvalidSettings(String),
}
