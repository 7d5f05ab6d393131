//! Periodic battery sampling loop
//!
//! [`BatteryMonitor`] owns the fuel gauge, the presentation sink and the
//! shutdown collaborator. Each [`BatteryMonitor::tick`] reads one sample,
//! publishes a [`StatusReport`] and decides whether to request a shutdown.
//! Bus faults never stop the loop; they are reported as `Unknown` and, after
//! enough of them in a row, as `SensorUnavailable`.

use crate::MonitorError;
use crate::shutdown::ShutdownAction;
use crate::sink::PresentationSink;
use crate::status::{Indicator, StatusLevel, StatusReport};
use batmon_hal::{BusError, BusRegisterClient, FuelGauge, PhysicalSample};
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

fn default_interval() -> Duration {
    Duration::from_millis(5000)
}

/// Loop tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Time between ticks
    pub interval: Duration,
    /// Consecutive failed ticks before the sensor is reported unavailable
    pub unavailable_after: u32,
    /// Re-run calibration on the tick after a bus fault
    pub recalibrate_after_failure: bool,
    /// Request a shutdown when the battery reaches the critical level
    pub shutdown_on_critical: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            unavailable_after: 3,
            recalibrate_after_failure: true,
            shutdown_on_critical: true,
        }
    }
}

impl MonitorSettings {
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.interval.is_zero() {
            return Err(MonitorError::InvalidSettings(
                "interval must be greater than zero".into(),
            ));
        }
        if self.unavailable_after == 0 {
            return Err(MonitorError::InvalidSettings(
                "unavailable_after must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    consecutive_failures: u32,
    needs_calibration: bool,
    shutdown_requested: bool,
    last_indicator: Option<Indicator>,
    ticks: u64,
}

/// Samples the gauge, publishes status and guards against deep discharge
pub struct BatteryMonitor<B, S, D> {
    gauge: FuelGauge<B>,
    sink: S,
    shutdown: D,
    settings: MonitorSettings,
    state: MonitorState,
}

impl<B, S, D> BatteryMonitor<B, S, D>
where
    B: BusRegisterClient,
    S: PresentationSink,
    D: ShutdownAction,
{
    /// Calibrate the gauge once and return a monitor ready to sample
    ///
    /// The caller should let the chip settle (one conversion period) before
    /// the first tick.
    pub fn start(
        mut gauge: FuelGauge<B>,
        sink: S,
        shutdown: D,
        settings: MonitorSettings,
    ) -> Result<Self, MonitorError> {
        settings.validate()?;
        gauge.calibrate().map_err(MonitorError::Calibration)?;

        tracing::info!(
            "Battery monitor started for gauge 0x{:02x}, sampling every {:?}",
            gauge.address(),
            settings.interval
        );

        Ok(Self {
            gauge,
            sink,
            shutdown,
            settings,
            state: MonitorState::default(),
        })
    }

    /// Run one sampling cycle and return the report that was published
    pub fn tick(&mut self) -> StatusReport {
        self.state.ticks += 1;
        let now = SystemTime::now();

        let mut report = match self.read_sample() {
            Ok(sample) => self.on_sample(sample, now),
            Err(e) => self.on_failure(e, now),
        };

        report.changed = self.state.last_indicator != Some(report.indicator);
        if report.changed {
            tracing::info!(
                "Battery status changed to {}: {}",
                report.indicator,
                report.tooltip()
            );
        }
        self.state.last_indicator = Some(report.indicator);

        self.sink.publish(&report);

        if report.level() == Some(StatusLevel::Critical) {
            self.handle_critical();
        }

        report
    }

    /// Drive [`tick`](Self::tick) on the configured interval until `quit`
    /// turns true or its sender is dropped
    pub async fn run(&mut self, mut quit: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*quit.borrow_and_update() {
            tokio::select! {
                biased;
                changed = quit.changed() => {
                    if changed.is_err() {
                        tracing::debug!("Quit channel closed");
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }

        tracing::info!("Battery monitor stopped after {} ticks", self.state.ticks);
    }

    fn read_sample(&mut self) -> Result<PhysicalSample, BusError> {
        if self.state.needs_calibration {
            self.gauge.calibrate()?;
            self.state.needs_calibration = false;
        }
        self.gauge.sample()
    }

    fn on_sample(&mut self, sample: PhysicalSample, now: SystemTime) -> StatusReport {
        if self.state.consecutive_failures > 0 {
            tracing::info!(
                "Fuel gauge readable again after {} failed reads",
                self.state.consecutive_failures
            );
        }
        self.state.consecutive_failures = 0;

        let report = StatusReport::from_sample(sample, now);
        if report.level() != Some(StatusLevel::Critical) && self.state.shutdown_requested {
            tracing::info!("Battery recovered above critical level");
            self.state.shutdown_requested = false;
        }
        report
    }

    fn on_failure(&mut self, error: BusError, now: SystemTime) -> StatusReport {
        self.state.consecutive_failures = self.state.consecutive_failures.saturating_add(1);
        if self.settings.recalibrate_after_failure {
            self.state.needs_calibration = true;
        }

        let indicator = if self.state.consecutive_failures >= self.settings.unavailable_after {
            Indicator::SensorUnavailable
        } else {
            Indicator::Unknown
        };
        tracing::warn!(
            "Failed to read fuel gauge ({} in a row): {}",
            self.state.consecutive_failures,
            error
        );

        StatusReport::failed(indicator, self.state.consecutive_failures, now)
    }

    fn handle_critical(&mut self) {
        if !self.settings.shutdown_on_critical || self.state.shutdown_requested {
            return;
        }
        match self.shutdown.request_shutdown() {
            Ok(()) => self.state.shutdown_requested = true,
            Err(e) => tracing::error!("Failed to request shutdown: {}", e),
        }
    }

    /// A shutdown was requested and the battery has not recovered since
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state.consecutive_failures
    }

    pub fn ticks(&self) -> u64 {
        self.state.ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batmon_hal::mock::MockBus;
    use batmon_hal::{CalibrationProfile, Register, VoltageCurve};

    const ADDR: u8 = 0x42;

    fn gauge(bus: &MockBus) -> FuelGauge<MockBus> {
        FuelGauge::new(
            bus.clone(),
            ADDR,
            CalibrationProfile::new(4096, 0x19FF, 0.1, 2.0).unwrap(),
            VoltageCurve::single_cell(),
        )
        .unwrap()
    }

    fn no_shutdown() -> std::io::Result<()> {
        Ok(())
    }

    fn set_counts(bus: &MockBus, counts: u16) {
        bus.load_word(ADDR, Register::BusVoltage.addr(), counts << 3);
    }

    #[test]
    fn test_settings_validation() {
        assert!(MonitorSettings::default().validate().is_ok());

        let settings = MonitorSettings {
            interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(MonitorError::InvalidSettings(_))
        ));

        let settings = MonitorSettings {
            unavailable_after: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_start_calibrates() {
        let bus = MockBus::with_device(ADDR);
        let monitor = BatteryMonitor::start(
            gauge(&bus),
            Vec::<Box<dyn PresentationSink + Send>>::new(),
            no_shutdown,
            MonitorSettings::default(),
        )
        .unwrap();

        assert_eq!(bus.written_word(ADDR, Register::Calibration.addr()), Some(4096));
        assert_eq!(bus.written_word(ADDR, Register::Config.addr()), Some(0x19FF));
        assert_eq!(monitor.ticks(), 0);
    }

    #[test]
    fn test_start_fails_without_device() {
        let bus = MockBus::new();
        let result = BatteryMonitor::start(
            gauge(&bus),
            Vec::<Box<dyn PresentationSink + Send>>::new(),
            no_shutdown,
            MonitorSettings::default(),
        );
        assert!(matches!(result, Err(MonitorError::Calibration(_))));
    }

    #[test]
    fn test_changed_flag_follows_indicator() {
        let bus = MockBus::with_device(ADDR);
        let mut monitor = BatteryMonitor::start(
            gauge(&bus),
            Vec::<Box<dyn PresentationSink + Send>>::new(),
            no_shutdown,
            MonitorSettings::default(),
        )
        .unwrap();

        set_counts(&bus, 1000);
        assert!(monitor.tick().changed);
        assert!(!monitor.tick().changed);

        set_counts(&bus, 950);
        let report = monitor.tick();
        assert!(report.changed);
        assert_eq!(report.level(), Some(StatusLevel::Good));
    }
}
