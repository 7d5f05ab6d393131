//! Presentation sinks
//!
//! A sink receives one [`StatusReport`] per tick. Rendering (tray icon, bar
//! module, notification) happens outside this crate; the sinks here log the
//! status or expose it as a JSON file for such a renderer to pick up.

use crate::status::StatusReport;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Receives the status published on every tick
pub trait PresentationSink {
    fn publish(&mut self, report: &StatusReport);
}

impl<S: PresentationSink + ?Sized> PresentationSink for Box<S> {
    fn publish(&mut self, report: &StatusReport) {
        (**self).publish(report)
    }
}

impl<S: PresentationSink> PresentationSink for Vec<S> {
    fn publish(&mut self, report: &StatusReport) {
        for sink in self.iter_mut() {
            sink.publish(report);
        }
    }
}

/// Writes every report to the tracing log at debug level
#[derive(Debug, Default)]
pub struct LogSink;

impl PresentationSink for LogSink {
    fn publish(&mut self, report: &StatusReport) {
        tracing::debug!("[{}] {}", report.icon_name(), report.tooltip());
    }
}

/// JSON document written by [`StatusFileSink`]
#[derive(Debug, Serialize)]
struct StatusDocument<'a> {
    #[serde(flatten)]
    report: &'a StatusReport,
    icon: &'static str,
    tooltip: String,
    /// Milliseconds since the Unix epoch
    timestamp_ms: u64,
}

/// Keeps a JSON file holding the latest report
///
/// The file is replaced atomically (write to a sibling temp file, then rename)
/// so readers never see a partial document. Only the current status is kept.
#[derive(Debug)]
pub struct StatusFileSink {
    path: PathBuf,
}

impl StatusFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, report: &StatusReport) -> std::io::Result<()> {
        let timestamp_ms = report
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let document = StatusDocument {
            report,
            icon: report.icon_name(),
            tooltip: report.tooltip(),
            timestamp_ms,
        };
        let json = serde_json::to_vec_pretty(&document)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)
    }
}

impl PresentationSink for StatusFileSink {
    fn publish(&mut self, report: &StatusReport) {
        if let Err(e) = self.write(report) {
            tracing::warn!("Failed to write status file {}: {}", self.path.display(), e);
        }
    }
}
