//! Anomaly stream records and the notifier seam.
//!
//! Delivery (mail, chat, paging) lives behind [`Notifier`]. Two sinks ship
//! here: one that logs through `tracing`, one that writes JSON lines.

use crate::error::{PipelineError, Result};
use crate::label::Label;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::warn;

/// Timestamp layout used in operator-facing messages
pub const DISPLAY_DATE_FORMAT: &str = "%B %d, %Y %H:%M:%S";

/// A row predicted anomalous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Position of the row in the scored batch
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub label: Label,
    /// Raw counters plus derived features
    pub values: BTreeMap<String, f64>,
}

impl AnomalyRecord {
    pub fn display_date(&self) -> String {
        self.timestamp.format(DISPLAY_DATE_FORMAT).to_string()
    }
}

/// Consumer of an ordered, capped anomaly stream.
pub trait Notifier {
    fn notify(&mut self, anomalies: &[AnomalyRecord]) -> Result<()>;
}

/// Emits one `warn!` event per anomaly.
#[derive(Debug, Default)]
pub struct TracingNotifier {
    sent: usize,
}

impl TracingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }
}

impl Notifier for TracingNotifier {
    fn notify(&mut self, anomalies: &[AnomalyRecord]) -> Result<()> {
        for record in anomalies {
            let values = serde_json::to_string(&record.values).unwrap_or_default();
            warn!(
                index = record.index,
                at = %record.display_date(),
                values = %values,
                "Anomaly detected"
            );
            self.sent += 1;
        }
        Ok(())
    }
}

/// Writes each anomaly as one JSON object per line.
pub struct JsonLinesNotifier<W: Write> {
    out: W,
}

impl<W: Write> JsonLinesNotifier<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Notifier for JsonLinesNotifier<W> {
    fn notify(&mut self, anomalies: &[AnomalyRecord]) -> Result<()> {
        for record in anomalies {
            serde_json::to_writer(&mut self.out, record)
                .map_err(|e| PipelineError::Io(e.into()))?;
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Replace `path` with `anomalies` as JSON lines. The records go to a sibling
/// `.tmp` file that is renamed into place, so a failed write leaves the
/// previous contents untouched.
pub fn write_json_lines_atomic(path: &Path, anomalies: &[AnomalyRecord]) -> Result<()> {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "anomalies".into());
    name.push(".tmp");
    let tmp = path.with_file_name(name);

    let written = (|| -> Result<()> {
        let file = std::fs::File::create(&tmp)?;
        let mut sink = JsonLinesNotifier::new(std::io::BufWriter::new(file));
        sink.notify(anomalies)?;
        let file = sink
            .into_inner()
            .into_inner()
            .map_err(|e| PipelineError::Io(e.into_error()))?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    })();

    if written.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    written
}

/// Fans one stream out to several sinks, stopping at the first failure.
#[derive(Default)]
pub struct FanoutNotifier {
    sinks: Vec<Box<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Box<dyn Notifier>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&mut self, anomalies: &[AnomalyRecord]) -> Result<()> {
        for sink in &mut self.sinks {
            sink.notify(anomalies)?;
        }
        Ok(())
    }
}
