//! Detection events and their persistence.
//!
//! The pipeline appends one `DetectionEvent` per surviving region per frame to the
//! in-memory `EventLog`. At shutdown the log is handed to a `ReportWriter`, which writes
//! the events in append order. Nothing is written when no events were logged.

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::ReportFormat;
use crate::detect::ObjectCategory;
use crate::fence::FenceState;
use crate::threat::ThreatLevel;
use crate::track::TrackId;

mod csv;
mod sqlite;

pub use csv::CsvReportWriter;
pub use sqlite::{read_events, verify_chain, SqliteReportWriter, StoredEvent};

/// One detection of one track in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM:SS`
    pub time: String,
    pub track_id: TrackId,
    pub category: ObjectCategory,
    pub threat: ThreatLevel,
    pub confidence: f32,
    pub fence_state: FenceState,
    pub loitering: bool,
    pub snapshot: Option<String>,
}

impl DetectionEvent {
    /// Date and time columns for a capture timestamp.
    pub fn stamp(at: DateTime<Local>) -> (String, String) {
        (
            at.format("%Y-%m-%d").to_string(),
            at.format("%H:%M:%S").to_string(),
        )
    }
}

/// Persists a batch of events to `path`.
pub trait ReportWriter {
    fn name(&self) -> &'static str;

    /// Write `events` in order. An empty slice must not create or touch `path`.
    fn persist(&mut self, events: &[DetectionEvent], path: &Path) -> Result<()>;
}

/// Writer matching the configured format.
pub fn writer_for(format: ReportFormat) -> Box<dyn ReportWriter> {
    match format {
        ReportFormat::Csv => Box::new(CsvReportWriter),
        ReportFormat::Sqlite => Box::new(SqliteReportWriter),
    }
}

/// Append-only event buffer for the current session.
#[derive(Debug, Default)]
pub struct EventLog {
    pending: Vec<DetectionEvent>,
    total: u64,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: DetectionEvent) {
        self.total += 1;
        self.pending.push(event);
    }

    /// Events not yet flushed, in append order.
    pub fn pending(&self) -> &[DetectionEvent] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Events appended over the whole session, flushed or not.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Persist pending events and clear them.
    ///
    /// Returns the written path, or `None` when there was nothing to write. On failure the
    /// events stay pending and the error is a `PerimeterError::ReportPersistFailure`.
    pub fn flush(&mut self, writer: &mut dyn ReportWriter, path: &Path) -> Result<Option<PathBuf>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        writer.persist(&self.pending, path).map_err(|err| {
            crate::PerimeterError::ReportPersistFailure {
                path: path.display().to_string(),
                reason: format!("{:#}", err),
            }
        })?;
        log::info!(
            "report: wrote {} events to {} ({})",
            self.pending.len(),
            path.display(),
            writer.name()
        );
        self.pending.clear();
        Ok(Some(path.to_path_buf()))
    }
}

#[cfg(test)]
pub(crate) fn sample_event(track_id: TrackId, threat: ThreatLevel) -> DetectionEvent {
    DetectionEvent {
        date: "2026-10-16".to_string(),
        time: "21:04:09".to_string(),
        track_id,
        category: ObjectCategory::Human,
        threat,
        confidence: 0.9,
        fence_state: FenceState::Approaching,
        loitering: false,
        snapshot: None,
    }
}
