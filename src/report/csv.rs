use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{DetectionEvent, ReportWriter};

pub(crate) const HEADER: &str =
    "Date,Time,ID,Type,Threat,Confidence,Fence,Loitering,Snapshot";

/// Tabular export. Appends to an existing file; writes the header only when the file is new.
pub struct CsvReportWriter;

impl ReportWriter for CsvReportWriter {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn persist(&mut self, events: &[DetectionEvent], path: &Path) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open {}", path.display()))?;
        let mut out = BufWriter::new(file);
        if is_new {
            writeln!(out, "{}", HEADER)?;
        }
        for event in events {
            writeln!(out, "{}", row(event))?;
        }
        out.flush()
            .with_context(|| format!("flush {}", path.display()))?;
        Ok(())
    }
}

fn row(event: &DetectionEvent) -> String {
    let fields = [
        event.date.clone(),
        event.time.clone(),
        event.track_id.to_string(),
        event.category.to_string(),
        event.threat.to_string(),
        format!("{:.2}", event.confidence),
        event.fence_state.to_string(),
        event.loitering.to_string(),
        event.snapshot.clone().unwrap_or_default(),
    ];
    fields
        .iter()
        .map(|field| quote(field))
        .collect::<Vec<_>>()
        .join(",")
}

fn quote(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
