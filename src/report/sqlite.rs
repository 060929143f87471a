//! Hash-chained SQLite event store.
//!
//! Each row stores the event as JSON together with `prev_hash` and
//! `entry_hash = SHA-256(prev_hash || payload_json)`. The first row chains from 32 zero
//! bytes. Editing, deleting or reordering rows breaks the chain, which `verify_chain`
//! detects.

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, Row};
use sha2::{Digest, Sha256};
use std::path::Path;

use super::{DetectionEvent, ReportWriter};

pub struct SqliteReportWriter;

/// An event read back from the store with its chain position.
#[derive(Clone, Debug)]
pub struct StoredEvent {
    pub id: i64,
    pub event: DetectionEvent,
    pub entry_hash: [u8; 32],
}

pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;

        CREATE TABLE IF NOT EXISTS detection_events (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          date TEXT NOT NULL,
          time TEXT NOT NULL,
          track_id INTEGER NOT NULL,
          payload_json TEXT NOT NULL,
          prev_hash BLOB NOT NULL,
          entry_hash BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_events_track ON detection_events(track_id);
        "#,
    )?;
    Ok(())
}

fn chain_head(conn: &Connection) -> Result<[u8; 32]> {
    let mut stmt =
        conn.prepare("SELECT entry_hash FROM detection_events ORDER BY id DESC LIMIT 1")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => blob32(row, 0),
        None => Ok([0u8; 32]),
    }
}

impl ReportWriter for SqliteReportWriter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn persist(&mut self, events: &[DetectionEvent], path: &Path) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn =
            Connection::open(path).with_context(|| format!("open {}", path.display()))?;
        ensure_schema(&conn)?;

        let tx = conn.transaction()?;
        let mut prev_hash = chain_head(&tx)?;
        for event in events {
            let payload_json = serde_json::to_string(event)?;
            let entry_hash = hash_entry(&prev_hash, payload_json.as_bytes());
            let track_id = i64::try_from(event.track_id)
                .map_err(|_| anyhow!("track id {} exceeds i64 range", event.track_id))?;
            tx.execute(
                r#"
                INSERT INTO detection_events(date, time, track_id, payload_json, prev_hash, entry_hash)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    event.date,
                    event.time,
                    track_id,
                    payload_json,
                    prev_hash.to_vec(),
                    entry_hash.to_vec()
                ],
            )?;
            prev_hash = entry_hash;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Walk the chain from the first row; returns the number of verified rows.
pub fn verify_chain(conn: &Connection) -> Result<u64> {
    let mut stmt = conn.prepare(
        "SELECT id, payload_json, prev_hash, entry_hash FROM detection_events ORDER BY id ASC",
    )?;
    let mut rows = stmt.query([])?;
    let mut expected_prev = [0u8; 32];
    let mut count = 0u64;

    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let payload: String = row.get(1)?;
        let prev_hash = blob32(row, 2)?;
        let entry_hash = blob32(row, 3)?;

        if prev_hash != expected_prev {
            return Err(anyhow!(
                "integrity check failed at id {}: prev_hash={}, expected_prev={}",
                id,
                hex::encode(prev_hash),
                hex::encode(expected_prev)
            ));
        }
        let computed = hash_entry(&expected_prev, payload.as_bytes());
        if computed != entry_hash {
            return Err(anyhow!(
                "integrity check failed at id {}: computed_hash={}, stored_hash={}",
                id,
                hex::encode(computed),
                hex::encode(entry_hash)
            ));
        }
        expected_prev = entry_hash;
        count += 1;
    }
    Ok(count)
}

/// All events in insertion order.
pub fn read_events(conn: &Connection) -> Result<Vec<StoredEvent>> {
    let mut stmt =
        conn.prepare("SELECT id, payload_json, entry_hash FROM detection_events ORDER BY id ASC")?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let payload: String = row.get(1)?;
        let event = serde_json::from_str(&payload)
            .with_context(|| format!("decode event payload at id {}", id))?;
        out.push(StoredEvent {
            id,
            event,
            entry_hash: blob32(row, 2)?,
        });
    }
    Ok(out)
}

fn blob32(row: &Row<'_>, idx: usize) -> Result<[u8; 32]> {
    let bytes: Vec<u8> = row.get(idx)?;
    if bytes.len() != 32 {
        return Err(anyhow!("expected 32-byte blob at col {}", idx));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}
