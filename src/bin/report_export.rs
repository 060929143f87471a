//! report_export - verify and export the SQLite detection store
//!
//! Walks the hash chain of `intrusion_log.db` and, if it is intact, writes the events to
//! CSV in insertion order. A broken chain aborts before anything is exported.

use anyhow::{anyhow, Result};
use clap::Parser;
use rusqlite::Connection;
use std::path::PathBuf;

use perimeter_watch::report::{read_events, verify_chain, CsvReportWriter, ReportWriter};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "report_export",
    about = "Verify the detection store hash chain and export it to CSV"
)]
struct Args {
    /// Path to the detection SQLite DB
    #[arg(long, default_value = "reports/intrusion_log.db")]
    db: PathBuf,

    /// CSV output path (omit to verify only)
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Replace an existing output file
    #[arg(long)]
    overwrite: bool,

    /// Print each verified event
    #[arg(short, long)]
    verbose: bool,

    /// Stderr progress style
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    if !args.db.is_file() {
        return Err(anyhow!("{} does not exist", args.db.display()));
    }
    let conn = {
        let _stage = ui.stage("Open database");
        Connection::open(&args.db)?
    };

    let verified = {
        let stage = ui.stage("Verify hash chain");
        stage.note(args.db.display());
        verify_chain(&conn)?
    };
    println!("verified {} event entries in {}", verified, args.db.display());

    let events = read_events(&conn)?;
    if args.verbose {
        for stored in &events {
            println!(
                "  event {}: {} {} ID-{} {} {} hash={} OK",
                stored.id,
                stored.event.date,
                stored.event.time,
                stored.event.track_id,
                stored.event.category,
                stored.event.threat,
                &hex::encode(stored.entry_hash)[..16]
            );
        }
    }

    let Some(out) = args.out else {
        return Ok(());
    };
    if out.exists() {
        if !args.overwrite {
            return Err(anyhow!(
                "{} already exists (pass --overwrite to replace it)",
                out.display()
            ));
        }
        std::fs::remove_file(&out)?;
    }

    {
        let _stage = ui.stage("Export CSV");
        let rows: Vec<_> = events.into_iter().map(|stored| stored.event).collect();
        CsvReportWriter.persist(&rows, &out)?;
        ui.field("rows", rows.len());
    }
    ui.field("csv", out.display());
    Ok(())
}
