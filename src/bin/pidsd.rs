//! pidsd - perimeter intrusion detection daemon
//!
//! This daemon:
//! 1. Loads configuration (file named by PIDS_CONFIG, then env overrides)
//! 2. Opens the selected frame source (camera, stream, file or synthetic scene)
//! 3. Runs segmentation, tracking, threat scoring and fence monitoring per frame
//! 4. Records the annotated view and mirrors the cockpit to a display file
//! 5. Flushes the detection report on exit

use anyhow::{anyhow, Context, Result};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;

use perimeter_watch::{
    session::{DisplaySink, FileDisplay, NoControls, NullDisplay, StdinControls},
    OutputLayout, PerimeterConfig, Session, ShutdownFlag, SourceDescriptor,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "pidsd",
    about = "Perimeter intrusion detection: tracking, fence monitoring and event reports",
    group(ArgGroup::new("input").args(["camera", "stream", "file"]))
)]
struct Args {
    /// Config file (.toml or .json)
    #[arg(long, env = "PIDS_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Local camera index
    #[arg(long, value_name = "INDEX")]
    camera: Option<u32>,

    /// Network stream URL (rtsp://, http://)
    #[arg(long, value_name = "URL")]
    stream: Option<String>,

    /// Video file or image-sequence directory
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,

    /// No display file and no stdin controls
    #[arg(long)]
    headless: bool,

    /// Do not write the session recording
    #[arg(long)]
    no_record: bool,

    /// Stop after this many frames
    #[arg(long, value_name = "N")]
    max_frames: Option<u64>,

    /// Stderr progress style
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

impl Args {
    fn descriptor(&self, configured: &str) -> Result<SourceDescriptor> {
        if let Some(index) = self.camera {
            return Ok(SourceDescriptor::Camera(index));
        }
        if let Some(url) = &self.stream {
            return SourceDescriptor::parse(url);
        }
        if let Some(path) = &self.file {
            return Ok(SourceDescriptor::File(path.clone()));
        }
        SourceDescriptor::parse(configured).context("configured source")
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let cfg = {
        let _stage = ui.stage("Load configuration");
        PerimeterConfig::load_from(args.config.as_deref())?
    };
    let descriptor = args.descriptor(&cfg.source)?;

    let layout = {
        let _stage = ui.stage("Prepare output directories");
        OutputLayout::init(&cfg.output_root)?
    };

    let mut session = {
        let stage = ui.stage("Open source");
        stage.note(&descriptor);
        Session::open(&descriptor, &cfg, &layout, !args.no_record)?
    };

    let display: Box<dyn DisplaySink> = match (&cfg.display.path, args.headless) {
        (Some(path), false) => {
            log::info!("cockpit view mirrored to {}", path.display());
            Box::new(FileDisplay::new(path, cfg.display.every_n_frames))
        }
        _ => Box::new(NullDisplay),
    };

    let shutdown = ShutdownFlag::new();
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || handler_flag.request())
        .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    session = session.with_display(display).with_shutdown(shutdown);

    if !args.headless {
        session = session.with_controls(Box::new(StdinControls::spawn()?));
        log::info!("controls: q quit, 1/2/3 blend preset, f fence overlay (then Enter)");
    } else {
        session = session.with_controls(Box::new(NoControls));
    }
    if matches!(descriptor, SourceDescriptor::Synthetic(_)) {
        session = session.with_pace(cfg.capture.fps);
    }
    if let Some(limit) = args.max_frames {
        session = session.with_frame_limit(limit);
    }

    log::info!(
        "pidsd running: source={} fence_y={} classifier={} output={}",
        descriptor,
        cfg.fence.y,
        session.pipeline().classifier_name(),
        layout.root.display()
    );
    let summary = session.run()?;

    ui.field("stopped", format!("{:?}", summary.stop));
    ui.field("frames", summary.frames);
    ui.field("events", summary.events);
    ui.field("crossings", summary.crossings);
    match (&summary.report_path, &summary.report_error) {
        (Some(path), _) => ui.field("report", path.display()),
        (None, Some(err)) => ui.field("report", format!("not written ({})", err)),
        (None, None) => ui.field("report", "no events"),
    }
    Ok(())
}
