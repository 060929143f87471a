//! The frame loop.
//!
//! A `Session` owns the source, the pipeline, the renderer and the output sinks and
//! drives them one frame at a time on the calling thread. Operator controls and the
//! shutdown flag are polled once per frame. Whatever ends the loop (end of stream, quit,
//! shutdown, source error), the recording sink is closed and the event log is flushed.

use anyhow::{anyhow, Result};
use chrono::Local;
use image::RgbImage;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PerimeterConfig;
use crate::fusion::{fuse, thermal_view, BlendPreset};
use crate::ingest::{open_source, FrameSource, SourceDescriptor};
use crate::pipeline::Pipeline;
use crate::render::{CompositeRenderer, RenderInput};
use crate::report::{writer_for, ReportWriter};
use crate::storage::{
    open_recording, JpegSnapshotWriter, NullSink, OutputLayout, RecordingSink, Snapshots,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Cooperative cancellation, set from a signal handler and read once per frame.
#[derive(Clone, Debug, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ---- Operator controls ----

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    Quit,
    Blend(BlendPreset),
    ToggleFence,
}

impl Control {
    pub fn from_key(key: char) -> Option<Self> {
        match key.to_ascii_lowercase() {
            'q' => Some(Control::Quit),
            'f' => Some(Control::ToggleFence),
            other => BlendPreset::from_key(other).map(Control::Blend),
        }
    }

    /// Every recognised key in `line`, in order. Unknown keys are ignored.
    pub fn parse(line: &str) -> Vec<Self> {
        line.chars().filter_map(Self::from_key).collect()
    }
}

pub trait ControlInput {
    /// Controls received since the last poll. Must not block.
    fn poll(&mut self) -> Vec<Control>;
}

/// Reads keys from stdin lines on a helper thread.
pub struct StdinControls {
    rx: mpsc::Receiver<Control>,
}

impl StdinControls {
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("pids-controls".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    for control in Control::parse(&line) {
                        if tx.send(control).is_err() {
                            return;
                        }
                    }
                }
            })
            .map_err(|e| anyhow!("spawn control reader: {}", e))?;
        Ok(Self { rx })
    }
}

impl ControlInput for StdinControls {
    fn poll(&mut self) -> Vec<Control> {
        self.rx.try_iter().collect()
    }
}

/// No operator attached.
pub struct NoControls;

impl ControlInput for NoControls {
    fn poll(&mut self) -> Vec<Control> {
        Vec::new()
    }
}

// ---- Display ----

pub trait DisplaySink {
    fn show(&mut self, frame: &RgbImage) -> Result<()>;
}

/// Overwrites one image file with the cockpit view every `every_n` frames.
pub struct FileDisplay {
    path: PathBuf,
    every_n: u32,
    counter: u32,
}

impl FileDisplay {
    pub fn new(path: &Path, every_n: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            every_n: every_n.max(1),
            counter: 0,
        }
    }
}

impl DisplaySink for FileDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        self.counter += 1;
        if self.counter < self.every_n {
            return Ok(());
        }
        self.counter = 0;
        frame
            .save(&self.path)
            .map_err(|e| anyhow!("write display {}: {}", self.path.display(), e))
    }
}

pub struct NullDisplay;

impl DisplaySink for NullDisplay {
    fn show(&mut self, _frame: &RgbImage) -> Result<()> {
        Ok(())
    }
}

// ---- Session ----

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    Quit,
    Shutdown,
    FrameLimit,
    SourceError,
}

#[derive(Clone, Debug)]
pub struct SessionSummary {
    pub frames: u64,
    pub events: u64,
    pub crossings: u64,
    pub stop: StopReason,
    pub report_path: Option<PathBuf>,
    /// Set when the report could not be written. Does not fail the session.
    pub report_error: Option<String>,
}

pub struct Session {
    source: Box<dyn FrameSource>,
    pipeline: Pipeline,
    renderer: CompositeRenderer,
    recording: Box<dyn RecordingSink>,
    display: Box<dyn DisplaySink>,
    controls: Box<dyn ControlInput>,
    report: Option<(Box<dyn ReportWriter>, PathBuf)>,
    shutdown: ShutdownFlag,
    fusion_alpha: f32,
    show_fence: bool,
    pace: Option<Duration>,
    frame_limit: Option<u64>,
}

#[derive(Default)]
struct LoopStats {
    frames: u64,
    crossings: u64,
    sink_failures: u64,
    display_failures: u64,
}

impl Session {
    pub fn new(source: Box<dyn FrameSource>, pipeline: Pipeline, renderer: CompositeRenderer) -> Self {
        Self {
            source,
            pipeline,
            renderer,
            recording: Box::new(NullSink::default()),
            display: Box::new(NullDisplay),
            controls: Box::new(NoControls),
            report: None,
            shutdown: ShutdownFlag::new(),
            fusion_alpha: 0.7,
            show_fence: true,
            pace: None,
            frame_limit: None,
        }
    }

    /// Startup in dependency order: the source is opened first, so a source that cannot
    /// be opened leaves no recording directory and no report behind.
    ///
    /// The session gets the configured pipeline (with snapshots when enabled), renderer,
    /// report writer and fusion weight, plus a recording under `layout` when `record` is set.
    pub fn open(
        descriptor: &SourceDescriptor,
        config: &PerimeterConfig,
        layout: &OutputLayout,
        record: bool,
    ) -> Result<Self> {
        let source = open_source(descriptor, &config.capture)?;

        let mut pipeline = Pipeline::from_config(config)?;
        if config.snapshots.enabled {
            pipeline = pipeline.with_snapshots(Snapshots::new(
                layout.clone(),
                Box::new(JpegSnapshotWriter),
                config.snapshots.min_threat,
            ));
        }
        let renderer = CompositeRenderer::from_font(config.display.font.as_deref())?;

        let mut session = Self::new(source, pipeline, renderer)
            .with_report(
                writer_for(config.report.format),
                layout.report_path(config.report.format),
            )
            .with_fusion_alpha(config.detection.fusion_alpha);
        if record {
            let resolution = (config.capture.width, config.capture.height);
            session = session.with_recording(Box::new(open_recording(
                layout,
                config.capture.fps,
                resolution,
                Local::now(),
            )?));
        }
        Ok(session)
    }

    pub fn with_recording(mut self, sink: Box<dyn RecordingSink>) -> Self {
        self.recording = sink;
        self
    }

    pub fn with_display(mut self, display: Box<dyn DisplaySink>) -> Self {
        self.display = display;
        self
    }

    pub fn with_controls(mut self, controls: Box<dyn ControlInput>) -> Self {
        self.controls = controls;
        self
    }

    pub fn with_report(mut self, writer: Box<dyn ReportWriter>, path: PathBuf) -> Self {
        self.report = Some((writer, path));
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_fusion_alpha(mut self, alpha: f32) -> Self {
        self.fusion_alpha = alpha;
        self
    }

    /// Sleep between frames to approximate `fps`. Used for synthetic sources.
    pub fn with_pace(mut self, fps: u32) -> Self {
        self.pace = Some(Duration::from_millis(1000 / u64::from(fps.max(1))));
        self
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn fusion_alpha(&self) -> f32 {
        self.fusion_alpha
    }

    pub fn show_fence(&self) -> bool {
        self.show_fence
    }

    /// Run until the stream ends or the operator stops it.
    ///
    /// Errors from the pipeline propagate, but only after the recording has been closed
    /// and the report flushed.
    pub fn run(&mut self) -> Result<SessionSummary> {
        let mut stats = LoopStats::default();
        let outcome = self.run_loop(&mut stats);

        if let Err(err) = self.recording.close() {
            log::warn!("recording close failed: {:#}", err);
        }
        let (report_path, report_error) = self.flush_report();

        let stop = outcome?;
        log::info!(
            "session ended ({:?}): {} frames, {} events, {} crossings",
            stop,
            stats.frames,
            self.pipeline.events().total(),
            stats.crossings
        );
        Ok(SessionSummary {
            frames: stats.frames,
            events: self.pipeline.events().total(),
            crossings: stats.crossings,
            stop,
            report_path,
            report_error,
        })
    }

    fn run_loop(&mut self, stats: &mut LoopStats) -> Result<StopReason> {
        let started = Instant::now();
        let mut last_health_log = Instant::now();

        loop {
            for control in self.controls.poll() {
                if self.apply(control) {
                    return Ok(StopReason::Quit);
                }
            }
            if self.shutdown.is_requested() {
                log::info!("shutdown requested");
                return Ok(StopReason::Shutdown);
            }
            if self.frame_limit.is_some_and(|limit| stats.frames >= limit) {
                return Ok(StopReason::FrameLimit);
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(StopReason::EndOfStream),
                Err(err) => {
                    log::error!("source read failed: {:#}", err);
                    return Ok(StopReason::SourceError);
                }
            };
            stats.frames += 1;

            let outcome = self.pipeline.process(&frame)?;
            stats.crossings += outcome.crossings.len() as u64;

            let alternate = thermal_view(frame.image());
            let fused = fuse(frame.image(), &alternate, self.fusion_alpha);
            let fps = stats.frames as f32 / started.elapsed().as_secs_f32().max(1.0);
            let composite = self.renderer.render(&RenderInput {
                raw: frame.image(),
                alternate: &alternate,
                fused: &fused,
                annotations: &outcome.annotations,
                fence_y: self.pipeline.fence().line().y,
                show_fence: self.show_fence,
                fps,
            });

            if let Err(err) = self.recording.write(&composite.record) {
                if stats.sink_failures == 0 {
                    log::warn!("recording write failed: {:#}", err);
                }
                stats.sink_failures += 1;
            }
            if let Err(err) = self.display.show(&composite.display) {
                if stats.display_failures == 0 {
                    log::warn!("display update failed: {:#}", err);
                }
                stats.display_failures += 1;
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source_stats = self.source.stats();
                log::info!(
                    "source health={} frames={} source={} fps={:.1} tracks={} events={}",
                    self.source.is_healthy(),
                    source_stats.frames_captured,
                    source_stats.source,
                    fps,
                    self.pipeline.tracks().len(),
                    self.pipeline.events().total()
                );
                last_health_log = Instant::now();
            }

            if let Some(pace) = self.pace {
                std::thread::sleep(pace);
            }
        }
    }

    /// Returns true when the control ends the session.
    fn apply(&mut self, control: Control) -> bool {
        match control {
            Control::Quit => {
                log::info!("operator quit");
                return true;
            }
            Control::Blend(preset) => {
                self.fusion_alpha = preset.alpha();
                log::info!("fusion alpha set to {:.1}", self.fusion_alpha);
            }
            Control::ToggleFence => {
                self.show_fence = !self.show_fence;
                log::info!("fence overlay {}", if self.show_fence { "on" } else { "off" });
            }
        }
        false
    }

    fn flush_report(&mut self) -> (Option<PathBuf>, Option<String>) {
        let Some((writer, path)) = self.report.as_mut() else {
            return (None, None);
        };
        match self.pipeline.events_mut().flush(writer.as_mut(), path) {
            Ok(written) => (written, None),
            Err(err) => {
                log::error!("{:#}", err);
                (None, Some(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerimeterConfig;
    use crate::ingest::{Actor, SyntheticScene, SyntheticSource};
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct Scripted(VecDeque<Vec<Control>>);

    impl ControlInput for Scripted {
        fn poll(&mut self) -> Vec<Control> {
            self.0.pop_front().unwrap_or_default()
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<NullSink>>);

    impl RecordingSink for SharedSink {
        fn write(&mut self, frame: &RgbImage) -> Result<()> {
            self.0.borrow_mut().write(frame)
        }

        fn close(&mut self) -> Result<()> {
            self.0.borrow_mut().close()
        }
    }

    fn session(frames: u64) -> Result<Session> {
        let config = PerimeterConfig::default();
        let scene = SyntheticScene::new(640, 480)
            .with_actor(
                Actor::new(80, 60)
                    .starting_at(280, 20)
                    .moving(0, 10)
                    .visible(2, frames),
            )
            .with_length(frames);
        let source = SyntheticSource::new(scene, 20);
        let pipeline = Pipeline::from_config(&config)?;
        Ok(Session::new(Box::new(source), pipeline, CompositeRenderer::new()))
    }

    #[test]
    fn control_keys() {
        assert_eq!(
            Control::parse("1f Q x"),
            vec![
                Control::Blend(BlendPreset::Optical),
                Control::ToggleFence,
                Control::Quit
            ]
        );
        assert!(Control::parse("").is_empty());
    }

    #[test]
    fn runs_to_end_of_stream_and_closes_sink() -> Result<()> {
        let sink = SharedSink::default();
        let mut session = session(6)?.with_recording(Box::new(sink.clone()));
        let summary = session.run()?;

        assert_eq!(summary.stop, StopReason::EndOfStream);
        assert_eq!(summary.frames, 6);
        assert_eq!(summary.events, 5);
        assert_eq!(sink.0.borrow().frames, 6);
        assert!(sink.0.borrow().closed);
        Ok(())
    }

    #[test]
    fn controls_apply_before_the_next_frame() -> Result<()> {
        let controls = Scripted(VecDeque::from(vec![
            vec![Control::Blend(BlendPreset::Thermal), Control::ToggleFence],
            vec![],
            vec![Control::Quit],
        ]));
        let sink = SharedSink::default();
        let mut session = session(50)?
            .with_controls(Box::new(controls))
            .with_recording(Box::new(sink.clone()));
        let summary = session.run()?;

        assert_eq!(summary.stop, StopReason::Quit);
        assert_eq!(summary.frames, 2);
        assert_eq!(session.fusion_alpha(), 0.2);
        assert!(!session.show_fence());
        assert!(sink.0.borrow().closed);
        Ok(())
    }

    #[test]
    fn shutdown_flag_stops_before_reading() -> Result<()> {
        let flag = ShutdownFlag::new();
        flag.request();
        let mut session = session(10)?.with_shutdown(flag);
        let summary = session.run()?;
        assert_eq!(summary.stop, StopReason::Shutdown);
        assert_eq!(summary.frames, 0);
        Ok(())
    }

    #[test]
    fn report_is_flushed_after_the_loop() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("intrusion_log.csv");
        let mut session = session(4)?
            .with_frame_limit(3)
            .with_report(Box::new(crate::report::CsvReportWriter), path.clone());
        let summary = session.run()?;

        assert_eq!(summary.stop, StopReason::FrameLimit);
        assert_eq!(summary.report_path.as_deref(), Some(path.as_path()));
        let rows = std::fs::read_to_string(&path)?.lines().count();
        assert_eq!(rows, 1 + summary.events as usize);
        assert!(session.pipeline().events().is_empty());
        Ok(())
    }
}
