//! Stage progress and end-of-run fields on stderr, shared by the binaries.

use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum UiMode {
    /// Spinners on an interactive terminal, plain lines when output is piped.
    #[default]
    Auto,
    Plain,
    Pretty,
}

pub struct Ui {
    spinners: bool,
}

impl Ui {
    pub fn new(mode: UiMode) -> Self {
        Self::detect(
            mode,
            std::io::stderr().is_terminal(),
            std::io::stdout().is_terminal(),
        )
    }

    fn detect(mode: UiMode, stderr_tty: bool, stdout_tty: bool) -> Self {
        let spinners = stderr_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_tty,
                UiMode::Plain => false,
            };
        Self { spinners }
    }

    pub fn stage(&self, name: &str) -> Stage {
        let spinner = self.spinners.then(|| {
            let spinner = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            spinner.set_style(
                ProgressStyle::with_template("{spinner:.cyan} {msg} {elapsed:.dim}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.set_message(name.to_string());
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        Stage {
            name: name.to_string(),
            started: Instant::now(),
            spinner,
        }
    }

    /// One `key: value` line of the end-of-run summary.
    pub fn field(&self, key: &str, value: impl Display) {
        eprintln!("  {:<12} {}", format!("{key}:"), value);
    }
}

/// A running startup stage. Reports its duration when dropped.
pub struct Stage {
    name: String,
    started: Instant,
    spinner: Option<ProgressBar>,
}

impl Stage {
    /// Detail about what the stage is working on.
    pub fn note(&self, detail: impl Display) {
        match &self.spinner {
            Some(spinner) => spinner.set_message(format!("{} ({})", self.name, detail)),
            None => eprintln!("    {}", detail),
        }
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        let line = format!("✔ {} [{}]", self.name, elapsed_label(self.started.elapsed()));
        match self.spinner.take() {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{}", line),
        }
    }
}

fn elapsed_label(elapsed: Duration) -> String {
    match elapsed.as_millis() {
        ms if ms < 1000 => format!("{ms}ms"),
        _ => format!("{:.1}s", elapsed.as_secs_f32()),
    }
}
