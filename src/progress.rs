//! Run progress reporting.
//!
//! Reports which pipeline stage is running and how many files it has
//! finished. Progress goes to **stderr** so stdout keeps only the run summary
//! and stays parseable for scripts.

use std::io::Write;

/// A single progress event for `bom run`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Walking the input folder. Total unknown.
    Scanning { root: String },
    /// `n` of `total` files normalized (converted, passed through, or failed).
    Normalizing { n: u64, total: u64 },
    /// `n` of `total` artifacts through the upload stage.
    Uploading { n: u64, total: u64 },
    /// Waiting on the single completion request.
    Completing { model: String },
}

impl ProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            ProgressEvent::Scanning { .. } => "scanning",
            ProgressEvent::Normalizing { .. } => "normalizing",
            ProgressEvent::Uploading { .. } => "uploading",
            ProgressEvent::Completing { .. } => "completing",
        }
    }
}

/// Reports run progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "bom  normalizing  12 / 40 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Scanning { root } => format!("bom  scanning {}...\n", root),
            ProgressEvent::Normalizing { n, total } | ProgressEvent::Uploading { n, total } => {
                format!(
                    "bom  {}  {} / {} files\n",
                    event.phase(),
                    format_number(*n),
                    format_number(*total)
                )
            }
            ProgressEvent::Completing { model } => {
                format!("bom  waiting for {}...\n", model)
            }
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &ProgressEvent) -> serde_json::Value {
        match event {
            ProgressEvent::Scanning { root } => serde_json::json!({
                "event": "progress",
                "phase": event.phase(),
                "root": root
            }),
            ProgressEvent::Normalizing { n, total } | ProgressEvent::Uploading { n, total } => {
                serde_json::json!({
                    "event": "progress",
                    "phase": event.phase(),
                    "n": n,
                    "total": total
                })
            }
            ProgressEvent::Completing { model } => serde_json::json!({
                "event": "progress",
                "phase": event.phase(),
                "model": model
            }),
        }
    }
}

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
