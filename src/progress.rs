//! Rebuild progress reporting.
//!
//! Reports what a rebuild is doing so operators can follow long runs: how
//! many records were discovered, which worker attempt is running from which
//! page, and when a worker hands over after hitting its resource ceiling.
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a model rebuild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebuildProgressEvent {
    /// Existing documents for the model were purged.
    Purged { model: String },
    /// Records counted and pages planned.
    Discovered {
        model: String,
        records: u64,
        pages: u64,
    },
    /// A worker attempt is starting.
    Attempt {
        model: String,
        attempt: u64,
        start_page: u64,
        pages: u64,
    },
    /// A worker hit its resource ceiling and a fresh one will continue.
    Exhausted { model: String, next_page: u64 },
    /// All pages indexed.
    Completed { model: String, attempts: u64 },
}

/// Reports rebuild progress. Implementations write to stderr (human or JSON).
pub trait RebuildProgressReporter: Send + Sync {
    fn report(&self, event: RebuildProgressEvent);
}

/// Human-friendly progress on stderr: "rebuild Article  worker #2  page 7 / 12".
pub struct StderrProgress;

impl RebuildProgressReporter for StderrProgress {
    fn report(&self, event: RebuildProgressEvent) {
        let line = match &event {
            RebuildProgressEvent::Purged { model } => {
                format!("rebuild {}  purged existing documents\n", model)
            }
            RebuildProgressEvent::Discovered {
                model,
                records,
                pages,
            } => format!(
                "rebuild {}  discovered {} records in {} pages\n",
                model,
                format_number(*records),
                format_number(*pages)
            ),
            RebuildProgressEvent::Attempt {
                model,
                attempt,
                start_page,
                pages,
            } => format!(
                "rebuild {}  worker #{}  page {} / {}\n",
                model,
                attempt,
                format_number(*start_page),
                format_number(*pages)
            ),
            RebuildProgressEvent::Exhausted { model, next_page } => format!(
                "rebuild {}  memory limit reached, continuing at page {}\n",
                model,
                format_number(*next_page)
            ),
            RebuildProgressEvent::Completed { model, attempts } => {
                format!("rebuild {}  done after {} worker(s)\n", model, attempts)
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl RebuildProgressReporter for JsonProgress {
    fn report(&self, event: RebuildProgressEvent) {
        let obj = match &event {
            RebuildProgressEvent::Purged { model } => serde_json::json!({
                "event": "progress",
                "model": model,
                "phase": "purged"
            }),
            RebuildProgressEvent::Discovered {
                model,
                records,
                pages,
            } => serde_json::json!({
                "event": "progress",
                "model": model,
                "phase": "discovered",
                "records": records,
                "pages": pages
            }),
            RebuildProgressEvent::Attempt {
                model,
                attempt,
                start_page,
                pages,
            } => serde_json::json!({
                "event": "progress",
                "model": model,
                "phase": "paging",
                "attempt": attempt,
                "start_page": start_page,
                "pages": pages
            }),
            RebuildProgressEvent::Exhausted { model, next_page } => serde_json::json!({
                "event": "progress",
                "model": model,
                "phase": "exhausted",
                "next_page": next_page
            }),
            RebuildProgressEvent::Completed { model, attempts } => serde_json::json!({
                "event": "progress",
                "model": model,
                "phase": "completed",
                "attempts": attempts
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl RebuildProgressReporter for NoProgress {
    fn report(&self, _event: RebuildProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
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

    pub fn reporter(&self) -> Box<dyn RebuildProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
