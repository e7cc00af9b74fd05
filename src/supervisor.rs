//! Process supervisor for rebuild workers.
//!
//! Each attempt runs one worker under a [`ResourceCeiling`] and classifies how
//! it ended. Exhaustion is recognised only by the typed signal: exit code
//! [`EXIT_RESOURCE_EXHAUSTED`] together with an `exhausted` [`WorkerReport`]
//! line on stdout. Any other ending is fatal.
//!
//! A worker process's stderr is forwarded to ours line by line; its tail is
//! kept so a failed worker's own error message ends up in the diagnostic.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::worker::{
    run_worker, ResourceCeiling, WorkerContext, WorkerJob, WorkerReport, WorkerStatus,
    EXIT_RESOURCE_EXHAUSTED,
};

/// How a worker attempt ended, as observed from outside the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code; `None` when the worker was killed by a signal.
    pub code: Option<i32>,
    pub report: Option<WorkerReport>,
    pub diagnostic: Option<String>,
}

#[derive(Debug)]
pub enum WorkerOutcome {
    Success { pages: u64 },
    ResourceExhausted { next_page: u64 },
    Fatal(anyhow::Error),
}

/// Map a worker exit onto an outcome.
pub fn classify(exit: WorkerExit) -> WorkerOutcome {
    let WorkerExit {
        code,
        report,
        diagnostic,
    } = exit;

    match (code, report) {
        (Some(0), Some(report)) if report.status == WorkerStatus::Completed => {
            WorkerOutcome::Success { pages: report.pages }
        }
        (Some(EXIT_RESOURCE_EXHAUSTED), Some(report)) if report.status == WorkerStatus::Exhausted => {
            WorkerOutcome::ResourceExhausted {
                next_page: report.next_page,
            }
        }
        (Some(0), _) | (Some(EXIT_RESOURCE_EXHAUSTED), _) => {
            WorkerOutcome::Fatal(anyhow!("worker exited with status {} without a valid report", code.unwrap_or_default()))
        }
        (Some(code), _) => WorkerOutcome::Fatal(match diagnostic {
            Some(msg) => anyhow!("worker exited with status {}: {}", code, msg),
            None => anyhow!("worker exited with status {}", code),
        }),
        (None, _) => WorkerOutcome::Fatal(anyhow!("worker was terminated by a signal")),
    }
}

/// Stderr lines of a worker process kept for its diagnostic.
const STDERR_TAIL_LINES: usize = 32;

/// Extract the failure message from the tail of a worker's stderr.
///
/// A worker failing with an error prints `Error: <message>` followed by an
/// optional `Caused by:` list; the message and its causes are joined with
/// `": "`. Without such a line the last non-empty line is used.
pub fn worker_diagnostic(lines: &[String]) -> Option<String> {
    let Some(pos) = lines.iter().rposition(|l| l.starts_with("Error: ")) else {
        return lines
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .map(str::to_string);
    };

    let mut parts = vec![lines[pos]["Error: ".len()..].trim().to_string()];
    for line in &lines[pos + 1..] {
        let line = line.trim();
        if line.is_empty() || line == "Caused by:" {
            continue;
        }
        if line.starts_with("Stack backtrace:") {
            break;
        }
        let cause = match line.split_once(": ") {
            Some((n, rest)) if n.chars().all(|c| c.is_ascii_digit()) => rest,
            _ => line,
        };
        parts.push(cause.to_string());
    }
    Some(parts.join(": "))
}

/// Starts one worker attempt and waits for it to end.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn launch(&self, job: &WorkerJob) -> Result<WorkerExit>;
}

/// Runs each worker as a child process of the current binary.
///
/// The child re-reads the application config, so it only needs the
/// application name, environment and config directory besides the job.
pub struct ProcessLauncher {
    exe: PathBuf,
    config_dir: PathBuf,
    application: String,
    environment: String,
    ceiling: ResourceCeiling,
}

impl ProcessLauncher {
    pub fn new(
        exe: PathBuf,
        config_dir: PathBuf,
        application: impl Into<String>,
        environment: impl Into<String>,
        ceiling: ResourceCeiling,
    ) -> Self {
        Self {
            exe,
            config_dir,
            application: application.into(),
            environment: environment.into(),
            ceiling,
        }
    }

    /// Launcher re-executing the running binary.
    pub fn current_exe(
        config_dir: PathBuf,
        application: impl Into<String>,
        environment: impl Into<String>,
        ceiling: ResourceCeiling,
    ) -> Result<Self> {
        let exe = std::env::current_exe().context("Failed to locate the running executable")?;
        Ok(Self::new(exe, config_dir, application, environment, ceiling))
    }

    fn command(&self, job: &WorkerJob) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.arg("--config-dir")
            .arg(&self.config_dir)
            .arg("--env")
            .arg(&self.environment)
            .arg("worker")
            .arg(&self.application)
            .arg(&job.index)
            .arg(&job.culture)
            .arg(&job.model)
            .arg("--page-size")
            .arg(job.page_size.to_string())
            .arg("--start-page")
            .arg(job.start_page.to_string());
        if let Some(bytes) = self.ceiling.memory_limit_bytes {
            cmd.arg("--memory-mb").arg((bytes / (1024 * 1024)).max(1).to_string());
        }
        if let Some(pages) = self.ceiling.max_pages {
            cmd.arg("--max-pages").arg(pages.to_string());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, job: &WorkerJob) -> Result<WorkerExit> {
        let mut child = self
            .command(job)
            .spawn()
            .with_context(|| format!("Failed to spawn worker {}", self.exe.display()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("worker stdout is not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("worker stderr is not piped"))?;

        let tee = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            while let Ok(Some(line)) = lines.next_line().await {
                eprintln!("{}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail)
        });

        let mut out = String::new();
        stdout
            .read_to_string(&mut out)
            .await
            .context("Failed to read worker output")?;
        let status = child.wait().await.context("Failed to wait for worker")?;
        let tail = tee.await.unwrap_or_default();

        let report = out
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .and_then(|line| serde_json::from_str::<WorkerReport>(line).ok());

        Ok(WorkerExit {
            code: status.code(),
            report,
            diagnostic: worker_diagnostic(&tail),
        })
    }
}

/// Runs workers inside the current process.
///
/// The resource ceiling still applies, but memory is measured for the whole
/// process, so this launcher is meant for tests and embedders whose stores
/// cannot be shared with a child process.
pub struct InProcessLauncher {
    ctx: WorkerContext,
    ceiling: ResourceCeiling,
}

impl InProcessLauncher {
    pub fn new(ctx: WorkerContext, ceiling: ResourceCeiling) -> Self {
        Self { ctx, ceiling }
    }
}

#[async_trait]
impl WorkerLauncher for InProcessLauncher {
    async fn launch(&self, job: &WorkerJob) -> Result<WorkerExit> {
        Ok(match run_worker(&self.ctx, job, &self.ceiling).await {
            Ok(report) => WorkerExit {
                code: Some(match report.status {
                    WorkerStatus::Completed => 0,
                    WorkerStatus::Exhausted => EXIT_RESOURCE_EXHAUSTED,
                }),
                report: Some(report),
                diagnostic: None,
            },
            Err(e) => WorkerExit {
                code: Some(1),
                report: None,
                diagnostic: Some(format!("{:#}", e)),
            },
        })
    }
}

/// Spawns workers one at a time and counts the attempts.
pub struct Supervisor {
    launcher: Box<dyn WorkerLauncher>,
    spawned: u64,
}

impl Supervisor {
    pub fn new(launcher: Box<dyn WorkerLauncher>) -> Self {
        Self {
            launcher,
            spawned: 0,
        }
    }

    /// Attempts spawned so far.
    pub fn spawned(&self) -> u64 {
        self.spawned
    }

    pub async fn run_once(&mut self, job: &WorkerJob) -> WorkerOutcome {
        self.spawned += 1;
        tracing::debug!(
            model = %job.model,
            start_page = job.start_page,
            attempt = self.spawned,
            "spawning worker"
        );
        match self.launcher.launch(job).await {
            Ok(exit) => classify(exit),
            Err(e) => WorkerOutcome::Fatal(e),
        }
    }
}
