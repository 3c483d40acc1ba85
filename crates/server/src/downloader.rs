//! Runs the external download tool for one job and mirrors its output into
//! the registry.
//!
//! The tool is told to print machine-readable lines:
//! - `[progress] <percent>|<speed>|<eta>` while downloading
//! - `[info] <title>|<thumbnail>|<resolution>|<size>|<ext>` once resolved
//! - `[output] <path>` after the file is moved into place

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use ytdlp_webui_core::{DownloadInfo, DownloadProgress, JobId, JobStatus, Registry};

const PROGRESS_TEMPLATE: &str =
    "download:[progress] %(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s";
const INFO_TEMPLATE: &str =
    "before_dl:[info] %(title)s|%(thumbnail)s|%(resolution)s|%(filesize_approx)s|%(ext)s";
const OUTPUT_TEMPLATE: &str = "after_move:[output] %(filepath)s";

/// One parsed line of tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolLine {
    Progress(DownloadProgress),
    Info(DownloadInfo),
    Output(String),
}

/// Parse a line printed with the templates above. Anything else is `None`.
pub fn parse_line(line: &str) -> Option<ToolLine> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix("[progress] ") {
        let mut parts = rest.split('|').map(str::trim);
        return Some(ToolLine::Progress(DownloadProgress {
            percentage: parts.next().unwrap_or_default().to_string(),
            speed: parts.next().unwrap_or_default().to_string(),
            eta: parts.next().unwrap_or_default().to_string(),
        }));
    }
    if let Some(rest) = line.strip_prefix("[info] ") {
        let fields: Vec<&str> = rest.split('|').map(str::trim).collect();
        // yt-dlp prints "NA" for fields it could not resolve
        let field = |i: usize| {
            fields
                .get(i)
                .filter(|v| !v.is_empty() && **v != "NA")
                .map(|v| v.to_string())
        };
        return Some(ToolLine::Info(DownloadInfo {
            title: field(0),
            thumbnail: field(1),
            resolution: field(2),
            size: field(3).and_then(|s| s.parse::<f64>().ok()).map(|s| s as u64),
            extension: field(4),
        }));
    }
    line.strip_prefix("[output] ")
        .map(|path| ToolLine::Output(path.trim().to_string()))
}

/// Spawns and tracks tool processes, one per job.
pub struct Downloader {
    executable: PathBuf,
    download_dir: PathBuf,
    registry: Arc<Registry>,
    active: RwLock<HashMap<JobId, CancellationToken>>,
}

impl Downloader {
    pub fn new(executable: PathBuf, download_dir: PathBuf, registry: Arc<Registry>) -> Self {
        Self {
            executable,
            download_dir,
            registry,
            active: RwLock::new(HashMap::new()),
        }
    }

    pub fn download_dir(&self) -> &PathBuf {
        &self.download_dir
    }

    /// Start the tool for a job already present in the registry.
    pub fn start(self: &Arc<Self>, id: JobId) {
        let token = self.register(id.clone());
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run(&id, token).await;
            this.write_active().remove(&id);
        });
    }

    fn register(&self, id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.write_active().insert(id, token.clone());
        token
    }

    /// Ask a running job to stop. Returns false if it was not running.
    pub fn cancel(&self, id: &str) -> bool {
        self.read_active().get(id).map(|t| t.cancel()).is_some()
    }

    /// Stop every running job. Returns how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let active = self.read_active();
        active.values().for_each(CancellationToken::cancel);
        active.len()
    }

    /// Whether a tool process is currently tracked for `id`.
    pub fn is_active(&self, id: &str) -> bool {
        self.read_active().contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.read_active().len()
    }

    fn read_active(&self) -> RwLockReadGuard<'_, HashMap<JobId, CancellationToken>> {
        self.active.read().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned reading active downloads: {e}");
            e.into_inner()
        })
    }

    fn write_active(&self) -> RwLockWriteGuard<'_, HashMap<JobId, CancellationToken>> {
        self.active.write().unwrap_or_else(|e| {
            tracing::error!("RwLock poisoned writing active downloads: {e}");
            e.into_inner()
        })
    }

    fn command(&self, url: &str, params: &[String]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.arg("--newline")
            .arg("--no-simulate")
            .arg("--progress")
            .args(["--progress-template", PROGRESS_TEMPLATE])
            .args(["--print", INFO_TEMPLATE])
            .args(["--print", OUTPUT_TEMPLATE])
            .arg("-P")
            .arg(&self.download_dir)
            .args(params)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, id: &str, token: CancellationToken) {
        let Some(job) = self.registry.get(id) else {
            tracing::warn!(job_id = %id, "job vanished before start");
            return;
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.download_dir).await {
            tracing::warn!(dir = %self.download_dir.display(), error = %e, "cannot create download dir");
        }

        let mut child = match self.command(&job.url, &job.params).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(
                    job_id = %id,
                    executable = %self.executable.display(),
                    error = %e,
                    "failed to start download tool"
                );
                self.finish(id, JobStatus::Failed, Some(format!("failed to start download tool: {e}")));
                return;
            }
        };

        self.registry.update(id, |r| r.status = JobStatus::Downloading);
        tracing::info!(job_id = %id, url = %job.url, "download started");

        // Keep the last stderr line as the failure message.
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut last = None;
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        last = Some(line);
                    }
                }
                last
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        if let Err(e) = child.start_kill() {
                            tracing::debug!(job_id = %id, error = %e, "kill failed");
                        }
                        let _ = child.wait().await;
                        self.finish(id, JobStatus::Killed, None);
                        tracing::info!(job_id = %id, "download killed");
                        return;
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => self.apply(id, &line),
                            Ok(None) => break,
                            Err(e) => {
                                tracing::debug!(job_id = %id, error = %e, "stdout read failed");
                                break;
                            }
                        }
                    }
                }
            }
        }

        let status = child.wait().await;
        let stderr_tail = match stderr_task {
            Some(task) => task.await.ok().flatten(),
            None => None,
        };

        match status {
            Ok(s) if s.success() => {
                self.finish(id, JobStatus::Completed, None);
                tracing::info!(job_id = %id, "download completed");
            }
            Ok(s) => {
                let message = stderr_tail.unwrap_or_else(|| format!("download tool exited with {s}"));
                tracing::warn!(job_id = %id, error = %message, "download failed");
                self.finish(id, JobStatus::Failed, Some(message));
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "waiting for download tool failed");
                self.finish(id, JobStatus::Failed, Some(e.to_string()));
            }
        }
    }

    fn apply(&self, id: &str, line: &str) {
        match parse_line(line) {
            Some(ToolLine::Progress(progress)) => {
                self.registry.update(id, |r| r.progress = progress);
            }
            Some(ToolLine::Info(info)) => {
                self.registry.update(id, |r| r.info = info);
            }
            Some(ToolLine::Output(path)) => {
                self.registry.update(id, |r| r.output = Some(path));
            }
            None => {}
        }
    }

    fn finish(&self, id: &str, status: JobStatus, error: Option<String>) {
        self.registry.update(id, |r| {
            r.status = status;
            r.error = error;
        });
    }
}
