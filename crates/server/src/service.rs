//! The download service bound behind the RPC bridge.
//!
//! Every method reads or mutates the shared [`Registry`]; process handling is
//! delegated to the [`Downloader`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ytdlp_webui_core::rpc::{parse_params, to_result};
use ytdlp_webui_core::{CallError, JobRecord, JobStatus, Registry, Service};

use crate::downloader::Downloader;

/// Name the service is registered under on the wire.
pub const SERVICE_NAME: &str = "Service";

/// Error recorded on jobs that were still running when the server stopped.
pub const INTERRUPTED: &str = "interrupted by server restart";

#[derive(Debug, Deserialize)]
struct ExecArgs {
    url: String,
    #[serde(default)]
    params: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeSpace {
    path: String,
    available_bytes: u64,
}

/// Download job service.
pub struct DownloadService {
    registry: Arc<Registry>,
    downloader: Arc<Downloader>,
}

impl DownloadService {
    pub fn new(registry: Arc<Registry>, downloader: Arc<Downloader>) -> Self {
        Self {
            registry,
            downloader,
        }
    }

    /// Fail every unfinished job that has no running tool behind it.
    ///
    /// Restored records keep whatever status they were persisted with, so a
    /// job that was downloading when the server stopped would otherwise stay
    /// pending forever. Returns how many were marked.
    pub fn fail_interrupted(&self) -> usize {
        let stale: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|r| !r.status.is_finished() && !self.downloader.is_active(&r.id))
            .map(|r| r.id)
            .collect();
        for id in &stale {
            self.registry.update(id, |r| {
                r.status = JobStatus::Failed;
                r.error = Some(INTERRUPTED.to_string());
            });
            tracing::warn!(job_id = %id, "job interrupted by restart");
        }
        stale.len()
    }

    fn exec(&self, args: ExecArgs) -> Result<String, CallError> {
        let url = args.url.trim();
        if url.is_empty() {
            return Err(CallError::service("url must not be empty"));
        }
        let job = JobRecord::new(url, args.params);
        let id = job.id.clone();
        self.registry.put(job);
        self.downloader.start(id.clone());
        tracing::info!(job_id = %id, url = %url, "job queued");
        Ok(id)
    }

    fn progress(&self, args: IdArgs) -> Result<JobRecord, CallError> {
        self.registry
            .get(&args.id)
            .ok_or_else(|| CallError::service(format!("job {} not found", args.id)))
    }

    fn pending(&self) -> Vec<String> {
        self.registry
            .list()
            .into_iter()
            .filter(|r| !r.status.is_finished())
            .map(|r| r.id)
            .collect()
    }

    fn kill(&self, args: IdArgs) -> Result<String, CallError> {
        self.downloader.cancel(&args.id);
        match self.registry.delete(&args.id) {
            Some(_) => {
                tracing::info!(job_id = %args.id, "job removed");
                Ok(args.id)
            }
            None => Err(CallError::service(format!("job {} not found", args.id))),
        }
    }

    fn kill_all(&self) -> usize {
        self.downloader.cancel_all();
        let removed = self.registry.delete_where(|_| true).len();
        tracing::info!(removed, "all jobs removed");
        removed
    }

    fn clear(&self) -> usize {
        self.registry
            .delete_where(|r| r.status.is_finished())
            .len()
    }

    async fn free_space(&self) -> Result<FreeSpace, CallError> {
        let dir = self.downloader.download_dir().clone();
        tokio::task::spawn_blocking(move || available_space(&dir))
            .await
            .map_err(|e| CallError::service(e.to_string()))?
    }
}

#[async_trait]
impl Service for DownloadService {
    fn name(&self) -> &str {
        SERVICE_NAME
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        match method {
            "Exec" => to_result(self.exec(parse_params(method, params)?)?),
            "Progress" => to_result(self.progress(parse_params(method, params)?)?),
            "Running" => to_result(self.registry.list()),
            "Pending" => to_result(self.pending()),
            "Kill" => to_result(self.kill(parse_params(method, params)?)?),
            "KillAll" => to_result(self.kill_all()),
            "Clear" => to_result(self.clear()),
            "FreeSpace" => to_result(self.free_space().await?),
            _ => Err(CallError::MethodNotFound(method.to_string())),
        }
    }
}

/// Free bytes on the disk holding `dir` (longest matching mount point).
fn available_space(dir: &Path) -> Result<FreeSpace, CallError> {
    let target: PathBuf = std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let disks = sysinfo::Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|d| target.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| FreeSpace {
            path: target.display().to_string(),
            available_bytes: d.available_space(),
        })
        .ok_or_else(|| CallError::service(format!("no disk found for {}", target.display())))
}
