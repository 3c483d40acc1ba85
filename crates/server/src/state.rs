// crates/server/src/state.rs
//! Application state for the Axum server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use ytdlp_webui_core::{CallCodec, Registry};

use crate::config::Config;
use crate::connections::ConnectionTracker;
use crate::downloader::Downloader;
use crate::service::DownloadService;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Durable job registry, shared with the auto-persist task.
    pub registry: Arc<Registry>,
    /// Call codec both transports dispatch through.
    pub codec: CallCodec,
    pub downloader: Arc<Downloader>,
    /// Root of every file the file routes may list, serve or delete.
    pub download_dir: PathBuf,
    /// Open stream connections.
    pub connections: Arc<ConnectionTracker>,
    /// Built frontend, served for every unmatched path. API-only when `None`.
    pub static_dir: Option<PathBuf>,
    pub persist_interval: Duration,
    pub shutdown_grace: Duration,
    /// Fires once when the server starts shutting down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the service, downloader and codec around an already restored registry.
    pub fn new(config: &Config, registry: Arc<Registry>, shutdown: CancellationToken) -> Arc<Self> {
        let download_dir = config.download_dir();
        let downloader = Arc::new(Downloader::new(
            config.downloader.clone(),
            download_dir.clone(),
            Arc::clone(&registry),
        ));
        let service = DownloadService::new(Arc::clone(&registry), Arc::clone(&downloader));
        let interrupted = service.fail_interrupted();
        if interrupted > 0 {
            tracing::warn!(interrupted, "restored jobs had no running download");
        }

        Arc::new(Self {
            start_time: Instant::now(),
            registry,
            codec: CallCodec::new(Arc::new(service)),
            downloader,
            download_dir,
            connections: Arc::new(ConnectionTracker::new()),
            static_dir: config.static_dir.clone(),
            persist_interval: config.persist_interval(),
            shutdown_grace: config.shutdown_grace(),
            shutdown,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
