//! Command-line and environment configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 3033;

/// Seconds between automatic registry snapshots.
pub const DEFAULT_PERSIST_INTERVAL_SECS: u64 = 300;

/// Seconds in-flight connections get to finish after a shutdown signal.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Web UI and RPC bridge for a command-line download tool.
#[derive(Debug, Clone, Parser)]
#[command(name = "ytdlp-webui", version, about)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "YTDLP_WEBUI_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "YTDLP_WEBUI_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Where downloaded files are written. Defaults to the user's Downloads folder.
    #[arg(short = 'o', long = "out", env = "YTDLP_WEBUI_DOWNLOAD_DIR")]
    pub download_dir: Option<PathBuf>,

    /// Path of the download tool executable.
    #[arg(long = "driver", env = "YTDLP_WEBUI_DRIVER", default_value = "yt-dlp")]
    pub downloader: PathBuf,

    /// Registry snapshot file. Defaults to `session.json` in the app data directory.
    #[arg(long = "session", env = "YTDLP_WEBUI_SESSION")]
    pub snapshot_path: Option<PathBuf>,

    /// Directory holding the built frontend. API-only when absent.
    #[arg(long, env = "YTDLP_WEBUI_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Seconds between automatic registry snapshots.
    #[arg(long = "persist-interval", env = "YTDLP_WEBUI_PERSIST_INTERVAL", default_value_t = DEFAULT_PERSIST_INTERVAL_SECS)]
    pub persist_interval_secs: u64,

    /// Seconds to let open connections drain on shutdown.
    #[arg(long = "shutdown-grace", env = "YTDLP_WEBUI_SHUTDOWN_GRACE", default_value_t = DEFAULT_SHUTDOWN_GRACE_SECS)]
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn persist_interval(&self) -> Duration {
        // A zero interval would make tokio::time::interval panic.
        Duration::from_secs(self.persist_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Resolved download directory, always absolute.
    ///
    /// Priority:
    /// 1. `--out` / `YTDLP_WEBUI_DOWNLOAD_DIR`
    /// 2. the platform Downloads folder
    /// 3. `./downloads`
    ///
    /// Relative values are anchored at the working directory, so paths handed
    /// out by the file routes can be sent back as is.
    pub fn download_dir(&self) -> PathBuf {
        let dir = self
            .download_dir
            .clone()
            .or_else(ytdlp_webui_core::paths::download_dir)
            .unwrap_or_else(|| PathBuf::from("downloads"));
        std::path::absolute(&dir).unwrap_or(dir)
    }

    /// Resolved snapshot path, falling back to `./session.json`.
    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_path
            .clone()
            .or_else(ytdlp_webui_core::paths::snapshot_path)
            .unwrap_or_else(|| PathBuf::from("session.json"))
    }

    /// Configuration with every default, rooted at `dir`. Used by tests.
    pub fn for_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            download_dir: Some(dir.join("downloads")),
            downloader: PathBuf::from("yt-dlp"),
            snapshot_path: Some(dir.join("session.json")),
            static_dir: None,
            persist_interval_secs: DEFAULT_PERSIST_INTERVAL_SECS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}
