// crates/core/src/types.rs
//! Job records held by the registry and persisted in the snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registry key for a job.
pub type JobId = String;

/// Lifecycle of a single download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Downloading,
    Completed,
    Failed,
    Killed,
}

impl JobStatus {
    /// True once the job will not change on its own anymore.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Killed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Downloading => write!(f, "downloading"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Killed => write!(f, "killed"),
        }
    }
}

/// Last progress line reported by the download tool.
///
/// Values are kept as the tool prints them ("42.0%", "1.20MiB/s", "00:13").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadProgress {
    pub percentage: String,
    pub speed: String,
    pub eta: String,
}

/// Media metadata, filled in once the tool has resolved the URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

/// One persisted job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub url: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default)]
    pub progress: DownloadProgress,
    #[serde(default)]
    pub info: DownloadInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl JobRecord {
    /// New pending job with a fresh v4 id.
    pub fn new(url: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
            params,
            status: JobStatus::Pending,
            progress: DownloadProgress::default(),
            info: DownloadInfo::default(),
            output: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}
