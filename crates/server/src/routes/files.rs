//! Download directory routes used by the frontend's archive view.
//!
//! - `POST /downloaded` - list files, newest first
//! - `POST /delete` - remove one file
//! - `GET /d/{id}` - stream one file; `id` is the hex-encoded relative path
//!
//! Every path is resolved against the download directory and rejected if it
//! lands outside of it, symlinks included.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path as UrlPath, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// One file in the download directory.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct DownloadedFile {
    pub name: String,
    /// Absolute path on the server.
    pub path: String,
    /// Hex-encoded path relative to the download directory, for `GET /d/{id}`.
    pub id: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: String,
}

/// POST /downloaded - every file under the download directory, newest first.
pub async fn list_downloaded(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DownloadedFile>>> {
    let root = state.download_dir.clone();
    if !tokio::fs::try_exists(&root).await? {
        return Ok(Json(Vec::new()));
    }

    let mut files = Vec::new();
    let mut pending = vec![root.clone()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            let path = entry.path();
            if meta.is_dir() {
                pending.push(path);
                continue;
            }
            // Partial downloads are not listed
            if path.extension().is_some_and(|ext| ext == "part" || ext == "ytdl") {
                continue;
            }
            let relative = path.strip_prefix(&root).unwrap_or(&path);
            files.push(DownloadedFile {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: path.display().to_string(),
                id: hex::encode(relative.to_string_lossy().as_bytes()),
                size: meta.len(),
                modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or_default(),
            });
        }
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(Json(files))
}

/// POST /delete - remove one file from the download directory.
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeleteRequest>,
) -> ApiResult<Json<DeleteResponse>> {
    let path = resolve(&state.download_dir, Path::new(&req.path))?;
    if tokio::fs::metadata(&path).await?.is_dir() {
        return Err(ApiError::BadRequest(format!("{} is a directory", req.path)));
    }
    tokio::fs::remove_file(&path).await?;
    tracing::info!(path = %path.display(), "downloaded file deleted");
    Ok(Json(DeleteResponse {
        deleted: path.display().to_string(),
    }))
}

/// GET /d/{id} - stream a downloaded file as an attachment.
pub async fn send_file(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<String>,
) -> ApiResult<Response> {
    let decoded = hex::decode(&id).map_err(|e| ApiError::BadRequest(format!("invalid file id: {e}")))?;
    let relative = String::from_utf8(decoded)
        .map_err(|_| ApiError::BadRequest("file id is not valid UTF-8".into()))?;
    let path = resolve(&state.download_dir, Path::new(&relative))?;

    let file = tokio::fs::File::open(&path).await?;
    let len = file.metadata().await?.len();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', "'"))
        .unwrap_or_else(|| "download".to_string());

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{name}\"")),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// Resolve `requested` inside `root`.
///
/// `..` components and absolute paths outside `root` are a 400. A path that
/// does not exist is a 404. A symlink pointing out of `root` is a 400.
pub fn resolve(root: &Path, requested: &Path) -> ApiResult<PathBuf> {
    let outside = || {
        ApiError::BadRequest(format!(
            "{} is outside the download directory",
            requested.display()
        ))
    };
    // Absolute paths are the ones the listing hands out: root plus a relative part
    let relative = if requested.is_absolute() {
        requested.strip_prefix(root).map_err(|_| outside())?
    } else {
        requested
    };
    if relative.as_os_str().is_empty()
        || relative.components().any(|c| matches!(c, Component::ParentDir))
    {
        return Err(outside());
    }

    let joined = root.join(relative);

    let canonical = match std::fs::canonicalize(&joined) {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::FileNotFound(requested.display().to_string()))
        }
        Err(e) => return Err(ApiError::Io(e)),
    };
    let canonical_root = std::fs::canonicalize(root)?;
    if !canonical.starts_with(&canonical_root) || canonical == canonical_root {
        return Err(outside());
    }
    Ok(canonical)
}

/// Create the file routes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/downloaded", post(list_downloaded))
        .route("/delete", post(delete_file))
        .route("/d/{id}", get(send_file))
}
