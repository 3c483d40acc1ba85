// crates/core/src/registry.rs
//! Durable job registry.
//!
//! Holds every known [`JobRecord`] in memory and writes the whole mapping to a
//! single snapshot file on `persist()`. The snapshot is swapped in with a
//! rename, so a reader of the file only ever sees the previous or the new
//! complete mapping.
//!
//! Uses `std::sync` locks (not `tokio::sync`) because no lock is ever held
//! across an `.await` point. The server runs `persist` on the blocking pool.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::RegistryError;
use crate::types::{JobId, JobRecord};

/// Snapshot format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: u32,
    jobs: &'a BTreeMap<JobId, JobRecord>,
}

#[derive(Deserialize)]
struct Snapshot {
    version: u32,
    jobs: BTreeMap<JobId, JobRecord>,
}

/// In-memory mapping from job id to record, backed by a snapshot file.
pub struct Registry {
    path: PathBuf,
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    /// Serializes whole persists so an older copy never lands after a newer one.
    persist_lock: Mutex<()>,
    persist_count: AtomicU64,
}

impl Registry {
    /// Empty registry whose snapshot lives at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            jobs: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
            persist_count: AtomicU64::new(0),
        }
    }

    /// Snapshot file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of successful persists since construction.
    pub fn persist_count(&self) -> u64 {
        self.persist_count.load(Ordering::Relaxed)
    }

    /// Load the snapshot into memory, replacing whatever is there.
    ///
    /// A missing file yields an empty registry. A file that does not parse, or
    /// whose keys disagree with the record ids, is `CorruptSnapshot` and leaves
    /// the in-memory state untouched.
    ///
    /// Returns the number of restored jobs.
    pub fn restore(&self) -> Result<usize, RegistryError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot found, starting empty");
                self.write_jobs().clear();
                return Ok(0);
            }
            Err(e) => return Err(RegistryError::io(&self.path, e)),
        };

        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| RegistryError::corrupt(&self.path, e.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RegistryError::corrupt(
                &self.path,
                format!("unsupported snapshot version {}", snapshot.version),
            ));
        }
        if let Some((key, record)) = snapshot.jobs.iter().find(|(k, r)| **k != r.id) {
            return Err(RegistryError::corrupt(
                &self.path,
                format!("key {key} holds record {}", record.id),
            ));
        }

        let restored: HashMap<JobId, JobRecord> = snapshot.jobs.into_iter().collect();
        let count = restored.len();
        *self.write_jobs() = restored;

        info!(path = %self.path.display(), jobs = count, "registry restored");
        Ok(count)
    }

    /// Write the complete current mapping to disk.
    ///
    /// The mapping is copied under the read lock and the lock is released
    /// before any file I/O. The copy goes to a temporary file next to the
    /// snapshot, is synced, then renamed over it.
    ///
    /// Returns the number of persisted jobs.
    pub fn persist(&self) -> Result<usize, RegistryError> {
        let _serial = self.lock_persist();

        let copy: BTreeMap<JobId, JobRecord> = self
            .read_jobs()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let encoded = serde_json::to_vec(&SnapshotRef {
            version: SNAPSHOT_VERSION,
            jobs: &copy,
        })
        .map_err(RegistryError::Encode)?;

        let dir = snapshot_dir(&self.path);
        std::fs::create_dir_all(dir).map_err(|e| RegistryError::io(dir, e))?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| RegistryError::io(dir, e))?;

        tmp.write_all(&encoded)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| RegistryError::io(tmp.path(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| RegistryError::io(&self.path, e.error))?;

        sync_dir(dir);

        self.persist_count.fetch_add(1, Ordering::Relaxed);
        debug!(path = %self.path.display(), jobs = copy.len(), "registry persisted");
        Ok(copy.len())
    }

    /// Clone of one record.
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.read_jobs().get(id).cloned()
    }

    /// Insert or replace a record under its own id. Returns the previous one.
    pub fn put(&self, record: JobRecord) -> Option<JobRecord> {
        self.write_jobs().insert(record.id.clone(), record)
    }

    /// Remove a record. Returns it if it existed.
    pub fn delete(&self, id: &str) -> Option<JobRecord> {
        self.write_jobs().remove(id)
    }

    /// Read-modify-write of one record under the write lock.
    ///
    /// Returns the updated clone, or `None` if the id is unknown.
    pub fn update<F>(&self, id: &str, f: F) -> Option<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.write_jobs();
        let record = jobs.get_mut(id)?;
        f(record);
        // The id is the key; a closure must not move a record under another key.
        record.id = id.to_string();
        Some(record.clone())
    }

    /// Remove every record matching `pred`. Returns the removed records.
    pub fn delete_where<F>(&self, mut pred: F) -> Vec<JobRecord>
    where
        F: FnMut(&JobRecord) -> bool,
    {
        let mut jobs = self.write_jobs();
        let ids: Vec<JobId> = jobs
            .values()
            .filter(|r| pred(r))
            .map(|r| r.id.clone())
            .collect();
        ids.iter().filter_map(|id| jobs.remove(id)).collect()
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let mut all: Vec<JobRecord> = self.read_jobs().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_jobs().is_empty()
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(|e| {
            error!("RwLock poisoned reading registry: {e}");
            e.into_inner()
        })
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(|e| {
            error!("RwLock poisoned writing registry: {e}");
            e.into_inner()
        })
    }

    fn lock_persist(&self) -> MutexGuard<'_, ()> {
        self.persist_lock.lock().unwrap_or_else(|e| {
            error!("Mutex poisoned persisting registry: {e}");
            e.into_inner()
        })
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("path", &self.path)
            .field("jobs", &self.len())
            .finish()
    }
}

fn snapshot_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

/// Make the rename itself durable. Best effort.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = std::fs::File::open(dir).and_then(|d| d.sync_all()) {
        debug!(dir = %dir.display(), error = %e, "directory fsync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
