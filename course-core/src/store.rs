use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::course::{Course, CourseId};
use crate::error::StoreError;

pub const SNAPSHOT_FILE: &str = "course_storage.json";

/// What the cache writes after every mutation.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    #[serde(default)]
    pub bookmarks: Vec<CourseId>,
    #[serde(default)]
    pub enrolled_courses: Vec<CourseId>,
    #[serde(default)]
    pub courses: Vec<Course>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` means nothing was ever saved.
    async fn load(&self) -> Result<Option<CacheSnapshot>, StoreError>;
    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), StoreError>;
}

/// JSON file written atomically through a `.json.tmp` sibling.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SNAPSHOT_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self) -> Result<Option<CacheSnapshot>, StoreError> {
        read_json_with_tmp_fallback(&self.path).await
    }

    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), StoreError> {
        write_json_atomic(&self.path, snapshot).await
    }
}

/// Reads `path`, falling back to its temp sibling when the main file does
/// not parse. A missing main file is not an error.
pub(crate) async fn read_json_with_tmp_fallback<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<T>(&bytes) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
            let tmp = path.with_extension("json.tmp");
            match tokio::fs::read(&tmp).await {
                Ok(tmp_bytes) => Ok(Some(serde_json::from_slice::<T>(&tmp_bytes)?)),
                Err(_) => Err(e.into()),
            }
        }
    }
}

pub(crate) async fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    write_json(path, value, false).await
}

/// Like [`write_json_atomic`], but the file is readable by the owner only.
pub(crate) async fn write_json_private<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    write_json(path, value, true).await
}

async fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
    private: bool,
) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    if private {
        write_owner_only(&tmp, &bytes).await?;
    } else {
        tokio::fs::write(&tmp, &bytes).await?;
    }
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), bytes = bytes.len(), private, "json written");
    Ok(())
}

#[cfg(unix)]
async fn write_owner_only(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    // `mode` only applies on creation; a leftover temp file keeps its old bits.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn write_owner_only(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// Keeps the last saved snapshot in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Option<CacheSnapshot>>>,
    fail_writes: Arc<AtomicBool>,
    saves: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: CacheSnapshot) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(snapshot))),
            ..Self::default()
        }
    }

    /// Makes every following `save` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn current(&self) -> Option<CacheSnapshot> {
        self.inner.read().await.clone()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn load(&self) -> Result<Option<CacheSnapshot>, StoreError> {
        Ok(self.inner.read().await.clone())
    }

    async fn save(&self, snapshot: &CacheSnapshot) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".into()));
        }
        *self.inner.write().await = Some(snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_uses_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        let snapshot = CacheSnapshot {
            bookmarks: vec![5],
            enrolled_courses: vec![3],
            courses: Vec::new(),
        };
        store.save(&snapshot).await.unwrap();

        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(raw.contains("\"enrolledCourses\""));
        assert!(!store.path().with_extension("json.tmp").exists());
        assert_eq!(store.load().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn courses_key_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::in_dir(dir.path());
        tokio::fs::write(store.path(), br#"{"bookmarks":[1],"enrolledCourses":[]}"#)
            .await
            .unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.bookmarks, vec![1]);
        assert!(loaded.courses.is_empty());
    }

    #[tokio::test]
    async fn memory_store_can_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(store.save(&CacheSnapshot::default()).await.is_err());
        store.set_fail_writes(false);
        store.save(&CacheSnapshot::default()).await.unwrap();
        assert_eq!(store.save_count(), 1);
    }
}
