//! The content store itself.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use clipforge_models::ProjectId;

use crate::error::{ContentError, ContentResult};
use crate::layout::ProjectLayout;

/// Owns the `data/` tree. Cheap to clone; safe for concurrent callers.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open the store at `root`, creating the top-level directories. The
    /// root is made absolute so every path handed out is canonical.
    pub async fn new(root: impl Into<PathBuf>) -> ContentResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;

        for sub in ["projects", "temp", "cache", "uploads"] {
            fs::create_dir_all(root.join(sub)).await?;
        }

        Ok(Self { root })
    }

    /// Open the store at `STORAGE_ROOT` (default `./data`).
    pub async fn from_env() -> ContentResult<Self> {
        let root = std::env::var("STORAGE_ROOT").unwrap_or_else(|_| "./data".to_string());
        Self::new(root).await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn projects_root(&self) -> PathBuf {
        self.root.join("projects")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Path helpers for one project.
    pub fn project(&self, project_id: &ProjectId) -> ProjectLayout {
        ProjectLayout::new(&self.projects_root(), project_id)
    }

    /// A fresh scratch path under `temp/` for staging work.
    pub fn scratch_path(&self, suffix: &str) -> PathBuf {
        self.temp_dir().join(format!("{}-{suffix}", Uuid::new_v4()))
    }

    /// Write `bytes` to `rel_path` under the project directory atomically
    /// and return the canonical absolute path.
    pub async fn save(
        &self,
        project_id: &ProjectId,
        rel_path: &str,
        bytes: &[u8],
    ) -> ContentResult<PathBuf> {
        let rel = sanitize_rel_path(rel_path)?;
        let path = self.project(project_id).project_dir().join(rel);
        self.write_atomic(&path, bytes).await?;
        Ok(path)
    }

    /// Atomic write to an absolute path inside the tree: write a temp
    /// sibling, then rename over the target.
    pub async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> ContentResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| ContentError::invalid_path(path.display().to_string()))?;
        fs::create_dir_all(parent).await?;

        let tmp = parent.join(format!(
            ".{}.tmp-{}",
            path.file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("artifact"),
            Uuid::new_v4()
        ));

        if let Err(e) = fs::write(&tmp, bytes).await {
            // Leave nothing behind on a failed write.
            fs::remove_file(&tmp).await.ok();
            return Err(ContentError::Io(e));
        }
        if let Err(e) = fs::rename(&tmp, path).await {
            fs::remove_file(&tmp).await.ok();
            return Err(ContentError::Io(e));
        }

        debug!(path = %path.display(), bytes = bytes.len(), "wrote artifact");
        Ok(())
    }

    /// Serialize `value` as pretty JSON and write it atomically.
    pub async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> ContentResult<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(path, &bytes).await
    }

    /// Open a file for streaming reads.
    pub async fn open(&self, path: &Path) -> ContentResult<fs::File> {
        match fs::File::open(path).await {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ContentError::not_found(path.display().to_string()))
            }
            Err(e) => Err(ContentError::Io(e)),
        }
    }

    pub async fn read(&self, path: &Path) -> ContentResult<Vec<u8>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ContentError::not_found(path.display().to_string()))
            }
            Err(e) => Err(ContentError::Io(e)),
        }
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> ContentResult<T> {
        let bytes = self.read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn exists(&self, path: &Path) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    /// Move an uploaded file into the project's raw area. Falls back to
    /// copy+remove across filesystems.
    pub async fn adopt_upload(&self, upload: &Path, dest: &Path) -> ContentResult<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        match fs::rename(upload, dest).await {
            Ok(()) => Ok(()),
            Err(_) => {
                fs::copy(upload, dest).await?;
                fs::remove_file(upload).await.ok();
                Ok(())
            }
        }
    }

    /// Delete files under `temp/` older than `age`.
    pub async fn cleanup_temp(&self, age: Duration) -> ContentResult<u32> {
        let cutoff = SystemTime::now() - age;
        let mut removed = 0u32;

        let mut entries = fs::read_dir(self.temp_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if modified < cutoff {
                let path = entry.path();
                let result = if meta.is_dir() {
                    fs::remove_dir_all(&path).await
                } else {
                    fs::remove_file(&path).await
                };
                match result {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), "failed to remove temp entry: {e}"),
                }
            }
        }

        if removed > 0 {
            debug!(removed, "cleaned temp files");
        }
        Ok(removed)
    }

    /// Recursive size of a project's directory in bytes.
    pub async fn project_size(&self, project_id: &ProjectId) -> ContentResult<u64> {
        let dir = self.project(project_id).project_dir().to_path_buf();
        if !self.exists(&dir).await {
            return Ok(0);
        }
        dir_size(dir).await
    }

    /// Best-effort removal of a project's directory tree.
    pub async fn remove_project(&self, project_id: &ProjectId) -> ContentResult<()> {
        let dir = self.project(project_id).project_dir().to_path_buf();
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContentError::Io(e)),
        }
    }
}

/// Reject path components that would escape the project directory.
fn sanitize_rel_path(rel: &str) -> ContentResult<PathBuf> {
    let path = Path::new(rel);
    if path.is_absolute() {
        return Err(ContentError::invalid_path(format!(
            "absolute path not allowed: {rel}"
        )));
    }
    for component in path.components() {
        match component {
            std::path::Component::Normal(_) => {}
            _ => {
                return Err(ContentError::invalid_path(format!(
                    "path component not allowed: {rel}"
                )))
            }
        }
    }
    Ok(path.to_path_buf())
}

/// Iterative directory walk; avoids recursion in async context.
async fn dir_size(root: PathBuf) -> ContentResult<u64> {
    let mut total = 0u64;
    let mut stack = vec![root];

    while let Some(dir) = stack.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn save_returns_absolute_path() {
        let (_dir, store) = store().await;
        let id = ProjectId::from_string("p1");
        let path = store.save(&id, "raw/subtitle.srt", b"1\n").await.unwrap();
        assert!(path.is_absolute());
        assert_eq!(store.read(&path).await.unwrap(), b"1\n");
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let (_dir, store) = store().await;
        let id = ProjectId::from_string("p1");
        let layout = store.project(&id);
        store
            .write_json(&layout.outline(), &serde_json::json!({"chunks": 3}))
            .await
            .unwrap();

        let mut entries = fs::read_dir(layout.processing_dir()).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = entries.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["step1_outline.json"]);
    }

    #[tokio::test]
    async fn open_missing_is_not_found() {
        let (_dir, store) = store().await;
        let missing = store.root().join("projects/p1/raw/video.mp4");
        match store.open(&missing).await {
            Err(ContentError::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let (_dir, store) = store().await;
        let id = ProjectId::from_string("p1");
        assert!(store.save(&id, "../evil", b"x").await.is_err());
        assert!(store.save(&id, "/abs/evil", b"x").await.is_err());
    }

    #[tokio::test]
    async fn project_size_sums_recursively() {
        let (_dir, store) = store().await;
        let id = ProjectId::from_string("p1");
        store.save(&id, "raw/subtitle.srt", &[0u8; 10]).await.unwrap();
        store.save(&id, "processing/subtitle_chunks.json", &[0u8; 5]).await.unwrap();
        assert_eq!(store.project_size(&id).await.unwrap(), 15);
        assert_eq!(store.project_size(&ProjectId::from_string("nope")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cleanup_temp_respects_age() {
        let (_dir, store) = store().await;
        let fresh = store.scratch_path("fresh");
        fs::write(&fresh, b"x").await.unwrap();

        // A zero-age sweep removes everything, including fresh files.
        let removed = store.cleanup_temp(Duration::from_secs(0)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.exists(&fresh).await);
    }

    #[tokio::test]
    async fn remove_project_is_idempotent() {
        let (_dir, store) = store().await;
        let id = ProjectId::from_string("p1");
        store.save(&id, "raw/subtitle.srt", b"1").await.unwrap();
        store.remove_project(&id).await.unwrap();
        store.remove_project(&id).await.unwrap();
    }
}
