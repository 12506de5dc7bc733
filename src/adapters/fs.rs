//! Filesystem blob store.
//!
//! One file per key under a root directory. Objects are written to a
//! temporary file beside their final path and linked into place only when
//! complete, so readers never see a partial body and an existing object is
//! never overwritten. Metadata lives in a sidecar file.

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tempfile::Builder;
use tracing::debug;

use super::{BlobStore, StoreError};

const META_SUFFIX: &str = ".meta.json";
const TEMP_PREFIX: &str = ".incoming-";

/// Write-once object storage on the local filesystem
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map an object key onto a path inside the root.
    ///
    /// Keys are `/`-separated and may not escape the root.
    fn object_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StoreError::Unavailable(format!("invalid object key: {}", key)));
        }
        Ok(self.root.join(relative))
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put_if_absent(
        &self,
        key: &str,
        body: &[u8],
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool, StoreError> {
        let path = self.object_path(key)?;
        let meta = serde_json::to_vec(metadata)?;
        let body = body.to_vec();

        let written = tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let parent = path.parent().unwrap_or(Path::new("."));
            std::fs::create_dir_all(parent)?;
            if path.exists() {
                return Ok(false);
            }

            let mut staged = Builder::new().prefix(TEMP_PREFIX).tempfile_in(parent)?;
            staged.write_all(&body)?;
            staged.as_file().sync_all()?;

            match staged.persist_noclobber(&path) {
                Ok(_) => {}
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => return Ok(false),
                Err(e) => return Err(e.error.into()),
            }

            // Only the writer that published the body writes its sidecar
            let mut sidecar = Builder::new().prefix(TEMP_PREFIX).tempfile_in(parent)?;
            sidecar.write_all(&meta)?;
            sidecar
                .persist(Self::meta_path(&path))
                .map_err(|e| StoreError::from(e.error))?;
            Ok(true)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blob write task failed: {}", e)))??;

        debug!(key, written, "Blob put_if_absent");
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.object_path(key)?;

        tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>, StoreError> {
            match std::fs::read(&path) {
                Ok(body) => Ok(Some(body)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blob read task failed: {}", e)))?
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!(
            "{}/**/*",
            glob::Pattern::escape(&self.root.to_string_lossy())
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| StoreError::Unavailable(format!("bad listing pattern: {}", e)))?;

        let mut keys = Vec::new();
        for entry in entries.flatten() {
            if !entry.is_file() {
                continue;
            }
            let Ok(relative) = entry.strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let staged = entry
                .file_name()
                .is_some_and(|name| name.to_string_lossy().starts_with(TEMP_PREFIX));
            if staged || key.ends_with(META_SUFFIX) || !key.starts_with(prefix) {
                continue;
            }
            keys.push(key);
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_once_and_read_back() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());
        let meta = BTreeMap::from([("checksum".to_string(), "abc".to_string())]);

        assert!(store.put_if_absent("logs/t1/i1/a.jsonl", b"first", &meta).await.unwrap());
        assert!(!store.put_if_absent("logs/t1/i1/a.jsonl", b"second", &meta).await.unwrap());

        let body = store.get("logs/t1/i1/a.jsonl").await.unwrap();
        assert_eq!(body, Some(b"first".to_vec()));
        assert!(temp.path().join("logs/t1/i1/a.jsonl.meta.json").exists());
    }

    #[tokio::test]
    async fn test_list_filters_prefix_and_sidecars() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());
        let meta = BTreeMap::new();

        store.put_if_absent("logs/t1/i1/2.jsonl", b"x", &meta).await.unwrap();
        store.put_if_absent("logs/t1/i1/1.jsonl", b"x", &meta).await.unwrap();
        store.put_if_absent("logs/t1/i2/1.jsonl", b"x", &meta).await.unwrap();

        let keys = store.list("logs/t1/i1/").await.unwrap();
        assert_eq!(keys, vec!["logs/t1/i1/1.jsonl", "logs/t1/i1/2.jsonl"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_see_whole_bodies() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());
        let key = "logs/t1/i1/race.jsonl";

        let mut writers = Vec::new();
        for n in 0..8u8 {
            let store = store.clone();
            writers.push(tokio::spawn(async move {
                let body = vec![b'a' + n; 64 * 1024];
                store.put_if_absent(key, &body, &BTreeMap::new()).await.unwrap()
            }));
        }
        let mut readers = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            readers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..20 {
                    seen.push(store.get(key).await.unwrap());
                    tokio::task::yield_now().await;
                }
                seen
            }));
        }

        let mut winners = 0;
        for writer in writers {
            if writer.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);

        let stored = store.get(key).await.unwrap().unwrap();
        assert_eq!(stored.len(), 64 * 1024);
        for reader in readers {
            for body in reader.await.unwrap().into_iter().flatten() {
                assert_eq!(body, stored);
            }
        }
        assert_eq!(store.list("logs/").await.unwrap(), vec![key]);
    }

    #[tokio::test]
    async fn test_missing_object_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let temp = TempDir::new().unwrap();
        let store = FsBlobStore::new(temp.path());
        let result = store.put_if_absent("../outside", b"x", &BTreeMap::new()).await;
        assert!(result.is_err());
    }
}
