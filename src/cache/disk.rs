//! Persistent layer behind the in-memory research cache.
//!
//! Entries are stored as one JSON file per key, named by the SHA-256 of the
//! key so arbitrary keys map to safe file names.

use crate::error::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::debug;

/// Durable key/value storage for serialized cache entries.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Load the payload stored under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<String>>;

    /// Store `payload` under `key`, replacing any previous value.
    async fn save(&self, key: &str, payload: &str) -> Result<()>;

    /// Remove the entry for `key`. Missing entries are not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every entry.
    async fn clear(&self) -> Result<()>;

    /// Every stored payload, in no particular order.
    async fn payloads(&self) -> Result<Vec<String>>;
}

/// File-per-entry store rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Open (creating if needed) a store in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        self.dir.join(format!("{:x}.json", hasher.finalize()))
    }

    async fn entry_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, payload: &str) -> Result<()> {
        let path = self.entry_path(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("Persisted cache entry to {}", path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<()> {
        for path in self.entry_files().await? {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn payloads(&self) -> Result<Vec<String>> {
        let mut payloads = Vec::new();
        for path in self.entry_files().await? {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => payloads.push(content),
                // Removed by a concurrent writer since listing.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(payloads)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_load_remove() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path().join("cache")).unwrap();

        assert_eq!(store.load("key").await.unwrap(), None);

        store.save("key", "{\"v\":1}").await.unwrap();
        assert_eq!(store.load("key").await.unwrap().as_deref(), Some("{\"v\":1}"));

        store.remove("key").await.unwrap();
        assert_eq!(store.load("key").await.unwrap(), None);
        store.remove("key").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_with_path_characters_are_safe() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();

        store.save("../../escape me", "x").await.unwrap();
        assert_eq!(
            store.load("../../escape me").await.unwrap().as_deref(),
            Some("x")
        );
        assert!(store.entry_path("../../escape me").starts_with(temp.path()));
    }

    #[tokio::test]
    async fn test_clear() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();
        store.save("a", "1").await.unwrap();
        store.save("b", "2").await.unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.load("a").await.unwrap(), None);
        assert_eq!(store.load("b").await.unwrap(), None);
        assert!(store.payloads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payloads_lists_every_entry() {
        let temp = TempDir::new().unwrap();
        let store = DiskStore::new(temp.path()).unwrap();
        store.save("a", "1").await.unwrap();
        store.save("b", "2").await.unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        let mut payloads = store.payloads().await.unwrap();
        payloads.sort();
        assert_eq!(payloads, vec!["1", "2"]);
    }
}
