//! Key-value persistence for chat history and front end preferences.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::GenError;

/// Default directory for persisted state.
pub const DEFAULT_DATA_DIR: &str = ".genstudio/state";

/// Atomic counter for unique temp filenames.
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// String key-value store in the shape of browser local storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, GenError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), GenError>;
}

/// One file per key under a base directory.
pub struct FileStore {
    base_dir: PathBuf,
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FileStore {
    pub fn new() -> Self {
        Self {
            base_dir: PathBuf::from(DEFAULT_DATA_DIR),
        }
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(format!("{}.json", sanitize_key(key)))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GenError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GenError::Storage(format!("read {key}: {e}"))),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), GenError> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| GenError::Storage(format!("create {}: {e}", self.base_dir.display())))?;

        let path = self.path_for(key);
        let seq = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("{seq}.tmp"));

        // temp + rename so readers never observe a half-written value
        tokio::fs::write(&tmp_path, value.as_bytes())
            .await
            .map_err(|e| GenError::Storage(format!("write {key}: {e}")))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(GenError::Storage(format!("rename {key}: {e}")));
        }
        Ok(())
    }
}

/// In-process store; state is lost when dropped.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GenError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), GenError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Keys become filenames: only alphanumeric, `-`, `_` survive.
pub fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join("genstudio-test").join(name)
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = test_dir("file_store_roundtrip");
        let _ = tokio::fs::remove_dir_all(&dir).await;
        let store = FileStore::with_base_dir(dir.clone());

        assert_eq!(store.get("SelectedModel").await.unwrap(), None);
        store.set("SelectedModel", "gpt-4o-fast").await.unwrap();
        assert_eq!(
            store.get("SelectedModel").await.unwrap().as_deref(),
            Some("gpt-4o-fast")
        );

        store.set("SelectedModel", "o3-deep").await.unwrap();
        assert_eq!(
            store.get("SelectedModel").await.unwrap().as_deref(),
            Some("o3-deep")
        );

        let mut leftovers = tokio::fs::read_dir(&dir).await.unwrap();
        while let Some(entry) = leftovers.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            assert!(!name.ends_with(".tmp"), "temp file left behind: {name}");
        }
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn keys_are_sanitized() {
        assert_eq!(sanitize_key("ChatHistoryV1"), "ChatHistoryV1");
        assert_eq!(sanitize_key("../etc/passwd"), "___etc_passwd");
    }
}
