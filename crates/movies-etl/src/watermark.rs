//! Watermark stores
//!
//! A watermark is the change marker of the last row a stream has handed out.
//! Stores keep one per [`StreamKey`]; an unknown key reads as the Unix epoch,
//! which is earlier than any row in the schema.
//!
//! Monotonicity is the reader's business. Stores persist whatever they are
//! given.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{EtlError, Result};
use crate::kind::StreamKey;

/// Watermark every stream starts from
pub const INITIAL_WATERMARK: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Persistent per-stream watermarks
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Current watermark of `key`, or [`INITIAL_WATERMARK`] if never saved
    async fn get(&self, key: &StreamKey) -> Result<DateTime<Utc>>;

    /// Durably record `marker` as the watermark of `key`
    async fn save(&self, key: &StreamKey, marker: DateTime<Utc>) -> Result<()>;

    /// Put `key` back to [`INITIAL_WATERMARK`]
    async fn reset(&self, key: &StreamKey) -> Result<()>;

    /// Every saved watermark, ordered by key
    async fn snapshot(&self) -> Result<BTreeMap<String, DateTime<Utc>>>;

    /// Reset every saved watermark
    async fn reset_all(&self) -> Result<()> {
        for key in self.snapshot().await?.into_keys() {
            self.reset(&StreamKey::from(key.as_str())).await?;
        }
        Ok(())
    }
}

/// In-memory store for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    marks: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryWatermarkStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self, key: &StreamKey) -> Result<DateTime<Utc>> {
        Ok(self
            .marks
            .read()
            .await
            .get(key.as_str())
            .copied()
            .unwrap_or(INITIAL_WATERMARK))
    }

    async fn save(&self, key: &StreamKey, marker: DateTime<Utc>) -> Result<()> {
        self.marks
            .write()
            .await
            .insert(key.as_str().to_string(), marker);
        Ok(())
    }

    async fn reset(&self, key: &StreamKey) -> Result<()> {
        self.marks.write().await.remove(key.as_str());
        Ok(())
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        Ok(self
            .marks
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect())
    }
}

/// File-backed store.
///
/// All watermarks live in one JSON document mapping key to an RFC 3339
/// timestamp. Every change rewrites the document through a temp file and a
/// rename, so a crash leaves either the old or the new document on disk.
#[derive(Debug)]
pub struct FileWatermarkStore {
    path: PathBuf,
    cache: RwLock<BTreeMap<String, DateTime<Utc>>>,
}

impl FileWatermarkStore {
    /// Open the store at `path`, loading the document if it exists.
    ///
    /// Creates the parent directory if needed. A document that cannot be
    /// parsed is an error rather than a silent restart from the epoch.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                EtlError::state(format!("failed to create state directory {:?}: {}", parent, e))
            })?;
        }

        let marks = match fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                EtlError::state(format!("corrupt watermark file {:?}: {}", path, e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(EtlError::state(format!(
                    "failed to read watermark file {:?}: {}",
                    path, e
                )))
            }
        };

        debug!("Loaded {} watermarks from {:?}", marks.len(), path);

        Ok(Self {
            path,
            cache: RwLock::new(marks),
        })
    }

    /// Path of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, marks: &BTreeMap<String, DateTime<Utc>>) -> Result<()> {
        let content = serde_json::to_string_pretty(marks)
            .map_err(|e| EtlError::state(format!("failed to serialize watermarks: {}", e)))?;

        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp_path = PathBuf::from(temp);

        fs::write(&temp_path, &content)
            .await
            .map_err(|e| EtlError::state(format!("failed to write watermark file: {}", e)))?;
        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| EtlError::state(format!("failed to rename watermark file: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self, key: &StreamKey) -> Result<DateTime<Utc>> {
        Ok(self
            .cache
            .read()
            .await
            .get(key.as_str())
            .copied()
            .unwrap_or(INITIAL_WATERMARK))
    }

    async fn save(&self, key: &StreamKey, marker: DateTime<Utc>) -> Result<()> {
        // The write lock is held across the rename so documents never interleave
        let mut cache = self.cache.write().await;
        let mut next = cache.clone();
        next.insert(key.as_str().to_string(), marker);
        self.persist(&next).await?;
        *cache = next;
        Ok(())
    }

    async fn reset(&self, key: &StreamKey) -> Result<()> {
        let mut cache = self.cache.write().await;
        if !cache.contains_key(key.as_str()) {
            return Ok(());
        }
        let mut next = cache.clone();
        next.remove(key.as_str());
        self.persist(&next).await?;
        *cache = next;
        Ok(())
    }

    async fn snapshot(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        Ok(self.cache.read().await.clone())
    }
}
