use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A cached response body with its absolute expiry (epoch ms).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheRecord {
    pub data: serde_json::Value,
    #[serde(rename = "expiresAt")]
    pub expires_at: i64,
}

impl CacheRecord {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }
}

/// Durable fallback tier of the response cache, keyed by full request URL.
///
/// Implementations are best effort: a failed write is logged, never surfaced.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load(&self, key: &str) -> Option<CacheRecord>;
    async fn save(&self, key: &str, record: CacheRecord);
    async fn remove(&self, key: &str);
}

/// Store that lives only as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, CacheRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, key: &str) -> Option<CacheRecord> {
        self.inner.read().await.get(key).cloned()
    }

    async fn save(&self, key: &str, record: CacheRecord) {
        self.inner.write().await.insert(key.to_owned(), record);
    }

    async fn remove(&self, key: &str) {
        self.inner.write().await.remove(key);
    }
}

/// JSON file holding `url -> record`, rewritten atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    inner: Arc<RwLock<HashMap<String, CacheRecord>>>,
    path: PathBuf,
}

impl JsonFileStore {
    /// Loads the store, falling back to the `.json.tmp` sibling when the
    /// main file is corrupt, and to an empty map when both are unusable.
    pub async fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let records: HashMap<String, CacheRecord> = read_json_with_tmp_fallback(&path).await;
        debug!(entries = records.len(), path = %path.display(), "durable cache loaded");
        Self {
            inner: Arc::new(RwLock::new(records)),
            path,
        }
    }

    async fn persist(&self, now_ms: i64) {
        let mut inner = self.inner.write().await;
        inner.retain(|_, record| record.is_fresh(now_ms));
        let bytes = match serde_json::to_vec(&*inner) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to serialize durable cache");
                return;
            }
        };
        drop(inner);

        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            warn!(error = %e, path = %tmp.display(), "failed to write temp cache file");
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            warn!(error = %e, path = %self.path.display(), "failed to persist cache file");
        }
    }
}

#[async_trait]
impl DurableStore for JsonFileStore {
    async fn load(&self, key: &str) -> Option<CacheRecord> {
        self.inner.read().await.get(key).cloned()
    }

    async fn save(&self, key: &str, record: CacheRecord) {
        // Records are written with a future expiry, so anything already
        // stale at that point can be pruned.
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.inner.write().await.insert(key.to_owned(), record);
        self.persist(now_ms).await;
    }

    async fn remove(&self, key: &str) {
        let removed = self.inner.write().await.remove(key).is_some();
        if removed {
            self.persist(chrono::Utc::now().timestamp_millis()).await;
        }
    }
}

async fn read_json_with_tmp_fallback<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<T>(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, path = %path.display(), "failed to parse JSON, trying tmp fallback");
                let tmp = path.with_extension("json.tmp");
                match tokio::fs::read(&tmp).await {
                    Ok(tmp_bytes) => serde_json::from_slice::<T>(&tmp_bytes).unwrap_or_default(),
                    Err(_) => Default::default(),
                }
            }
        },
        Err(_) => Default::default(),
    }
}
