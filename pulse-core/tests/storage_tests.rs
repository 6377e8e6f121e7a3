use std::path::PathBuf;

use serde_json::json;

use pulse_core::storage::{CacheRecord, DurableStore, JsonFileStore};

async fn scratch_dir(tag: &str) -> PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!(
        "quakepulse_{}_{}",
        tag,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    dir
}

fn far_future() -> i64 {
    chrono::Utc::now().timestamp_millis() + 3_600_000
}

#[tokio::test]
async fn load_uses_tmp_fallback_on_corrupted_json() {
    let dir = scratch_dir("corrupt").await;

    let cache_path = dir.join("cache_store.json");
    tokio::fs::write(&cache_path, b"{ this is not json ").await.unwrap();

    let tmp_path = dir.join("cache_store.json.tmp");
    let record = CacheRecord {
        data: json!({ "features": [] }),
        expires_at: far_future(),
    };
    let bytes = serde_json::to_vec(&json!({ "https://x/feed": record.clone() })).unwrap();
    tokio::fs::write(&tmp_path, bytes).await.unwrap();

    let store = JsonFileStore::load_from(&cache_path).await;
    let loaded = store.load("https://x/feed").await;
    assert_eq!(loaded, Some(record), "should fall back to tmp file when main is corrupted");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn missing_file_loads_empty() {
    let dir = scratch_dir("missing").await;
    let store = JsonFileStore::load_from(dir.join("cache_store.json")).await;
    assert!(store.load("anything").await.is_none());
    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn save_persists_and_survives_reload() {
    let dir = scratch_dir("persist").await;
    let cache_path = dir.join("cache_store.json");

    let store = JsonFileStore::load_from(&cache_path).await;
    let record = CacheRecord {
        data: json!({ "n": 42 }),
        expires_at: far_future(),
    };
    store.save("https://x/a", record.clone()).await;

    assert!(!dir.join("cache_store.json.tmp").exists(), "tmp file is renamed away");
    let raw = tokio::fs::read_to_string(&cache_path).await.unwrap();
    assert!(raw.contains("expiresAt"));

    let reloaded = JsonFileStore::load_from(&cache_path).await;
    assert_eq!(reloaded.load("https://x/a").await, Some(record));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn expired_records_are_pruned_on_save() {
    let dir = scratch_dir("prune").await;
    let cache_path = dir.join("cache_store.json");

    let store = JsonFileStore::load_from(&cache_path).await;
    store
        .save(
            "https://x/old",
            CacheRecord {
                data: json!(1),
                expires_at: 0,
            },
        )
        .await;
    store
        .save(
            "https://x/new",
            CacheRecord {
                data: json!(2),
                expires_at: far_future(),
            },
        )
        .await;

    assert!(store.load("https://x/old").await.is_none());
    assert!(store.load("https://x/new").await.is_some());

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
