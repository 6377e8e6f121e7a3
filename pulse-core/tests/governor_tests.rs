use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pulse_core::storage::{CacheRecord, DurableStore, MemoryStore};
use pulse_core::{FetchError, FetchGovernor, FetchOptions, ManualClock, SystemClock};

const T0: i64 = 1_700_000_000_000;

fn governor_with(clock: Arc<dyn pulse_core::Clock>, store: Arc<MemoryStore>) -> FetchGovernor {
    FetchGovernor::new(Client::new(), clock, store)
}

fn fast() -> FetchOptions {
    FetchOptions::default().min_gap(Duration::ZERO)
}

async fn hits(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

#[tokio::test]
async fn concurrent_callers_share_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "features": [1, 2, 3] }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let url = format!("{}/feed", server.uri());
    let opts = fast();

    let results = join_all((0..5).map(|_| governor.fetch_json_limited(&url, &opts))).await;

    for result in results {
        assert_eq!(result.unwrap(), json!({ "features": [1, 2, 3] }));
    }
    assert_eq!(hits(&server).await, 1);
}

#[tokio::test]
async fn memory_tier_serves_until_ttl_expires() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "n": 1 })))
        .mount(&server)
        .await;

    let clock = Arc::new(ManualClock::new(T0));
    let governor = governor_with(clock.clone(), Arc::new(MemoryStore::new()));
    let url = format!("{}/feed", server.uri());
    let opts = fast().ttl(Duration::from_secs(60));

    governor.fetch_json_limited(&url, &opts).await.unwrap();
    clock.advance(Duration::from_secs(30));
    governor.fetch_json_limited(&url, &opts).await.unwrap();
    assert_eq!(hits(&server).await, 1, "second call within TTL is cached");

    clock.advance(Duration::from_secs(31));
    governor.fetch_json_limited(&url, &opts).await.unwrap();
    assert_eq!(hits(&server).await, 2, "call after TTL goes upstream");
}

#[tokio::test]
async fn fresh_durable_record_is_served_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "from": "network" })))
        .expect(0)
        .mount(&server)
        .await;

    let url = format!("{}/feed", server.uri());
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            &url,
            CacheRecord {
                data: json!({ "from": "disk" }),
                expires_at: T0 + 60_000,
            },
        )
        .await;

    let clock = Arc::new(ManualClock::new(T0));
    let governor = governor_with(clock.clone(), store);

    let value = governor.fetch_json_limited(&url, &fast()).await.unwrap();
    assert_eq!(value, json!({ "from": "disk" }));
    let value = governor.fetch_json_limited(&url, &fast()).await.unwrap();
    assert_eq!(value, json!({ "from": "disk" }));
    assert_eq!(hits(&server).await, 0);
}

#[tokio::test]
async fn invalidate_forces_the_next_call_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "from": "network" })))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/feed", server.uri());
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            &url,
            CacheRecord {
                data: json!({ "from": "disk" }),
                expires_at: T0 + 60_000,
            },
        )
        .await;

    let governor = governor_with(Arc::new(ManualClock::new(T0)), store.clone());
    assert_eq!(
        governor.fetch_json_limited(&url, &fast()).await.unwrap(),
        json!({ "from": "disk" })
    );

    governor.invalidate(&url).await;
    assert_eq!(
        governor.fetch_json_limited(&url, &fast()).await.unwrap(),
        json!({ "from": "network" })
    );
}

#[tokio::test]
async fn stale_durable_record_is_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "from": "network" })))
        .mount(&server)
        .await;

    let url = format!("{}/feed", server.uri());
    let store = Arc::new(MemoryStore::new());
    store
        .save(
            &url,
            CacheRecord {
                data: json!({ "from": "disk" }),
                expires_at: T0 - 1,
            },
        )
        .await;

    let governor = governor_with(Arc::new(ManualClock::new(T0)), store.clone());
    let value = governor.fetch_json_limited(&url, &fast()).await.unwrap();
    assert_eq!(value, json!({ "from": "network" }));

    let saved = store.load(&url).await.unwrap();
    assert_eq!(saved.data, json!({ "from": "network" }));
    assert_eq!(saved.expires_at, T0 + 60_000);
}

#[tokio::test]
async fn calls_to_one_host_are_spaced_by_min_gap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let opts = FetchOptions::default().min_gap(Duration::from_millis(300));

    let started = Instant::now();
    governor
        .fetch_json_limited(&format!("{}/a", server.uri()), &opts)
        .await
        .unwrap();
    governor
        .fetch_json_limited(&format!("{}/b", server.uri()), &opts)
        .await
        .unwrap();

    assert!(
        started.elapsed() >= Duration::from_millis(290),
        "second call should wait out the gap, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn rate_limit_honours_retry_after_then_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;

    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let url = format!("{}/feed", server.uri());

    let started = Instant::now();
    let value = governor.fetch_json_limited(&url, &fast()).await.unwrap();

    assert_eq!(value, json!({ "ok": true }));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(hits(&server).await, 2);
}

#[tokio::test]
async fn rate_limit_without_default_surfaces_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .mount(&server)
        .await;

    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let url = format!("{}/feed", server.uri());
    let err = governor
        .fetch_json_limited(&url, &fast().retries(0))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::RateLimited { retries: 0, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn empty_bodies_fall_back_to_default_and_cache_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    let governor = governor_with(Arc::new(SystemClock), store.clone());
    let url = format!("{}/floods", server.uri());
    let opts = fast()
        .retries(1)
        .ttl(Duration::from_secs(600))
        .default_on_empty(json!({ "features": [] }));

    let value = governor.fetch_json_limited(&url, &opts).await.unwrap();
    assert_eq!(value, json!({ "features": [] }));
    assert_eq!(hits(&server).await, 2, "one try plus one retry");

    let again = governor.fetch_json_limited(&url, &opts).await.unwrap();
    assert_eq!(again, json!({ "features": [] }));
    assert_eq!(hits(&server).await, 2, "default is cached");

    let record = store.load(&url).await.unwrap();
    let now = chrono::Utc::now().timestamp_millis();
    assert!(record.expires_at <= now + 120_000, "default TTL is capped");
}

#[tokio::test]
async fn empty_body_without_default_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let url = format!("{}/feed", server.uri());
    let err = governor
        .fetch_json_limited(&url, &fast().retries(0))
        .await
        .unwrap_err();

    assert_eq!(err, FetchError::EmptyBody { url });
}

#[tokio::test]
async fn non_json_body_reports_a_snippet() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let url = format!("{}/feed", server.uri());
    let err = governor
        .fetch_json_limited(&url, &fast().retries(0))
        .await
        .unwrap_err();

    match err {
        FetchError::NonJson { snippet, .. } => assert!(snippet.contains("maintenance")),
        other => panic!("expected NonJson, got {other:?}"),
    }
}

#[tokio::test]
async fn server_error_fails_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&server)
        .await;

    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let url = format!("{}/feed", server.uri());
    let err = governor.fetch_json_limited(&url, &fast()).await.unwrap_err();

    match &err {
        FetchError::Http {
            status, snippet, ..
        } => {
            assert_eq!(*status, 500);
            assert_eq!(snippet, "upstream exploded");
        }
        other => panic!("expected Http, got {other:?}"),
    }
    assert!(err.to_string().starts_with("HTTP 500"));
    assert_eq!(hits(&server).await, 1);
}

/// Panics on the first save only.
#[derive(Default)]
struct FlakyStore {
    panicked: AtomicBool,
    inner: MemoryStore,
}

#[async_trait]
impl DurableStore for FlakyStore {
    async fn load(&self, key: &str) -> Option<CacheRecord> {
        self.inner.load(key).await
    }

    async fn save(&self, key: &str, record: CacheRecord) {
        if !self.panicked.swap(true, Ordering::SeqCst) {
            panic!("disk went away");
        }
        self.inner.save(key, record).await;
    }

    async fn remove(&self, key: &str) {
        self.inner.remove(key).await;
    }
}

#[tokio::test]
async fn crashed_fetch_does_not_poison_later_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;

    let governor = FetchGovernor::new(
        Client::new(),
        Arc::new(SystemClock),
        Arc::new(FlakyStore::default()),
    );
    let url = format!("{}/feed", server.uri());
    let opts = fast().ttl(Duration::ZERO);

    let first = governor.fetch_json_limited(&url, &opts).await;
    assert!(matches!(first, Err(FetchError::Task(_))), "got {first:?}");

    let second = governor.fetch_json_limited(&url, &opts).await.unwrap();
    assert_eq!(second, json!({ "ok": true }));
    assert_eq!(hits(&server).await, 2);
}

#[tokio::test]
async fn hosts_are_paced_independently() {
    let first = MockServer::start().await;
    let second = MockServer::start().await;
    for server in [&first, &second] {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
    }

    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let opts = FetchOptions::default().min_gap(Duration::from_secs(2));

    let started = Instant::now();
    governor
        .fetch_json_limited(&format!("{}/a", first.uri()), &opts)
        .await
        .unwrap();
    governor
        .fetch_json_limited(&format!("{}/a", second.uri()), &opts)
        .await
        .unwrap();

    assert!(
        started.elapsed() < Duration::from_millis(1500),
        "different ports are different hosts, took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn invalid_url_is_rejected_before_any_request() {
    let governor = governor_with(Arc::new(SystemClock), Arc::new(MemoryStore::new()));
    let err = governor
        .fetch_json_limited("not a url", &fast())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidUrl { .. }));
}

#[test]
fn host_key_includes_port() {
    use pulse_core::net::host_key;
    assert_eq!(host_key("http://127.0.0.1:8080/a?b=1"), "127.0.0.1:8080");
    assert_eq!(
        host_key("https://earthquake.usgs.gov/earthquakes/feed"),
        "earthquake.usgs.gov"
    );
}
