//! Rate-limited, coalesced, two-tier cached JSON fetching.
//!
//! Every upstream call in the crate goes through [`FetchGovernor`]. For a
//! given URL it answers from the in-process cache, then from the durable
//! store, then joins an in-flight request, and only then touches the
//! network, spacing calls to the same host by `min_gap`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use rand::Rng;
use reqwest::{header, Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::clock::Clock;
use crate::error::FetchError;
use crate::storage::{CacheRecord, DurableStore};

const ACCEPT: &str = "application/json, text/plain;q=0.6, */*;q=0.1";
/// TTL given to a durable hit when it is promoted into memory.
pub const PROMOTION_TTL: Duration = Duration::from_secs(5);
/// Upper bound on how long a fallback default stays cached.
pub const DEFAULT_TTL_CAP: Duration = Duration::from_secs(120);
const SNIPPET_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    pub ttl: Duration,
    pub min_gap: Duration,
    pub retries: u32,
    /// Returned (and briefly cached) instead of an error once transient
    /// failures exhaust the retries.
    pub default_on_empty: Option<Value>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            min_gap: Duration::from_millis(1200),
            retries: 3,
            default_on_empty: None,
        }
    }
}

impl FetchOptions {
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn min_gap(mut self, min_gap: Duration) -> Self {
        self.min_gap = min_gap;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn default_on_empty(mut self, value: Value) -> Self {
        self.default_on_empty = Some(value);
        self
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

/// One request per `min_gap` for each `host[:port]`, with no burst.
type HostPacer = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

struct MemEntry {
    data: Value,
    expires_at: i64,
}

struct GovernorInner {
    client: Client,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DurableStore>,
    mem: Mutex<HashMap<String, MemEntry>>,
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    pacers: Mutex<HashMap<Duration, Arc<HostPacer>>>,
}

/// Process-wide fetch service. Cloning shares caches and pacing state.
#[derive(Clone)]
pub struct FetchGovernor {
    inner: Arc<GovernorInner>,
}

impl std::fmt::Debug for FetchGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchGovernor")
            .field("cached", &self.inner.mem.lock().len())
            .field("in_flight", &self.inner.in_flight.lock().len())
            .finish()
    }
}

enum Body {
    Empty,
    Json(Value),
    Text(String),
}

impl FetchGovernor {
    pub fn new(client: Client, clock: Arc<dyn Clock>, store: Arc<dyn DurableStore>) -> Self {
        Self {
            inner: Arc::new(GovernorInner {
                client,
                clock,
                store,
                mem: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                pacers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Drops `url` from both cache tiers so the next call goes upstream.
    pub async fn invalidate(&self, url: &str) {
        self.inner.mem.lock().remove(url);
        self.inner.store.remove(url).await;
    }

    pub async fn fetch_json_limited(
        &self,
        url: &str,
        opts: &FetchOptions,
    ) -> Result<Value, FetchError> {
        let now = self.inner.clock.now_ms();
        if let Some(data) = self.memory_hit(url, now) {
            debug!(url = %url, "memory cache hit");
            return Ok(data);
        }

        if let Some(record) = self.inner.store.load(url).await {
            if record.is_fresh(now) {
                debug!(url = %url, "durable cache hit");
                self.remember(url, record.data.clone(), PROMOTION_TTL);
                return Ok(record.data);
            }
        }

        let shared = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(url).cloned() {
                Some(existing) => {
                    debug!(url = %url, "joining in-flight request");
                    existing
                }
                None => {
                    let this = self.clone();
                    let key = url.to_owned();
                    let opts = opts.clone();
                    let task = tokio::spawn(async move {
                        let _entry = InFlightEntry {
                            governor: this.clone(),
                            url: key.clone(),
                        };
                        this.run_fetch(&key, &opts).await
                    });
                    let shared = async move {
                        task.await
                            .unwrap_or_else(|e| Err(FetchError::Task(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(url.to_owned(), shared.clone());
                    shared
                }
            }
        };

        shared.await
    }

    fn memory_hit(&self, url: &str, now: i64) -> Option<Value> {
        let mem = self.inner.mem.lock();
        mem.get(url)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.data.clone())
    }

    fn remember(&self, url: &str, data: Value, ttl: Duration) {
        let expires_at = self.inner.clock.now_ms() + ttl.as_millis() as i64;
        self.inner
            .mem
            .lock()
            .insert(url.to_owned(), MemEntry { data, expires_at });
    }

    async fn store_both(&self, url: &str, data: Value, ttl: Duration) {
        self.remember(url, data.clone(), ttl);
        let record = CacheRecord {
            data,
            expires_at: self.inner.clock.now_ms() + ttl.as_millis() as i64,
        };
        self.inner.store.save(url, record).await;
    }

    /// Limiter shared by every call using this `min_gap`; `None` when
    /// calls are not paced at all.
    fn pacer(&self, min_gap: Duration) -> Option<Arc<HostPacer>> {
        let quota = Quota::with_period(min_gap)?;
        let mut pacers = self.inner.pacers.lock();
        let pacer = pacers
            .entry(min_gap)
            .or_insert_with(|| Arc::new(RateLimiter::keyed(quota)));
        Some(pacer.clone())
    }

    async fn wait_for_slot(&self, url: &str, min_gap: Duration) {
        let Some(pacer) = self.pacer(min_gap) else {
            return;
        };
        let host = host_key(url);
        if pacer.check_key(&host).is_err() {
            debug!(url = %url, host = %host, "pacing request");
            pacer.until_key_ready(&host).await;
        }
    }

    async fn run_fetch(&self, url: &str, opts: &FetchOptions) -> Result<Value, FetchError> {
        Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

        self.wait_for_slot(url, opts.min_gap).await;

        let mut attempt: u32 = 0;
        loop {
            let response = match self
                .inner
                .client
                .get(url)
                .header(header::ACCEPT, ACCEPT)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    attempt += 1;
                    let err = FetchError::Network {
                        url: url.to_owned(),
                        message: e.to_string(),
                    };
                    if attempt > opts.retries {
                        warn!(url = %url, error = %err, "giving up after network errors");
                        return Err(err);
                    }
                    warn!(url = %url, attempt, error = %err, "network error, retrying");
                    tokio::time::sleep(backoff(800, attempt, 400)).await;
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                attempt += 1;
                if attempt > opts.retries {
                    let err = FetchError::RateLimited {
                        url: url.to_owned(),
                        retries: opts.retries,
                    };
                    return self.exhausted(url, opts, err).await;
                }
                let delay = match retry_after(&response) {
                    Some(delay) => delay,
                    None => backoff(2000, attempt, 500),
                };
                warn!(url = %url, attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let err = FetchError::Http {
                    status: status.as_u16(),
                    url: url.to_owned(),
                    snippet: snippet(&body),
                };
                warn!(url = %url, status = status.as_u16(), "upstream refused request");
                return Err(err);
            }

            let err = match read_body(response).await {
                Body::Json(data) => {
                    self.store_both(url, data.clone(), opts.ttl).await;
                    return Ok(data);
                }
                Body::Empty => FetchError::EmptyBody {
                    url: url.to_owned(),
                },
                Body::Text(text) => FetchError::NonJson {
                    url: url.to_owned(),
                    snippet: snippet(&text),
                },
            };

            attempt += 1;
            if attempt > opts.retries {
                return self.exhausted(url, opts, err).await;
            }
            warn!(url = %url, attempt, error = %err, "unusable body, retrying");
            tokio::time::sleep(backoff(600, attempt, 400)).await;
        }
    }

    async fn exhausted(
        &self,
        url: &str,
        opts: &FetchOptions,
        err: FetchError,
    ) -> Result<Value, FetchError> {
        match &opts.default_on_empty {
            Some(default) => {
                warn!(url = %url, error = %err, "retries exhausted, serving default payload");
                let ttl = opts.ttl.min(DEFAULT_TTL_CAP);
                self.store_both(url, default.clone(), ttl).await;
                Ok(default.clone())
            }
            None => {
                warn!(url = %url, error = %err, "retries exhausted");
                Err(err)
            }
        }
    }
}

/// Clears a URL's in-flight slot when its fetch task ends, including by
/// panic or abort, so later callers start a fresh request.
struct InFlightEntry {
    governor: FetchGovernor,
    url: String,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        self.governor.inner.in_flight.lock().remove(&self.url);
    }
}

/// Pacing key for a URL: `host[:port]`, or `default` when it has no host.
pub fn host_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_owned(),
            _ => "default".to_owned(),
        },
        Err(_) => "default".to_owned(),
    }
}

fn backoff(step_ms: u64, attempt: u32, jitter_ms: u64) -> Duration {
    Duration::from_millis(step_ms * attempt as u64 + jitter(jitter_ms))
}

pub(crate) fn jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    rand::thread_rng().gen_range(0..max_ms)
}

fn retry_after(response: &Response) -> Option<Duration> {
    let secs = response
        .headers()
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    (secs > 0).then(|| Duration::from_secs(secs))
}

async fn read_body(response: Response) -> Body {
    if response.status() == StatusCode::NO_CONTENT {
        return Body::Empty;
    }
    let declared_empty = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);
    let text = response.text().await.unwrap_or_default();
    if text.trim().is_empty() || declared_empty {
        return Body::Empty;
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Body::Json(value),
        Err(_) => Body::Text(text),
    }
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_LEN).collect()
}
