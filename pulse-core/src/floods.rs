//! GDACS flood event list.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::event::{AlertLevel, Flood, FloodLinks};
use crate::net::FetchGovernor;
use crate::time::FLOOD_LIVE_WINDOW_MS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloodQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page_size: u32,
    /// Bypass both cache tiers with a unique query string.
    pub no_cache: bool,
}

impl Default for FloodQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            page_size: 200,
            no_cache: false,
        }
    }
}

impl FloodQuery {
    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    /// Fills missing bounds with the last 30 days ending at `now_ms`.
    pub fn resolved_bounds(&self, now_ms: i64) -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(Utc::now);
        let to = self.to.unwrap_or(now);
        let from = self
            .from
            .unwrap_or(now - chrono::Duration::milliseconds(FLOOD_LIVE_WINDOW_MS));
        (from, to)
    }
}

#[derive(Debug, Clone)]
pub struct GdacsClient {
    governor: FetchGovernor,
    config: FeedConfig,
}

impl GdacsClient {
    pub fn new(governor: FetchGovernor, config: FeedConfig) -> Self {
        Self { governor, config }
    }

    pub fn search_url(&self, query: &FloodQuery) -> Result<String, FetchError> {
        let (from, to) = query.resolved_bounds(self.governor.now_ms());
        let mut url = Url::parse(&self.config.gdacs_search_url).map_err(|e| FetchError::InvalidUrl {
            url: self.config.gdacs_search_url.clone(),
            reason: e.to_string(),
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("eventlist", "FL")
                .append_pair("fromdate", &from.format("%Y-%m-%d").to_string())
                .append_pair("todate", &to.format("%Y-%m-%d").to_string())
                .append_pair("pagesize", &query.page_size.to_string());
            if query.no_cache {
                pairs.append_pair("_ts", &self.governor.now_ms().to_string());
            }
        }
        Ok(url.into())
    }

    /// Fetches the raw event list. Exhausted transient failures resolve to
    /// `{"features": []}` rather than an error.
    pub async fn fetch_floods(&self, query: &FloodQuery) -> Result<Value, FetchError> {
        let url = self.search_url(query)?;
        let mut opts = self.config.flood_options();
        if query.no_cache {
            opts.ttl = Duration::ZERO;
        }
        debug!(url = %url, "fetching GDACS flood list");
        self.governor.fetch_json_limited(&url, &opts).await
    }
}

/// Normalizes a GDACS payload. `fallback` (epoch ms) stands in for missing
/// start and end dates. Features without usable coordinates are dropped.
pub fn normalize_floods(payload: &Value, fallback: (i64, i64)) -> Vec<Flood> {
    let Some(features) = payload.get("features").and_then(Value::as_array) else {
        return Vec::new();
    };
    let empty = Map::new();

    features
        .iter()
        .filter_map(|feature| {
            let props = feature
                .get("properties")
                .and_then(Value::as_object)
                .unwrap_or(&empty);
            let (lon, lat) = feature
                .get("geometry")
                .and_then(|g| g.get("coordinates"))
                .and_then(first_lon_lat)?;

            let start = ["fromdate", "eventdate", "datemodified"]
                .iter()
                .find_map(|key| props.get(*key).and_then(parse_upstream_date))
                .unwrap_or(fallback.0);
            let end = props
                .get("todate")
                .and_then(parse_upstream_date)
                .unwrap_or(fallback.1);
            let time = midpoint(start, end);

            Some(Flood {
                id: format!(
                    "{}-{}",
                    scalar_text(props.get("eventid")),
                    scalar_text(props.get("episodeid"))
                ),
                name: non_empty_str(props, "name")
                    .or_else(|| non_empty_str(props, "description"))
                    .unwrap_or("Flood")
                    .to_owned(),
                level: infer_level(props),
                lat,
                lon,
                start,
                end,
                time,
                is_current: matches!(props.get("iscurrent"), Some(Value::Bool(true)))
                    || matches!(props.get("iscurrent"), Some(Value::String(s)) if s == "true"),
                country: non_empty_str(props, "country")
                    .or_else(|| non_empty_str(props, "iso3"))
                    .map(str::to_owned),
                links: FloodLinks {
                    report: props
                        .get("url")
                        .and_then(|u| u.get("report"))
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                    details: props
                        .get("url")
                        .and_then(|u| u.get("details"))
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                },
            })
        })
        .collect()
}

/// Alert level from, in order: `alertlevel`, `episodealertlevel`, the colour
/// folder in `iconoverall`, the colour folder in `icon`.
pub fn infer_level(props: &Map<String, Value>) -> AlertLevel {
    let raw = non_empty_str(props, "alertlevel")
        .or_else(|| non_empty_str(props, "episodealertlevel"))
        .or_else(|| non_empty_str(props, "iconoverall").and_then(icon_color))
        .or_else(|| non_empty_str(props, "icon").and_then(icon_color))
        .unwrap_or("");
    AlertLevel::parse(raw)
}

/// The leftmost `/Green/`, `/Orange/` or `/Red/` path segment, any case.
fn icon_color(icon: &str) -> Option<&'static str> {
    let lower = icon.to_ascii_lowercase();
    [("/green/", "green"), ("/orange/", "orange"), ("/red/", "red")]
        .iter()
        .filter_map(|(needle, color)| lower.find(needle).map(|pos| (pos, *color)))
        .min_by_key(|(pos, _)| *pos)
        .map(|(_, color)| color)
}

/// Depth-first search for the first `[lon, lat, ..]` pair of finite numbers,
/// so points, lines and (multi)polygons all work.
pub fn first_lon_lat(coords: &Value) -> Option<(f64, f64)> {
    let items = coords.as_array()?;
    if let (Some(lon), Some(lat)) = (
        items.first().and_then(as_number),
        items.get(1).and_then(as_number),
    ) {
        if lon.is_finite() && lat.is_finite() {
            return Some((lon, lat));
        }
    }
    items.iter().find_map(first_lon_lat)
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Floor of the mean; exact for any pair of epoch values.
fn midpoint(start: i64, end: i64) -> i64 {
    (start as i128 + end as i128).div_euclid(2) as i64
}

/// Accepts RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.fff]` (read as UTC),
/// bare dates, and epoch milliseconds.
pub fn parse_upstream_date(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp_millis());
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(naive.and_utc().timestamp_millis());
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc().timestamp_millis())
        }
        _ => None,
    }
}

fn non_empty_str<'a>(props: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    props
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn scalar_text(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
