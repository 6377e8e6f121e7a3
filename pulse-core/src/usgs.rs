//! USGS earthquake feeds.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::event::Quake;
use crate::net::FetchGovernor;
use crate::time::QuakeWindow;

#[derive(Debug, Clone)]
pub struct UsgsClient {
    governor: FetchGovernor,
    config: FeedConfig,
}

impl UsgsClient {
    pub fn new(governor: FetchGovernor, config: FeedConfig) -> Self {
        Self { governor, config }
    }

    pub fn summary_url(&self, window: QuakeWindow) -> String {
        let file = match window {
            QuakeWindow::Hour => "all_hour.geojson",
            QuakeWindow::Day => "all_day.geojson",
        };
        format!("{}/{}", self.config.usgs_summary_base.trim_end_matches('/'), file)
    }

    pub fn range_url(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<String, FetchError> {
        let mut url = Url::parse(&self.config.usgs_query_url).map_err(|e| FetchError::InvalidUrl {
            url: self.config.usgs_query_url.clone(),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("format", "geojson")
            .append_pair("orderby", "time")
            .append_pair("starttime", &start.to_rfc3339_opts(SecondsFormat::Millis, true))
            .append_pair("endtime", &end.to_rfc3339_opts(SecondsFormat::Millis, true));
        Ok(url.into())
    }

    /// Fetches the rolling summary feed for the last hour or day.
    pub async fn fetch_quakes(&self, window: QuakeWindow) -> Result<Value, FetchError> {
        let url = self.summary_url(window);
        debug!(url = %url, "fetching USGS summary feed");
        self.governor
            .fetch_json_limited(&url, &self.config.quake_options())
            .await
    }

    /// Fetches every event between `start` and `end`, ordered by time.
    pub async fn fetch_quakes_range_utc(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Value, FetchError> {
        let url = self.range_url(start, end)?;
        debug!(url = %url, "fetching USGS event range");
        self.governor
            .fetch_json_limited(&url, &self.config.quake_range_options())
            .await
    }
}

#[derive(Debug, Deserialize)]
struct QuakeCollection {
    #[serde(default)]
    features: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct QuakeFeature {
    id: Option<String>,
    #[serde(default)]
    properties: QuakeProperties,
    geometry: Option<QuakeGeometry>,
}

#[derive(Debug, Deserialize, Default)]
struct QuakeProperties {
    mag: Option<f64>,
    time: Option<i64>,
    place: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuakeGeometry {
    #[serde(default)]
    coordinates: Vec<Option<f64>>,
}

/// Turns a GeoJSON FeatureCollection into quakes, newest first.
///
/// A null magnitude reads as 0. Features of an unexpected shape, or without
/// an id, a time or a lon/lat pair, are dropped.
pub fn quakes_from_feed(payload: &Value) -> Result<Vec<Quake>, FetchError> {
    let collection = QuakeCollection::deserialize(payload)
        .map_err(|e| FetchError::Decode(format!("earthquake feed: {e}")))?;

    let mut quakes: Vec<Quake> = collection
        .features
        .into_iter()
        .filter_map(|raw| {
            let feature: QuakeFeature = match serde_json::from_value(raw) {
                Ok(feature) => feature,
                Err(e) => {
                    debug!(error = %e, "skipping malformed earthquake feature");
                    return None;
                }
            };
            let coords = feature.geometry?.coordinates;
            let lon = coords.first().copied().flatten()?;
            let lat = coords.get(1).copied().flatten()?;
            Some(Quake {
                id: feature.id?,
                mag: feature.properties.mag.unwrap_or(0.0),
                time: feature.properties.time?,
                place: feature.properties.place,
                lon,
                lat,
                depth: coords.get(2).copied().flatten(),
                is_new: false,
            })
        })
        .collect();

    quakes.sort_by(|a, b| b.time.cmp(&a.time));
    Ok(quakes)
}
