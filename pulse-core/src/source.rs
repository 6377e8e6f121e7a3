use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::config::FeedConfig;
use crate::error::FetchError;
use crate::event::Hazard;
use crate::floods::{FloodQuery, GdacsClient};
use crate::net::FetchGovernor;
use crate::time::QuakeWindow;
use crate::usgs::UsgsClient;

/// One upstream query the dashboard needs answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    LiveQuakes(QuakeWindow),
    QuakeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    Floods(FloodQuery),
}

impl FeedRequest {
    pub fn hazard(&self) -> Hazard {
        match self {
            FeedRequest::LiveQuakes(_) | FeedRequest::QuakeRange { .. } => Hazard::Earthquakes,
            FeedRequest::Floods(_) => Hazard::Floods,
        }
    }
}

/// Raw upstream answer, normalized later by the dashboard.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedPayload {
    Quakes(Value),
    Floods {
        payload: Value,
        /// Query bounds (epoch ms), the fallback for missing flood dates.
        window: (i64, i64),
    },
}

impl FeedPayload {
    pub fn hazard(&self) -> Hazard {
        match self {
            FeedPayload::Quakes(_) => Hazard::Earthquakes,
            FeedPayload::Floods { .. } => Hazard::Floods,
        }
    }
}

/// Both feed adapters over one shared governor.
#[derive(Debug, Clone)]
pub struct HazardFeeds {
    governor: FetchGovernor,
    usgs: UsgsClient,
    gdacs: GdacsClient,
}

impl HazardFeeds {
    pub fn new(governor: FetchGovernor, config: FeedConfig) -> Self {
        Self {
            usgs: UsgsClient::new(governor.clone(), config.clone()),
            gdacs: GdacsClient::new(governor.clone(), config),
            governor,
        }
    }

    pub fn url_for(&self, request: &FeedRequest) -> Result<String, FetchError> {
        match request {
            FeedRequest::LiveQuakes(window) => Ok(self.usgs.summary_url(*window)),
            FeedRequest::QuakeRange { start, end } => self.usgs.range_url(*start, *end),
            FeedRequest::Floods(query) => self.gdacs.search_url(query),
        }
    }

    /// Forgets cached answers for `request` ahead of a manual refresh.
    pub async fn invalidate(&self, request: &FeedRequest) {
        match self.url_for(request) {
            Ok(url) => self.governor.invalidate(&url).await,
            Err(e) => debug!(error = %e, "nothing to invalidate"),
        }
    }

    pub async fn fetch(&self, request: &FeedRequest) -> Result<FeedPayload, FetchError> {
        match request {
            FeedRequest::LiveQuakes(window) => {
                self.usgs.fetch_quakes(*window).await.map(FeedPayload::Quakes)
            }
            FeedRequest::QuakeRange { start, end } => self
                .usgs
                .fetch_quakes_range_utc(*start, *end)
                .await
                .map(FeedPayload::Quakes),
            FeedRequest::Floods(query) => {
                let (from, to) = query.resolved_bounds(self.governor.now_ms());
                let payload = self.gdacs.fetch_floods(query).await?;
                Ok(FeedPayload::Floods {
                    payload,
                    window: (from.timestamp_millis(), to.timestamp_millis()),
                })
            }
        }
    }
}
