use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::error::ConfigError;
use crate::net::FetchOptions;

pub const APP_DIR: &str = "quakepulse";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub feeds: FeedConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub tour: TourConfig,
    #[serde(default)]
    pub ui: UiConfig,
}

/// Upstream endpoints and the governor settings used for each of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub usgs_summary_base: String,
    pub usgs_query_url: String,
    pub gdacs_search_url: String,
    pub quake_ttl_secs: u64,
    pub quake_range_ttl_secs: u64,
    pub quake_min_gap_ms: u64,
    pub quake_retries: u32,
    pub flood_ttl_secs: u64,
    pub flood_min_gap_ms: u64,
    pub flood_retries: u32,
    pub flood_page_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub quake_hour_base_secs: u64,
    pub quake_day_base_secs: u64,
    pub quake_jitter_secs: u64,
    pub flood_base_secs: u64,
    pub flood_jitter_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TourConfig {
    pub max_events: usize,
    pub pause_min_ms: u64,
    pub pause_max_ms: u64,
    pub rain_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    pub window_size: [f32; 2],
    pub background_color: [u8; 3],
    pub panel_color: [u8; 3],
    pub accent_color: [u8; 3],
    pub text_color: [u8; 3],
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            usgs_summary_base: "https://earthquake.usgs.gov/earthquakes/feed/v1.0/summary".into(),
            usgs_query_url: "https://earthquake.usgs.gov/fdsnws/event/1/query".into(),
            gdacs_search_url: "https://www.gdacs.org/gdacsapi/api/events/geteventlist/SEARCH"
                .into(),
            quake_ttl_secs: 60,
            quake_range_ttl_secs: 300,
            quake_min_gap_ms: 1200,
            quake_retries: 3,
            flood_ttl_secs: 600,
            flood_min_gap_ms: 1500,
            flood_retries: 2,
            flood_page_size: 200,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            quake_hour_base_secs: 90,
            quake_day_base_secs: 180,
            quake_jitter_secs: 45,
            flood_base_secs: 240,
            flood_jitter_secs: 60,
        }
    }
}

impl Default for TourConfig {
    fn default() -> Self {
        Self {
            max_events: 60,
            pause_min_ms: 300,
            pause_max_ms: 700,
            rain_ms: 2600,
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            window_size: [1280.0, 800.0],
            background_color: [14, 17, 22],
            panel_color: [23, 27, 34],
            accent_color: [56, 189, 248],
            text_color: [220, 224, 230],
        }
    }
}

impl FeedConfig {
    pub fn quake_options(&self) -> FetchOptions {
        FetchOptions::default()
            .ttl(Duration::from_secs(self.quake_ttl_secs))
            .min_gap(Duration::from_millis(self.quake_min_gap_ms))
            .retries(self.quake_retries)
    }

    pub fn quake_range_options(&self) -> FetchOptions {
        self.quake_options()
            .ttl(Duration::from_secs(self.quake_range_ttl_secs))
    }

    /// Floods degrade to an empty collection instead of failing.
    pub fn flood_options(&self) -> FetchOptions {
        FetchOptions::default()
            .ttl(Duration::from_secs(self.flood_ttl_secs))
            .min_gap(Duration::from_millis(self.flood_min_gap_ms))
            .retries(self.flood_retries)
            .default_on_empty(json!({ "features": [] }))
    }
}

impl AppConfig {
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let app_config_dir = config_dir.join(APP_DIR);
        std::fs::create_dir_all(&app_config_dir)?;
        Ok(app_config_dir)
    }

    pub fn config_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn cache_file_path() -> Result<PathBuf, ConfigError> {
        Ok(Self::config_dir()?.join("cache_store.json"))
    }

    /// Loads `config.json`, or writes and returns the defaults.
    pub fn load() -> Self {
        match Self::load_from_file() {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "could not load configuration, using defaults");
                let default_config = Self::default();
                if let Err(save_err) = default_config.save() {
                    warn!(error = %save_err, "could not save default configuration");
                }
                default_config
            }
        }
    }

    fn load_from_file() -> Result<Self, ConfigError> {
        let config_path = Self::config_file_path()?;
        let config_content = std::fs::read_to_string(config_path)?;
        Ok(serde_json::from_str(&config_content)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_file_path()?;
        let config_json = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, config_json)?;
        Ok(())
    }
}
