mod app;
mod map;

use std::sync::Arc;
use std::time::Duration;

use eframe::{egui, NativeOptions};
use pulse_core::storage::DurableStore;
use pulse_core::{AppConfig, FetchGovernor, HazardFeeds, JsonFileStore, MemoryStore, SystemClock};
use reqwest::{redirect, ClientBuilder};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use crate::app::{AppInit, PulseApp};

type BoxError = Box<dyn std::error::Error>;

fn main() -> Result<(), BoxError> {
    init_tracing();

    let runtime = Arc::new(Runtime::new()?);
    let config = AppConfig::load();
    let (update_tx, update_rx) = mpsc::channel(64);
    let client = ClientBuilder::new()
        .redirect(redirect::Policy::limited(5))
        .connect_timeout(Duration::from_secs(10))
        .user_agent("QuakePulse/0.1")
        .build()?;
    let store = load_cache_store(&runtime);
    let governor = FetchGovernor::new(client, Arc::new(SystemClock), store);
    let feeds = HazardFeeds::new(governor, config.feeds.clone());

    let [width, height] = config.ui.window_size;
    let init = AppInit {
        runtime,
        feeds,
        updates: update_rx,
        update_tx,
        config,
    };

    eframe::run_native(
        "QuakePulse",
        NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([width, height])
                .with_min_inner_size([900.0, 600.0]),
            ..Default::default()
        },
        Box::new(move |cc| Box::new(PulseApp::new(init, &cc.egui_ctx))),
    )
    .map_err(|e| {
        error!(error = %e, "window closed with an error");
        BoxError::from(e.to_string())
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Durable cache next to `config.json`; memory only when there is no
/// config directory.
fn load_cache_store(runtime: &Arc<Runtime>) -> Arc<dyn DurableStore> {
    match AppConfig::cache_file_path() {
        Ok(path) => Arc::new(runtime.block_on(JsonFileStore::load_from(path))),
        Err(e) => {
            warn!(error = %e, "no cache directory, responses will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    }
}
