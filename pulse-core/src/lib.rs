pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod floods;
pub mod net;
pub mod poller;
pub mod source;
pub mod storage;
pub mod time;
pub mod toast;
pub mod tour;
pub mod usgs;
pub mod view;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use controller::{Dashboard, DashboardView, FetchTicket, FloodKpi, PollSpec, QuakeKpi};
pub use error::{ConfigError, FetchError, PollError};
pub use event::{AlertLevel, Flood, Hazard, HazardEvent, Quake};
pub use floods::{normalize_floods, FloodQuery, GdacsClient};
pub use net::{FetchGovernor, FetchOptions};
pub use poller::{poll_once, spawn_feed_loop, Event, PollInterval, PollerHandle};
pub use source::{FeedPayload, FeedRequest, HazardFeeds};
pub use storage::{CacheRecord, DurableStore, JsonFileStore, MemoryStore};
pub use time::{QuakeWindow, RangeError, TimeMode, TimeWindow};
pub use tour::{run_tour, TourAction, TourHost, TourMachine, TourOutcome, TourPlan};
pub use usgs::{quakes_from_feed, UsgsClient};
pub use view::{CameraTarget, MapPreset, PRESETS, WORLD_VIEW};
