//! Page-level state: hazard and time selection, fetched datasets, derived
//! views, selection, camera and the tour.
//!
//! Derived sets are computed by the free functions below from explicit
//! inputs; [`Dashboard::snapshot`] just gathers them for one instant.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info};

use crate::config::{AppConfig, PollingConfig, TourConfig};
use crate::error::FetchError;
use crate::event::{Flood, Hazard, HazardEvent, Quake, SeenSet};
use crate::floods::{normalize_floods, FloodQuery};
use crate::poller::PollInterval;
use crate::source::{FeedPayload, FeedRequest};
use crate::time::{
    live_window_ms, mean, random_history_day, replay_position,
    validate_custom_range, QuakeWindow, RangeError, TimeMode, TimeWindow, HOUR_MS,
};
use crate::toast::{Toast, ToastKind, ToastQueue};
use crate::tour::{Effect, TourAction, TourDeclined, TourHost, TourMachine, TourPlan, TourToken};
use crate::view::{CameraTarget, MapPreset, WORLD_VIEW};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuakeKpi {
    pub count_hour: usize,
    pub max_mag: f64,
    pub avg_mag: f64,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FloodKpi {
    pub total: usize,
    pub red: usize,
    pub orange: usize,
    pub current: usize,
}

/// Everything the UI draws for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardView {
    pub window: TimeWindow,
    pub window_ms: Option<(i64, i64)>,
    pub replay_at: Option<i64>,
    pub quakes: Vec<Quake>,
    pub floods: Vec<Flood>,
    pub quake_kpi: QuakeKpi,
    pub flood_kpi: FloodKpi,
    pub range_error: Option<RangeError>,
    pub can_tour: bool,
}

/// A fetch the current selection needs, tagged with the context it is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub request: FeedRequest,
}

/// The live loop that should be running, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    pub generation: u64,
    pub request: FeedRequest,
    pub interval: PollInterval,
}

/// Quakes at or above `mag_min` with `time` in `[start, replay_at]`.
pub fn displayed_quakes(quakes: &[Quake], mag_min: f64, start: i64, replay_at: i64) -> Vec<Quake> {
    quakes
        .iter()
        .filter(|q| q.mag >= mag_min && q.time >= start && q.time <= replay_at)
        .cloned()
        .collect()
}

/// Floods whose `[start, end]` overlaps `[start, replay_at]`. When upstream
/// gave `start > end`, the midpoint `time` decides instead. Live mode shows
/// the whole rolling set.
pub fn displayed_floods(floods: &[Flood], start: i64, replay_at: i64, live: bool) -> Vec<Flood> {
    if live {
        return floods.to_vec();
    }
    floods
        .iter()
        .filter(|f| {
            if f.start <= f.end {
                f.start <= replay_at && f.end >= start
            } else {
                f.time >= start && f.time <= replay_at
            }
        })
        .cloned()
        .collect()
}

/// KPIs over the displayed quakes.
pub fn quake_kpi(displayed: &[Quake], now_ms: i64) -> QuakeKpi {
    let mags: Vec<f64> = displayed
        .iter()
        .map(|q| q.mag)
        .filter(|m| !m.is_nan())
        .collect();
    QuakeKpi {
        count_hour: displayed.iter().filter(|q| q.time >= now_ms - HOUR_MS).count(),
        max_mag: mags.iter().copied().fold(0.0, f64::max),
        avg_mag: mean(&mags),
        total: displayed.len(),
    }
}

pub fn flood_kpi(displayed: &[Flood]) -> FloodKpi {
    use crate::event::AlertLevel;
    FloodKpi {
        total: displayed.len(),
        red: displayed.iter().filter(|f| f.level == AlertLevel::Red).count(),
        orange: displayed
            .iter()
            .filter(|f| f.level == AlertLevel::Orange)
            .count(),
        current: displayed.iter().filter(|f| f.is_current).count(),
    }
}

#[derive(Debug)]
pub struct Dashboard {
    hazard: Hazard,
    mode: TimeMode,
    window_key: QuakeWindow,
    mag_min: f64,
    live_end: bool,
    scrub_pct: f64,
    history_date: Option<NaiveDate>,
    range_start: Option<DateTime<Utc>>,
    range_end: Option<DateTime<Utc>>,
    range_error: Option<RangeError>,
    quakes: Vec<Quake>,
    floods: Vec<Flood>,
    seen: SeenSet,
    selected: Option<HazardEvent>,
    camera: Option<CameraTarget>,
    effect: Option<Effect>,
    tour: TourMachine,
    tour_config: TourConfig,
    polling: PollingConfig,
    flood_page_size: u32,
    toasts: ToastQueue,
    /// Feeds whose last fetch failed, so recovery can be announced.
    failing: HashSet<Hazard>,
    generation: u64,
    last_fetch: Option<DateTime<Utc>>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new(&AppConfig::default())
    }
}

impl Dashboard {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            hazard: Hazard::Earthquakes,
            mode: TimeMode::Live,
            window_key: QuakeWindow::Day,
            mag_min: 0.0,
            live_end: true,
            scrub_pct: 100.0,
            history_date: None,
            range_start: None,
            range_end: None,
            range_error: None,
            quakes: Vec::new(),
            floods: Vec::new(),
            seen: SeenSet::new(),
            selected: None,
            camera: None,
            effect: None,
            tour: TourMachine::new(),
            tour_config: config.tour.clone(),
            polling: config.polling.clone(),
            flood_page_size: config.feeds.flood_page_size,
            toasts: ToastQueue::new(),
            failing: HashSet::new(),
            generation: 0,
            last_fetch: None,
        }
    }

    // ----- selection inputs -------------------------------------------

    pub fn hazard(&self) -> Hazard {
        self.hazard
    }

    pub fn mode(&self) -> TimeMode {
        self.mode
    }

    pub fn window_key(&self) -> QuakeWindow {
        self.window_key
    }

    pub fn mag_min(&self) -> f64 {
        self.mag_min
    }

    pub fn live_end(&self) -> bool {
        self.live_end
    }

    pub fn scrub_pct(&self) -> f64 {
        self.scrub_pct
    }

    pub fn history_date(&self) -> Option<NaiveDate> {
        self.history_date
    }

    pub fn range(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (self.range_start, self.range_end)
    }

    pub fn range_error(&self) -> Option<RangeError> {
        self.range_error
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_hazard(&mut self, hazard: Hazard) {
        if self.hazard == hazard {
            return;
        }
        self.hazard = hazard;
        self.selected = None;
        self.context_changed();
    }

    pub fn set_mode(&mut self, mode: TimeMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.quakes.clear();
        self.floods.clear();
        self.selected = None;
        self.context_changed();
    }

    pub fn set_window_key(&mut self, key: QuakeWindow) {
        if self.window_key == key {
            return;
        }
        self.window_key = key;
        self.quakes.clear();
        self.context_changed();
    }

    pub fn set_history_date(&mut self, date: Option<NaiveDate>) {
        if self.history_date == date {
            return;
        }
        self.history_date = date;
        self.quakes.clear();
        self.floods.clear();
        self.context_changed();
    }

    pub fn pick_random_day<R: Rng + ?Sized>(&mut self, rng: &mut R, today: NaiveDate) -> NaiveDate {
        let day = random_history_day(rng, today);
        self.set_history_date(Some(day));
        day
    }

    pub fn set_range_start(&mut self, start: Option<DateTime<Utc>>) {
        if self.range_start == start {
            return;
        }
        self.range_start = start;
        self.context_changed();
    }

    pub fn set_range_end(&mut self, end: Option<DateTime<Utc>>) {
        if self.range_end == end {
            return;
        }
        self.range_end = end;
        self.context_changed();
    }

    /// Changes the threshold only; the fetched data stays valid.
    pub fn set_mag_min(&mut self, mag_min: f64) {
        if self.mag_min == mag_min {
            return;
        }
        self.mag_min = mag_min;
        self.end_tour();
    }

    pub fn set_live_end(&mut self, live_end: bool) {
        self.live_end = live_end;
        if live_end {
            self.scrub_pct = 100.0;
        }
    }

    pub fn set_scrub_pct(&mut self, pct: f64) {
        self.scrub_pct = pct.clamp(0.0, 100.0);
        self.live_end = false;
    }

    /// Ends any tour, invalidates in-flight results and re-validates the
    /// custom range.
    fn context_changed(&mut self) {
        self.end_tour();
        self.generation += 1;
        self.revalidate();
        debug!(generation = self.generation, hazard = %self.hazard, mode = ?self.mode, "selection changed");
    }

    fn revalidate(&mut self) {
        self.range_error = match self.mode {
            TimeMode::CustomRange => validate_custom_range(self.range_start, self.range_end),
            _ => None,
        };
    }

    // ----- window and derived views -----------------------------------

    pub fn window(&self, now: DateTime<Utc>) -> TimeWindow {
        match self.mode {
            TimeMode::Live => TimeWindow::live(now, live_window_ms(self.hazard, self.window_key)),
            TimeMode::HistoryDay => match self.history_date {
                Some(date) => TimeWindow::history_day(date),
                None => TimeWindow {
                    mode: TimeMode::HistoryDay,
                    start: None,
                    end: None,
                },
            },
            TimeMode::CustomRange => TimeWindow::custom_range(self.range_start, self.range_end),
        }
    }

    pub fn replay_at(&self, now: DateTime<Utc>) -> Option<i64> {
        let (start, end) = self.window(now).bounds_ms()?;
        Some(replay_position(start, end, self.live_end, self.scrub_pct))
    }

    pub fn displayed_quakes(&self, now: DateTime<Utc>) -> Vec<Quake> {
        match (self.window(now).bounds_ms(), self.replay_at(now)) {
            (Some((start, _)), Some(at)) => displayed_quakes(&self.quakes, self.mag_min, start, at),
            _ => Vec::new(),
        }
    }

    pub fn displayed_floods(&self, now: DateTime<Utc>) -> Vec<Flood> {
        match (self.window(now).bounds_ms(), self.replay_at(now)) {
            (Some((start, _)), Some(at)) => {
                displayed_floods(&self.floods, start, at, self.mode == TimeMode::Live)
            }
            _ => Vec::new(),
        }
    }

    fn displayed_events(&self, now: DateTime<Utc>) -> Vec<HazardEvent> {
        match self.hazard {
            Hazard::Earthquakes => self
                .displayed_quakes(now)
                .into_iter()
                .map(HazardEvent::Quake)
                .collect(),
            Hazard::Floods => self
                .displayed_floods(now)
                .into_iter()
                .map(HazardEvent::Flood)
                .collect(),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> DashboardView {
        let window = self.window(now);
        let quakes = self.displayed_quakes(now);
        let floods = self.displayed_floods(now);
        let can_tour = self.can_tour_with(&quakes, &floods);
        DashboardView {
            window,
            window_ms: window.bounds_ms(),
            replay_at: self.replay_at(now),
            quake_kpi: quake_kpi(&quakes, now.timestamp_millis()),
            flood_kpi: flood_kpi(&floods),
            quakes,
            floods,
            range_error: self.range_error,
            can_tour,
        }
    }

    pub fn can_tour(&self, now: DateTime<Utc>) -> bool {
        self.can_tour_with(&self.displayed_quakes(now), &self.displayed_floods(now))
    }

    fn can_tour_with(&self, quakes: &[Quake], floods: &[Flood]) -> bool {
        let has_events = match self.hazard {
            Hazard::Earthquakes => !quakes.is_empty(),
            Hazard::Floods => !floods.is_empty(),
        };
        let selection_ok = match self.mode {
            TimeMode::Live => true,
            TimeMode::HistoryDay => self.history_date.is_some(),
            TimeMode::CustomRange => {
                self.range_start.is_some() && self.range_end.is_some() && self.range_error.is_none()
            }
        };
        has_events && selection_ok
    }

    pub fn quakes(&self) -> &[Quake] {
        &self.quakes
    }

    pub fn floods(&self) -> &[Flood] {
        &self.floods
    }

    pub fn last_fetch(&self) -> Option<DateTime<Utc>> {
        self.last_fetch
    }

    // ----- fetching ---------------------------------------------------

    /// The request the current selection needs, or `None` while the
    /// selection is incomplete or invalid.
    pub fn fetch_plan(&self, now: DateTime<Utc>) -> Option<FetchTicket> {
        if self.range_error.is_some() {
            return None;
        }
        let window = self.window(now);
        let request = match (self.hazard, self.mode) {
            (Hazard::Earthquakes, TimeMode::Live) => FeedRequest::LiveQuakes(self.window_key),
            (Hazard::Earthquakes, _) => FeedRequest::QuakeRange {
                start: window.start?,
                end: window.end?,
            },
            (Hazard::Floods, TimeMode::Live) => FeedRequest::Floods(FloodQuery {
                page_size: self.flood_page_size,
                ..FloodQuery::default()
            }),
            (Hazard::Floods, _) => FeedRequest::Floods(FloodQuery {
                page_size: self.flood_page_size,
                ..FloodQuery::between(window.start?, window.end?)
            }),
        };
        Some(FetchTicket {
            generation: self.generation,
            request,
        })
    }

    /// The live loop for the current selection; `None` outside live mode.
    pub fn poll_spec(&self, now: DateTime<Utc>) -> Option<PollSpec> {
        if self.mode != TimeMode::Live {
            return None;
        }
        let ticket = self.fetch_plan(now)?;
        let secs = |s: u64| Duration::from_secs(s);
        let interval = match self.hazard {
            Hazard::Earthquakes => PollInterval {
                base: secs(match self.window_key {
                    QuakeWindow::Hour => self.polling.quake_hour_base_secs,
                    QuakeWindow::Day => self.polling.quake_day_base_secs,
                }),
                jitter: secs(self.polling.quake_jitter_secs),
            },
            Hazard::Floods => PollInterval {
                base: secs(self.polling.flood_base_secs),
                jitter: secs(self.polling.flood_jitter_secs),
            },
        };
        Some(PollSpec {
            generation: ticket.generation,
            request: ticket.request,
            interval,
        })
    }

    /// Installs a fetched payload. Results for a superseded generation are
    /// dropped and `false` is returned.
    pub fn apply_payload(&mut self, generation: u64, payload: FeedPayload, now: DateTime<Utc>) -> bool {
        if generation != self.generation {
            debug!(generation, current = self.generation, "dropping stale payload");
            return false;
        }
        let hazard = payload.hazard();
        match payload {
            FeedPayload::Quakes(value) => match crate::usgs::quakes_from_feed(&value) {
                Ok(mut quakes) => {
                    self.seen.mark(&mut quakes);
                    info!(count = quakes.len(), "earthquakes updated");
                    self.quakes = quakes;
                }
                Err(err) => {
                    self.report_failure(generation, Hazard::Earthquakes, &err, now);
                    return false;
                }
            },
            FeedPayload::Floods { payload, window } => {
                let mut floods = normalize_floods(&payload, window);
                floods.sort_by(|a, b| b.time.cmp(&a.time));
                info!(count = floods.len(), "floods updated");
                self.floods = floods;
            }
        }
        if self.failing.remove(&hazard) {
            let title = match hazard {
                Hazard::Earthquakes => "Earthquake feed restored",
                Hazard::Floods => "Flood feed restored",
            };
            self.toasts
                .push(title, "", ToastKind::Success, now.timestamp_millis());
        }
        self.last_fetch = Some(now);
        true
    }

    /// Turns a failed fetch into an error toast naming the feed.
    pub fn report_failure(&mut self, generation: u64, hazard: Hazard, error: &FetchError, now: DateTime<Utc>) {
        if generation != self.generation {
            return;
        }
        let title = match hazard {
            Hazard::Earthquakes => "Earthquake feed unavailable",
            Hazard::Floods => "Flood feed unavailable",
        };
        self.failing.insert(hazard);
        self.toasts
            .push(title, error.to_string(), ToastKind::Error, now.timestamp_millis());
    }

    // ----- selection, camera, effects ---------------------------------

    pub fn selected(&self) -> Option<&HazardEvent> {
        self.selected.as_ref()
    }

    pub fn select(&mut self, event: HazardEvent) {
        self.selected = Some(event);
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn camera(&self) -> Option<CameraTarget> {
        self.camera
    }

    pub fn fly_to_preset(&mut self, preset: &MapPreset) {
        self.camera = Some(preset.target);
    }

    /// The user moved the map; drop any pending automatic flight.
    pub fn on_user_move(&mut self) {
        self.camera = None;
    }

    pub fn effect(&self) -> Option<Effect> {
        self.effect
    }

    // ----- tour -------------------------------------------------------

    pub fn tour(&self) -> &TourMachine {
        &self.tour
    }

    pub fn tour_config(&self) -> &TourConfig {
        &self.tour_config
    }

    /// Snapshots the displayed events and starts a tour over them. A
    /// declined request leaves an info toast and changes nothing else.
    pub fn start_tour(&mut self, now: DateTime<Utc>) -> Result<TourPlan, TourDeclined> {
        if self.tour.is_running() {
            return Err(TourDeclined::AlreadyRunning);
        }
        let now_ms = now.timestamp_millis();
        if !self.can_tour(now) {
            let reason = match (self.mode, self.range_error) {
                (TimeMode::CustomRange, Some(err)) => err.to_string(),
                (TimeMode::HistoryDay, _) if self.history_date.is_none() => {
                    "Pick a day first".to_owned()
                }
                _ => format!("No {} to show in this window", self.hazard.label().to_lowercase()),
            };
            self.toasts.push("Tour unavailable", reason, ToastKind::Info, now_ms);
            return Err(TourDeclined::NotEligible);
        }
        let events = self.displayed_events(now);
        match self.tour.begin(self.hazard, events, self.tour_config.max_events) {
            Ok(plan) => Ok(plan),
            Err(declined) => {
                self.toasts
                    .push("Tour unavailable", "Nothing to visit", ToastKind::Info, now_ms);
                Err(declined)
            }
        }
    }

    /// Stops a running tour and restores the idle view. Safe to call at any
    /// time; does nothing when no tour is running.
    pub fn end_tour(&mut self) {
        if self.tour.stop() {
            self.reset_after_tour();
        }
    }

    fn reset_after_tour(&mut self) {
        self.selected = None;
        self.effect = None;
        self.camera = Some(WORLD_VIEW);
    }

    /// Performs a tour step if `token` is still the running tour.
    pub fn apply_tour_action(&mut self, token: TourToken, action: TourAction) -> bool {
        if !self.tour.is_current(token) {
            return false;
        }
        match action {
            TourAction::Select { cursor, event } => {
                self.tour.advance(token, cursor);
                self.selected = Some(event);
            }
            TourAction::FlyTo(target) => self.camera = Some(target),
            TourAction::Effect(effect) => self.effect = effect,
            TourAction::Finish => {
                self.tour.finish(token);
                self.reset_after_tour();
            }
        }
        true
    }

    // ----- toasts -----------------------------------------------------

    pub fn toasts(&self) -> impl Iterator<Item = &Toast> {
        self.toasts.iter()
    }

    pub fn dismiss_toast(&mut self, id: u64) {
        self.toasts.dismiss(id);
    }

    pub fn expire_toasts(&mut self, now: DateTime<Utc>) {
        self.toasts.expire(now.timestamp_millis());
    }
}

impl TourHost for Mutex<Dashboard> {
    fn apply(&self, token: TourToken, action: TourAction) -> bool {
        self.lock().apply_tour_action(token, action)
    }
}
