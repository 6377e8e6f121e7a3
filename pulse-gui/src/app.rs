use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use eframe::egui::{self, Color32, RichText, Rounding, Stroke};
use parking_lot::Mutex;
use pulse_core::config::UiConfig;
use pulse_core::event::MagnitudeBand;
use pulse_core::time::{format_ago, format_range_label, format_utc_minute, to_kpi};
use pulse_core::toast::{Toast, ToastKind};
use pulse_core::tour::Effect;
use pulse_core::{
    poll_once, run_tour, spawn_feed_loop, AlertLevel, AppConfig, CameraTarget, Dashboard,
    DashboardView, Event, Hazard, HazardEvent, HazardFeeds, PollerHandle, QuakeWindow, TimeMode,
    PRESETS,
};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::map::{band_color, level_color, MapView};

const RANGE_FORMAT: &str = "%Y-%m-%d %H:%M";

pub struct AppInit {
    pub runtime: Arc<Runtime>,
    pub feeds: HazardFeeds,
    pub updates: mpsc::Receiver<Event>,
    pub update_tx: mpsc::Sender<Event>,
    pub config: AppConfig,
}

/// Everything the controls need from the dashboard, copied out under one
/// short lock so drawing never holds it.
struct Controls {
    hazard: Hazard,
    mode: TimeMode,
    window_key: QuakeWindow,
    mag_min: f64,
    live_end: bool,
    scrub_pct: f64,
    tour_running: bool,
    tour_progress: Option<(usize, usize)>,
    selected: Option<HazardEvent>,
    camera: Option<CameraTarget>,
    effect: Option<Effect>,
    toasts: Vec<Toast>,
    last_fetch: Option<DateTime<Utc>>,
}

enum UiAction {
    Hazard(Hazard),
    Mode(TimeMode),
    Window(QuakeWindow),
    MagMin(f64),
    LiveEnd(bool),
    Scrub(f64),
    HistoryDate(Option<NaiveDate>),
    RandomDay,
    Range(Option<DateTime<Utc>>, Option<DateTime<Utc>>),
    Preset(usize),
    ToggleTour,
    Refresh,
    Select(HazardEvent),
    ClearSelection,
    UserMoved,
    DismissToast(u64),
}

pub struct PulseApp {
    runtime: Arc<Runtime>,
    feeds: HazardFeeds,
    dashboard: Arc<Mutex<Dashboard>>,
    updates: mpsc::Receiver<Event>,
    update_tx: mpsc::Sender<Event>,
    poller: Option<PollerHandle>,
    requested_generation: Option<u64>,
    map: MapView,
    date_input: String,
    range_start_input: String,
    range_end_input: String,
    input_error: Option<String>,
}

impl PulseApp {
    pub fn new(init: AppInit, ctx: &egui::Context) -> Self {
        setup_theme(ctx, &init.config.ui);
        Self {
            runtime: init.runtime,
            feeds: init.feeds,
            dashboard: Arc::new(Mutex::new(Dashboard::new(&init.config))),
            updates: init.updates,
            update_tx: init.update_tx,
            poller: None,
            requested_generation: None,
            map: MapView::new(),
            date_input: String::new(),
            range_start_input: String::new(),
            range_end_input: String::new(),
            input_error: None,
        }
    }

    fn refresh_updates(&mut self, now: DateTime<Utc>) {
        while let Ok(evt) = self.updates.try_recv() {
            let mut dash = self.dashboard.lock();
            match evt {
                Event::Payload {
                    generation,
                    payload,
                } => {
                    dash.apply_payload(generation, payload, now);
                }
                Event::Failed {
                    generation,
                    hazard,
                    error,
                } => dash.report_failure(generation, hazard, &error, now),
            }
        }
    }

    /// Keeps exactly the fetching the current selection needs: one live
    /// loop in live mode, otherwise a single fetch per selection.
    fn sync_fetching(&mut self, now: DateTime<Utc>) {
        let (spec, ticket) = {
            let dash = self.dashboard.lock();
            (dash.poll_spec(now), dash.fetch_plan(now))
        };

        match spec {
            Some(spec) => {
                let current = self
                    .poller
                    .as_ref()
                    .is_some_and(|p| p.generation() == spec.generation && !p.is_finished());
                if !current {
                    self.stop_poller();
                    let _guard = self.runtime.enter();
                    self.poller = Some(spawn_feed_loop(
                        self.feeds.clone(),
                        spec.request,
                        spec.interval,
                        spec.generation,
                        self.update_tx.clone(),
                    ));
                }
            }
            None => {
                self.stop_poller();
                if let Some(ticket) = ticket {
                    if self.requested_generation != Some(ticket.generation) {
                        self.requested_generation = Some(ticket.generation);
                        self.fetch_once(ticket.generation, ticket.request, false);
                    }
                }
            }
        }
    }

    fn fetch_once(&self, generation: u64, request: pulse_core::FeedRequest, fresh: bool) {
        let feeds = self.feeds.clone();
        let tx = self.update_tx.clone();
        self.runtime.spawn(async move {
            if fresh {
                feeds.invalidate(&request).await;
            }
            let evt = poll_once(&feeds, &request, generation).await;
            if tx.send(evt).await.is_err() {
                debug!("app closed before fetch completed");
            }
        });
    }

    fn stop_poller(&mut self) {
        if let Some(handle) = self.poller.take() {
            handle.cancel();
            self.runtime.spawn(async move {
                if let Err(e) = handle.stop().await {
                    warn!(error = %e, "feed loop did not stop cleanly");
                }
            });
        }
    }

    fn start_tour(&self, now: DateTime<Utc>) {
        let started = {
            let mut dash = self.dashboard.lock();
            dash.start_tour(now)
                .map(|plan| (plan, dash.tour_config().clone()))
        };
        match started {
            Ok((plan, config)) => {
                let host = self.dashboard.clone();
                self.runtime.spawn(async move {
                    let outcome = run_tour(&*host, plan, &config).await;
                    debug!(?outcome, "tour walk ended");
                });
            }
            Err(declined) => info!(?declined, "tour declined"),
        }
    }

    fn controls(&self) -> Controls {
        let dash = self.dashboard.lock();
        Controls {
            hazard: dash.hazard(),
            mode: dash.mode(),
            window_key: dash.window_key(),
            mag_min: dash.mag_min(),
            live_end: dash.live_end(),
            scrub_pct: dash.scrub_pct(),
            tour_running: dash.tour().is_running(),
            tour_progress: dash.tour().progress(),
            selected: dash.selected().cloned(),
            camera: dash.camera(),
            effect: dash.effect(),
            toasts: dash.toasts().cloned().collect(),
            last_fetch: dash.last_fetch(),
        }
    }

    fn apply_actions(&mut self, actions: Vec<UiAction>, now: DateTime<Utc>) {
        for action in actions {
            match action {
                UiAction::ToggleTour => {
                    let running = self.dashboard.lock().tour().is_running();
                    if running {
                        self.dashboard.lock().end_tour();
                    } else {
                        self.start_tour(now);
                    }
                }
                UiAction::Refresh => {
                    // A running live loop keeps its own schedule.
                    let ticket = self.dashboard.lock().fetch_plan(now);
                    if let Some(ticket) = ticket {
                        self.fetch_once(ticket.generation, ticket.request, true);
                    }
                }
                UiAction::RandomDay => {
                    let today = now.date_naive();
                    let day = self
                        .dashboard
                        .lock()
                        .pick_random_day(&mut rand::thread_rng(), today);
                    self.date_input = day.format("%Y-%m-%d").to_string();
                }
                other => {
                    let mut dash = self.dashboard.lock();
                    match other {
                        UiAction::Hazard(h) => dash.set_hazard(h),
                        UiAction::Mode(m) => dash.set_mode(m),
                        UiAction::Window(w) => dash.set_window_key(w),
                        UiAction::MagMin(m) => dash.set_mag_min(m),
                        UiAction::LiveEnd(on) => dash.set_live_end(on),
                        UiAction::Scrub(pct) => dash.set_scrub_pct(pct),
                        UiAction::HistoryDate(date) => dash.set_history_date(date),
                        UiAction::Range(start, end) => {
                            dash.set_range_start(start);
                            dash.set_range_end(end);
                        }
                        UiAction::Preset(i) => {
                            if let Some(preset) = PRESETS.get(i) {
                                dash.fly_to_preset(preset);
                            }
                        }
                        UiAction::Select(event) => dash.select(event),
                        UiAction::ClearSelection => dash.clear_selection(),
                        UiAction::UserMoved => dash.on_user_move(),
                        UiAction::DismissToast(id) => dash.dismiss_toast(id),
                        UiAction::ToggleTour | UiAction::Refresh | UiAction::RandomDay => {}
                    }
                }
            }
        }
    }

    fn draw_controls(&mut self, ctx: &egui::Context, c: &Controls, view: &DashboardView, actions: &mut Vec<UiAction>) {
        egui::TopBottomPanel::top("controls").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                ui.label(RichText::new("QuakePulse").strong().size(16.0));
                ui.separator();
                for hazard in [Hazard::Earthquakes, Hazard::Floods] {
                    if ui.selectable_label(c.hazard == hazard, hazard.label()).clicked() {
                        actions.push(UiAction::Hazard(hazard));
                    }
                }
                ui.separator();
                for (mode, label) in [
                    (TimeMode::Live, "Live"),
                    (TimeMode::HistoryDay, "History day"),
                    (TimeMode::CustomRange, "Custom range"),
                ] {
                    if ui.selectable_label(c.mode == mode, label).clicked() {
                        actions.push(UiAction::Mode(mode));
                    }
                }
                if c.hazard == Hazard::Earthquakes && c.mode == TimeMode::Live {
                    ui.separator();
                    for (key, label) in [(QuakeWindow::Hour, "Past hour"), (QuakeWindow::Day, "Past day")] {
                        if ui.selectable_label(c.window_key == key, label).clicked() {
                            actions.push(UiAction::Window(key));
                        }
                    }
                }
                if c.hazard == Hazard::Earthquakes {
                    ui.separator();
                    let mut mag = c.mag_min;
                    let slider = egui::Slider::new(&mut mag, 0.0..=8.0)
                        .step_by(0.5)
                        .text("min magnitude");
                    if ui.add(slider).changed() {
                        actions.push(UiAction::MagMin(mag));
                    }
                }
            });

            match c.mode {
                TimeMode::Live => {}
                TimeMode::HistoryDay => {
                    ui.horizontal(|ui| {
                        ui.label("Day (UTC)");
                        ui.add(egui::TextEdit::singleline(&mut self.date_input).hint_text("YYYY-MM-DD").desired_width(110.0));
                        if ui.button("Apply").clicked() {
                            match NaiveDate::parse_from_str(self.date_input.trim(), "%Y-%m-%d") {
                                Ok(date) if date < Utc::now().date_naive() => {
                                    self.input_error = None;
                                    actions.push(UiAction::HistoryDate(Some(date)));
                                }
                                Ok(_) => self.input_error = Some("Pick a day before today".into()),
                                Err(_) => self.input_error = Some("Use YYYY-MM-DD".into()),
                            }
                        }
                        if ui.button("Random day").clicked() {
                            self.input_error = None;
                            actions.push(UiAction::RandomDay);
                        }
                    });
                }
                TimeMode::CustomRange => {
                    ui.horizontal(|ui| {
                        ui.label("From (UTC)");
                        ui.add(egui::TextEdit::singleline(&mut self.range_start_input).hint_text("YYYY-MM-DD HH:MM").desired_width(140.0));
                        ui.label("to");
                        ui.add(egui::TextEdit::singleline(&mut self.range_end_input).hint_text("YYYY-MM-DD HH:MM").desired_width(140.0));
                        if ui.button("Apply").clicked() {
                            match (parse_range_input(&self.range_start_input), parse_range_input(&self.range_end_input)) {
                                (Ok(start), Ok(end)) => {
                                    self.input_error = None;
                                    actions.push(UiAction::Range(start, end));
                                }
                                _ => self.input_error = Some("Use YYYY-MM-DD HH:MM".into()),
                            }
                        }
                        if let Some(err) = view.range_error {
                            ui.label(RichText::new(err.to_string()).color(Color32::from_rgb(229, 57, 53)));
                        }
                    });
                }
            }
            if let Some(err) = &self.input_error {
                ui.label(RichText::new(err.as_str()).color(Color32::from_rgb(229, 57, 53)));
            }

            ui.horizontal(|ui| {
                let mut live_end = c.live_end;
                if ui.checkbox(&mut live_end, "Follow end").changed() {
                    actions.push(UiAction::LiveEnd(live_end));
                }
                let mut pct = if c.live_end { 100.0 } else { c.scrub_pct };
                let slider = egui::Slider::new(&mut pct, 0.0..=100.0).show_value(false);
                if ui.add_enabled(view.window_ms.is_some(), slider).changed() {
                    actions.push(UiAction::Scrub(pct));
                }
                if let Some((start, end)) = view.window_ms {
                    ui.label(RichText::new(format_range_label(start, end, pct)).monospace());
                }
            });

            ui.horizontal(|ui| {
                for (i, preset) in PRESETS.iter().enumerate() {
                    if ui.small_button(preset.name).clicked() {
                        actions.push(UiAction::Preset(i));
                    }
                }
                ui.separator();
                let tour_label = if c.tour_running { "End tour" } else { "Tour" };
                if ui
                    .add_enabled(c.tour_running || view.can_tour, egui::Button::new(tour_label))
                    .clicked()
                {
                    actions.push(UiAction::ToggleTour);
                }
                if let Some((stop, of)) = c.tour_progress {
                    ui.label(RichText::new(format!("{stop}/{of}")).monospace().weak());
                }
                if ui.small_button("⟳ Refresh").clicked() {
                    actions.push(UiAction::Refresh);
                }
                if let Some(at) = c.last_fetch {
                    ui.label(
                        RichText::new(format!("updated {}", format_ago(Utc::now().timestamp_millis(), at.timestamp_millis())))
                            .weak()
                            .size(12.0),
                    );
                }
            });
            ui.add_space(4.0);
        });
    }

    fn draw_kpis(&self, ctx: &egui::Context, c: &Controls, view: &DashboardView) {
        egui::TopBottomPanel::top("kpis").show(ctx, |ui| {
            ui.horizontal(|ui| match c.hazard {
                Hazard::Earthquakes => {
                    kpi(ui, "Events", to_kpi(view.quake_kpi.total));
                    kpi(ui, "Last hour", to_kpi(view.quake_kpi.count_hour));
                    kpi(ui, "Max", format!("M{:.1}", view.quake_kpi.max_mag));
                    kpi(ui, "Avg", format!("M{:.2}", view.quake_kpi.avg_mag));
                }
                Hazard::Floods => {
                    kpi(ui, "Floods", to_kpi(view.flood_kpi.total));
                    kpi(ui, "Red", to_kpi(view.flood_kpi.red));
                    kpi(ui, "Orange", to_kpi(view.flood_kpi.orange));
                    kpi(ui, "Ongoing", to_kpi(view.flood_kpi.current));
                }
            });
        });
    }

    fn draw_legend(&self, ctx: &egui::Context, c: &Controls) {
        egui::TopBottomPanel::bottom("legend").show(ctx, |ui| {
            ui.horizontal(|ui| match c.hazard {
                Hazard::Earthquakes => {
                    for band in MagnitudeBand::ALL {
                        swatch(ui, band_color(band), band.label());
                    }
                    ui.label(RichText::new("○ new since last poll").weak().size(12.0));
                }
                Hazard::Floods => {
                    for level in [AlertLevel::Red, AlertLevel::Orange, AlertLevel::Green, AlertLevel::Unknown] {
                        let label = match level {
                            AlertLevel::Unknown => "unknown",
                            other => other.as_str(),
                        };
                        swatch(ui, level_color(level), label);
                    }
                    ui.label(RichText::new("○ ongoing").weak().size(12.0));
                }
            });
        });
    }

    fn draw_drawer(&self, ctx: &egui::Context, c: &Controls, actions: &mut Vec<UiAction>) {
        let Some(selected) = &c.selected else {
            return;
        };
        let now_ms = Utc::now().timestamp_millis();
        egui::SidePanel::right("details").min_width(260.0).show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Details");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.small_button("✕").clicked() {
                        actions.push(UiAction::ClearSelection);
                    }
                });
            });
            ui.separator();
            match selected {
                HazardEvent::Quake(q) => {
                    ui.label(RichText::new(format!("M{:.1}", q.mag)).strong().size(20.0).color(band_color(MagnitudeBand::of(q.mag))));
                    ui.label(q.place.as_deref().unwrap_or("Unknown location"));
                    ui.label(format!("{} ({})", format_utc_minute(q.time), format_ago(now_ms, q.time)));
                    if let Some(depth) = q.depth {
                        ui.label(format!("Depth {depth:.1} km"));
                    }
                    ui.label(RichText::new(format!("{:.3}, {:.3}", q.lat, q.lon)).monospace());
                    if ui.button("🔗 USGS event page").clicked() {
                        open_link(&q.event_page_url());
                    }
                }
                HazardEvent::Flood(f) => {
                    ui.label(RichText::new(&f.name).strong().size(16.0));
                    let level = match f.level {
                        AlertLevel::Unknown => "unknown",
                        other => other.as_str(),
                    };
                    ui.label(RichText::new(format!("Alert: {level}")).color(level_color(f.level)));
                    if let Some(country) = &f.country {
                        ui.label(country.as_str());
                    }
                    ui.label(format!("{} → {}", format_utc_minute(f.start), format_utc_minute(f.end)));
                    if f.is_current {
                        ui.label(RichText::new("Ongoing").italics());
                    }
                    ui.label(RichText::new(format!("{:.3}, {:.3}", f.lat, f.lon)).monospace());
                    if let Some(url) = &f.links.report {
                        if ui.button("🔗 GDACS report").clicked() {
                            open_link(url);
                        }
                    }
                    if let Some(url) = &f.links.details {
                        if ui.button("🔗 Event details").clicked() {
                            open_link(url);
                        }
                    }
                }
            }
        });
    }

    fn draw_toasts(&self, ctx: &egui::Context, c: &Controls, actions: &mut Vec<UiAction>) {
        if c.toasts.is_empty() {
            return;
        }
        egui::Area::new(egui::Id::new("toasts"))
            .anchor(egui::Align2::RIGHT_BOTTOM, egui::vec2(-12.0, -40.0))
            .show(ctx, |ui| {
                for toast in &c.toasts {
                    let accent = match toast.kind {
                        ToastKind::Info => Color32::from_rgb(56, 189, 248),
                        ToastKind::Success => Color32::from_rgb(67, 160, 71),
                        ToastKind::Error => Color32::from_rgb(229, 57, 53),
                    };
                    egui::Frame::popup(ui.style())
                        .stroke(Stroke::new(1.0, accent))
                        .show(ui, |ui| {
                            ui.set_max_width(320.0);
                            ui.horizontal(|ui| {
                                ui.label(RichText::new(&toast.title).strong().color(accent));
                                if ui.small_button("✕").clicked() {
                                    actions.push(UiAction::DismissToast(toast.id));
                                }
                            });
                            if !toast.description.is_empty() {
                                ui.label(RichText::new(&toast.description).size(12.0));
                            }
                        });
                    ui.add_space(6.0);
                }
            });
    }
}

impl Drop for PulseApp {
    fn drop(&mut self) {
        self.dashboard.lock().end_tour();
        if let Some(handle) = self.poller.take() {
            let _ = self.runtime.block_on(handle.stop());
        }
    }
}

impl eframe::App for PulseApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let now = Utc::now();
        self.refresh_updates(now);
        self.dashboard.lock().expire_toasts(now);
        self.sync_fetching(now);

        let view = self.dashboard.lock().snapshot(now);
        let controls = self.controls();
        let mut actions = Vec::new();

        self.draw_controls(ctx, &controls, &view, &mut actions);
        self.draw_kpis(ctx, &controls, &view);
        self.draw_legend(ctx, &controls);
        self.draw_drawer(ctx, &controls, &mut actions);

        self.map.follow(controls.camera);
        self.map.set_effect(controls.effect);
        let selected_id = controls.selected.as_ref().map(|e| e.id().to_owned());
        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let out = self.map.show(ui, controls.hazard, &view.quakes, &view.floods, selected_id.as_deref());
                if let Some(event) = out.clicked {
                    actions.push(UiAction::Select(event));
                }
                if out.user_moved {
                    actions.push(UiAction::UserMoved);
                }
            });

        self.draw_toasts(ctx, &controls, &mut actions);
        self.apply_actions(actions, now);

        let next = if self.map.is_animating() || controls.tour_running {
            Duration::from_millis(16)
        } else {
            Duration::from_millis(250)
        };
        ctx.request_repaint_after(next);
    }
}

fn kpi(ui: &mut egui::Ui, label: &str, value: String) {
    ui.group(|ui| {
        ui.vertical(|ui| {
            ui.label(RichText::new(label).weak().size(11.0));
            ui.label(RichText::new(value).strong().size(18.0));
        });
    });
}

fn swatch(ui: &mut egui::Ui, color: Color32, label: &str) {
    let (rect, _) = ui.allocate_exact_size(egui::vec2(12.0, 12.0), egui::Sense::hover());
    ui.painter().circle_filled(rect.center(), 6.0, color);
    ui.label(RichText::new(label).size(12.0));
}

fn open_link(url: &str) {
    if let Err(e) = webbrowser::open(url) {
        warn!(error = %e, url = %url, "could not open link");
    }
}

fn parse_range_input(text: &str) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    NaiveDateTime::parse_from_str(text, RANGE_FORMAT).map(|naive| Some(naive.and_utc()))
}

fn rgb(c: [u8; 3]) -> Color32 {
    Color32::from_rgb(c[0], c[1], c[2])
}

fn setup_theme(ctx: &egui::Context, ui_config: &UiConfig) {
    let mut style = (*ctx.style()).clone();

    let bg_color = rgb(ui_config.background_color);
    let panel_color = rgb(ui_config.panel_color);
    let text_color = rgb(ui_config.text_color);
    let accent_color = rgb(ui_config.accent_color);
    let border_color = Color32::from_rgb(48, 54, 61);

    style.visuals.dark_mode = true;
    style.visuals.panel_fill = panel_color;
    style.visuals.window_fill = bg_color;
    style.visuals.extreme_bg_color = bg_color;
    style.visuals.override_text_color = Some(text_color);

    style.visuals.widgets.noninteractive.bg_stroke = Stroke::new(1.0, border_color);
    style.visuals.widgets.hovered.bg_stroke = Stroke::new(1.0, accent_color);
    style.visuals.widgets.active.bg_fill = accent_color;
    style.visuals.selection.bg_fill = accent_color.gamma_multiply(0.35);
    style.visuals.selection.stroke = Stroke::new(1.0, accent_color);

    style.visuals.widgets.noninteractive.rounding = Rounding::same(3.0);
    style.visuals.widgets.inactive.rounding = Rounding::same(3.0);
    style.visuals.widgets.hovered.rounding = Rounding::same(3.0);
    style.visuals.widgets.active.rounding = Rounding::same(3.0);

    style.spacing.item_spacing = egui::vec2(8.0, 6.0);
    style.spacing.button_padding = egui::vec2(8.0, 4.0);

    ctx.set_style(style);
}
