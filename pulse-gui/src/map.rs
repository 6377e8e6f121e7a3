//! Minimal world map: equirectangular projection, circle markers,
//! click-to-select, drag/scroll navigation and animated camera flights.

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use eframe::egui::{self, Align2, Color32, FontId, Pos2, Rect, Sense, Stroke, Vec2};
use pulse_core::event::{marker_radius, MagnitudeBand};
use pulse_core::tour::{Effect, EffectKind};
use pulse_core::{AlertLevel, CameraTarget, Flood, Hazard, HazardEvent, Quake, WORLD_VIEW};

const MIN_ZOOM: f64 = 1.0;
const MAX_ZOOM: f64 = 10.0;
const DEFAULT_FLIGHT: Duration = Duration::from_millis(1200);
const FLOOD_RADIUS: f32 = 7.0;

const OCEAN: Color32 = Color32::from_rgb(17, 30, 46);
const GRID: Color32 = Color32::from_rgb(38, 56, 78);

pub fn level_color(level: AlertLevel) -> Color32 {
    match level {
        AlertLevel::Red => Color32::from_rgb(0xef, 0x44, 0x44),
        AlertLevel::Orange => Color32::from_rgb(0xf5, 0x9e, 0x0b),
        AlertLevel::Green => Color32::from_rgb(0x22, 0xc5, 0x5e),
        AlertLevel::Unknown => Color32::from_rgb(0x94, 0xa3, 0xb8),
    }
}

pub fn band_color(band: MagnitudeBand) -> Color32 {
    let [r, g, b] = band.rgb();
    Color32::from_rgb(r, g, b)
}

struct Flight {
    from_center: [f64; 2],
    from_zoom: f64,
    to: CameraTarget,
    started: Instant,
    duration: Duration,
}

#[derive(Default)]
pub struct MapOutput {
    pub clicked: Option<HazardEvent>,
    pub user_moved: bool,
}

pub struct MapView {
    /// `[lat, lon]`
    center: [f64; 2],
    zoom: f64,
    flight: Option<Flight>,
    last_target: Option<CameraTarget>,
    effect: Option<(Effect, Instant)>,
}

impl MapView {
    pub fn new() -> Self {
        Self {
            center: WORLD_VIEW.center,
            zoom: WORLD_VIEW.zoom,
            flight: None,
            last_target: None,
            effect: None,
        }
    }

    /// Starts a flight whenever the requested target changes.
    pub fn follow(&mut self, target: Option<CameraTarget>) {
        if target == self.last_target {
            return;
        }
        self.last_target = target;
        if let Some(to) = target {
            self.flight = Some(Flight {
                from_center: self.center,
                from_zoom: self.zoom,
                to,
                started: Instant::now(),
                duration: to.duration.unwrap_or(DEFAULT_FLIGHT),
            });
        }
    }

    pub fn set_effect(&mut self, effect: Option<Effect>) {
        match (effect, &self.effect) {
            (Some(next), Some((current, _))) if next == *current => {}
            (Some(next), _) => self.effect = Some((next, Instant::now())),
            (None, _) => self.effect = None,
        }
    }

    pub fn is_animating(&self) -> bool {
        self.flight.is_some() || self.effect.is_some()
    }

    fn step_flight(&mut self) {
        let Some(flight) = &self.flight else {
            return;
        };
        let t = if flight.duration.is_zero() {
            1.0
        } else {
            (flight.started.elapsed().as_secs_f64() / flight.duration.as_secs_f64()).min(1.0)
        };
        let eased = ease_in_out(t);
        let lerp = |a: f64, b: f64| a + (b - a) * eased;
        self.center = [
            lerp(flight.from_center[0], flight.to.center[0]),
            lerp(flight.from_center[1], flight.to.center[1]),
        ];
        self.zoom = lerp(flight.from_zoom, flight.to.zoom);
        if t >= 1.0 {
            self.flight = None;
        }
    }

    fn px_per_degree(&self, rect: Rect) -> f64 {
        rect.width() as f64 / 360.0 * 2f64.powf(self.zoom - 2.0)
    }

    fn project(&self, rect: Rect, lat: f64, lon: f64, offset: Vec2) -> Pos2 {
        let ppd = self.px_per_degree(rect);
        let dx = (lon - self.center[1]) * ppd;
        let dy = (self.center[0] - lat) * ppd;
        rect.center() + Vec2::new(dx as f32, dy as f32) + offset
    }

    pub fn show(
        &mut self,
        ui: &mut egui::Ui,
        hazard: Hazard,
        quakes: &[Quake],
        floods: &[Flood],
        selected_id: Option<&str>,
    ) -> MapOutput {
        self.step_flight();
        let mut out = MapOutput::default();

        let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let rect = response.rect;

        if response.dragged() && response.drag_delta() != Vec2::ZERO {
            let ppd = self.px_per_degree(rect);
            let delta = response.drag_delta();
            self.center[0] = (self.center[0] + delta.y as f64 / ppd).clamp(-85.0, 85.0);
            self.center[1] = wrap_lon(self.center[1] - delta.x as f64 / ppd);
            self.flight = None;
            out.user_moved = true;
        }
        if response.hovered() {
            let scroll = ui.input(|i| i.smooth_scroll_delta.y);
            if scroll != 0.0 {
                self.zoom = (self.zoom + scroll as f64 * 0.004).clamp(MIN_ZOOM, MAX_ZOOM);
                self.flight = None;
                out.user_moved = true;
            }
        }

        let (shake, elapsed) = self.effect_state();
        painter.rect_filled(rect, 0.0, ui.visuals().extreme_bg_color);
        let world = Rect::from_two_pos(
            self.project(rect, 90.0, -180.0, shake),
            self.project(rect, -90.0, 180.0, shake),
        );
        painter.rect_filled(world, 0.0, OCEAN);
        self.draw_graticule(&painter, rect, shake);

        // Markers, remembering screen positions for hit testing.
        let mut hits: Vec<(Pos2, f32, HazardEvent)> = Vec::new();
        match hazard {
            Hazard::Earthquakes => {
                // Largest on top.
                let mut ordered: Vec<&Quake> = quakes.iter().collect();
                ordered.sort_by(|a, b| a.mag.total_cmp(&b.mag));
                for q in ordered {
                    let pos = self.project(rect, q.lat, q.lon, shake);
                    let radius = marker_radius(q.mag) as f32;
                    let color = band_color(MagnitudeBand::of(q.mag));
                    painter.circle_filled(pos, radius, color.gamma_multiply(0.8));
                    if q.is_new {
                        painter.circle_stroke(pos, radius + 3.0, Stroke::new(1.5, Color32::WHITE));
                    }
                    if selected_id == Some(q.id.as_str()) {
                        painter.circle_stroke(pos, radius + 5.0, Stroke::new(2.5, Color32::YELLOW));
                    }
                    hits.push((pos, radius, HazardEvent::Quake(q.clone())));
                }
            }
            Hazard::Floods => {
                for f in floods {
                    let pos = self.project(rect, f.lat, f.lon, shake);
                    painter.circle_filled(pos, FLOOD_RADIUS, level_color(f.level));
                    if f.is_current {
                        painter.circle_stroke(pos, FLOOD_RADIUS + 2.0, Stroke::new(1.0, Color32::WHITE));
                    }
                    if selected_id == Some(f.id.as_str()) {
                        painter.circle_stroke(pos, FLOOD_RADIUS + 5.0, Stroke::new(2.5, Color32::YELLOW));
                    }
                    hits.push((pos, FLOOD_RADIUS, HazardEvent::Flood(f.clone())));
                }
            }
        }

        if let Some((effect, _)) = self.effect {
            if effect.kind == EffectKind::Rain {
                draw_rain(&painter, rect, effect.intensity as f32, elapsed);
            }
        }

        painter.text(
            rect.right_bottom() - Vec2::new(8.0, 8.0),
            Align2::RIGHT_BOTTOM,
            format!("{:.1}°, {:.1}°  z{:.1}", self.center[0], self.center[1], self.zoom),
            FontId::monospace(11.0),
            ui.visuals().weak_text_color(),
        );

        if response.clicked() {
            if let Some(pointer) = response.interact_pointer_pos() {
                out.clicked = hits
                    .into_iter()
                    .filter(|(pos, radius, _)| pos.distance(pointer) <= radius + 4.0)
                    .min_by(|a, b| a.0.distance(pointer).total_cmp(&b.0.distance(pointer)))
                    .map(|(_, _, event)| event);
            }
        }

        out
    }

    /// Current shake offset and seconds since the effect began.
    fn effect_state(&self) -> (Vec2, f32) {
        let Some((effect, started)) = self.effect else {
            return (Vec2::ZERO, 0.0);
        };
        let elapsed = started.elapsed();
        if elapsed > effect.duration {
            return (Vec2::ZERO, elapsed.as_secs_f32());
        }
        let t = elapsed.as_secs_f32();
        match effect.kind {
            EffectKind::Shake => {
                let amp = 7.0 * effect.intensity as f32 * (1.0 - t / effect.duration.as_secs_f32());
                (Vec2::new((t * 45.0).sin() * amp, (t * 38.0).cos() * amp), t)
            }
            EffectKind::Rain => (Vec2::ZERO, t),
        }
    }

    fn draw_graticule(&self, painter: &egui::Painter, rect: Rect, offset: Vec2) {
        let stroke = Stroke::new(1.0, GRID);
        for lon in (-180..=180).step_by(30) {
            let top = self.project(rect, 90.0, lon as f64, offset);
            let bottom = self.project(rect, -90.0, lon as f64, offset);
            painter.line_segment([top, bottom], stroke);
        }
        for lat in (-90..=90).step_by(30) {
            let left = self.project(rect, lat as f64, -180.0, offset);
            let right = self.project(rect, lat as f64, 180.0, offset);
            painter.line_segment([left, right], stroke);
        }
    }
}

fn draw_rain(painter: &egui::Painter, rect: Rect, intensity: f32, t: f32) {
    let drops = (90.0 * intensity) as usize;
    let stroke = Stroke::new(1.2, Color32::from_rgba_unmultiplied(147, 197, 253, 150));
    let height = rect.height().max(1.0);
    for i in 0..drops {
        let seed = i as f32 * 0.618_034;
        let x = rect.left() + (seed.fract() * rect.width());
        let speed = 380.0 + 160.0 * (seed * TAU).sin().abs();
        let y = rect.top() + ((t * speed + i as f32 * 53.0) % height);
        let from = Pos2::new(x, y);
        painter.line_segment([from, from + Vec2::new(-3.0, 14.0)], stroke);
    }
}

fn ease_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}
