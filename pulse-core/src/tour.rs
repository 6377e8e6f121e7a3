//! Automated camera-and-effects walk through ranked events.
//!
//! A tour is owned by [`TourMachine`]. Starting one snapshots and ranks the
//! displayed events under a fresh token; stopping or finishing bumps the
//! token, so a walk still sleeping somewhere in [`run_tour`] finds itself
//! stale at its next checkpoint and exits without touching anything.

use std::cmp::Ordering;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::config::TourConfig;
use crate::event::{Hazard, HazardEvent};
use crate::view::CameraTarget;

pub type TourToken = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Shake,
    Rain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Effect {
    pub kind: EffectKind,
    pub intensity: f64,
    pub duration: Duration,
}

impl Effect {
    /// Shake scaled from magnitude: `1000 + 600*max(0, mag-3)` ms,
    /// intensity `clamp(mag/5.5, 0.6, 1.35)`.
    pub fn shake(mag: f64) -> Self {
        let duration_ms = 1000.0 + 600.0 * (mag - 3.0).max(0.0);
        Self {
            kind: EffectKind::Shake,
            intensity: (mag / 5.5).clamp(0.6, 1.35),
            duration: Duration::from_millis(duration_ms.round() as u64),
        }
    }

    pub fn rain(intensity: f64, duration: Duration) -> Self {
        Self {
            kind: EffectKind::Rain,
            intensity,
            duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RunningTour {
    token: TourToken,
    hazard: Hazard,
    list: Vec<HazardEvent>,
    cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
enum TourState {
    #[default]
    Idle,
    Running(RunningTour),
}

/// What a started tour walks through.
#[derive(Debug, Clone, PartialEq)]
pub struct TourPlan {
    pub token: TourToken,
    pub list: Vec<HazardEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TourDeclined {
    /// Selection, range or dataset does not allow a tour right now.
    NotEligible,
    /// The ranked snapshot came out empty.
    Empty,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TourOutcome {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct TourMachine {
    state: TourState,
    last_token: TourToken,
}

impl TourMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TourState::Running(_))
    }

    pub fn is_current(&self, token: TourToken) -> bool {
        matches!(&self.state, TourState::Running(run) if run.token == token)
    }

    /// `(stop, of)` for the running walk, counting stops from 1.
    pub fn progress(&self) -> Option<(usize, usize)> {
        match &self.state {
            TourState::Running(run) => Some((run.cursor + 1, run.list.len())),
            TourState::Idle => None,
        }
    }

    /// Ranks and caps `events`, then moves to `Running` under a new token.
    pub fn begin(
        &mut self,
        hazard: Hazard,
        events: Vec<HazardEvent>,
        cap: usize,
    ) -> Result<TourPlan, TourDeclined> {
        if self.is_running() {
            return Err(TourDeclined::AlreadyRunning);
        }
        let list = rank_for_tour(events, cap);
        if list.is_empty() {
            return Err(TourDeclined::Empty);
        }
        self.last_token += 1;
        let token = self.last_token;
        self.state = TourState::Running(RunningTour {
            token,
            hazard,
            list: list.clone(),
            cursor: 0,
        });
        info!(token, hazard = %hazard, stops = list.len(), "tour started");
        Ok(TourPlan { token, list })
    }

    pub fn advance(&mut self, token: TourToken, cursor: usize) -> bool {
        match &mut self.state {
            TourState::Running(run) if run.token == token => {
                run.cursor = cursor;
                true
            }
            _ => false,
        }
    }

    /// Cancels whatever is running. Returns whether a tour was running.
    pub fn stop(&mut self) -> bool {
        self.last_token += 1;
        match std::mem::take(&mut self.state) {
            TourState::Running(run) => {
                info!(token = run.token, hazard = %run.hazard, "tour stopped");
                true
            }
            TourState::Idle => false,
        }
    }

    /// Natural completion. Only the current token may finish.
    pub fn finish(&mut self, token: TourToken) -> bool {
        if !self.is_current(token) {
            return false;
        }
        self.last_token += 1;
        self.state = TourState::Idle;
        info!(token, "tour completed");
        true
    }
}

/// Quakes by magnitude, floods by alert rank then most recent end; both
/// descending, truncated to `cap`.
pub fn rank_for_tour(mut events: Vec<HazardEvent>, cap: usize) -> Vec<HazardEvent> {
    events.sort_by(compare_priority);
    events.truncate(cap);
    events
}

fn compare_priority(a: &HazardEvent, b: &HazardEvent) -> Ordering {
    match (a, b) {
        (HazardEvent::Quake(a), HazardEvent::Quake(b)) => b.mag.total_cmp(&a.mag),
        (HazardEvent::Flood(a), HazardEvent::Flood(b)) => b
            .level
            .rank()
            .cmp(&a.level.rank())
            .then_with(|| b.recency().cmp(&a.recency())),
        (HazardEvent::Quake(_), HazardEvent::Flood(_)) => Ordering::Less,
        (HazardEvent::Flood(_), HazardEvent::Quake(_)) => Ordering::Greater,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TourStep {
    pub camera: CameraTarget,
    pub settle: Duration,
    pub effect: Effect,
    pub pause: Duration,
}

/// Camera, effect and timing for one stop.
pub fn plan_step<R: Rng + ?Sized>(event: &HazardEvent, config: &TourConfig, rng: &mut R) -> TourStep {
    let (zoom, flight, effect) = match event {
        HazardEvent::Quake(q) => {
            let zoom = if q.mag >= 6.0 {
                6.0
            } else if q.mag >= 4.5 {
                5.0
            } else {
                4.0
            };
            let flight = if q.mag >= 6.0 { 2600 } else { 2000 };
            (zoom, flight, Effect::shake(q.mag))
        }
        HazardEvent::Flood(f) => {
            let red = f.level.rank() >= 3;
            let zoom = if red { 6.0 } else { 5.0 };
            let flight = if red { 2600 } else { 2200 };
            let rain = Effect::rain(
                f.level.rain_intensity(),
                Duration::from_millis(config.rain_ms),
            );
            (zoom, flight, rain)
        }
    };
    let settle = Duration::from_millis(flight);
    let pause_ms = if config.pause_max_ms > config.pause_min_ms {
        rng.gen_range(config.pause_min_ms..=config.pause_max_ms)
    } else {
        config.pause_min_ms
    };
    TourStep {
        camera: CameraTarget::new(event.lat(), event.lon(), zoom).with_duration(settle),
        settle,
        effect,
        pause: Duration::from_millis(pause_ms),
    }
}

/// One state change the walk wants to make.
#[derive(Debug, Clone, PartialEq)]
pub enum TourAction {
    Select { cursor: usize, event: HazardEvent },
    FlyTo(CameraTarget),
    Effect(Option<Effect>),
    /// Clear selection and effect, return to the world view, go idle.
    Finish,
}

/// Owner of the tour state. `apply` must check the token and perform the
/// action as one step, returning `false` (and doing nothing) when the
/// token is no longer current.
pub trait TourHost: Send + Sync {
    fn apply(&self, token: TourToken, action: TourAction) -> bool;
}

/// Walks `plan` on `host`, stopping at the first checkpoint where the token
/// has been superseded. Stops with non-finite coordinates are skipped.
pub async fn run_tour<H: TourHost + ?Sized>(
    host: &H,
    plan: TourPlan,
    config: &TourConfig,
) -> TourOutcome {
    let token = plan.token;
    for (cursor, event) in plan.list.into_iter().enumerate() {
        if !event.has_finite_coords() {
            debug!(token, id = %event.id(), "skipping stop without coordinates");
            continue;
        }
        let step = plan_step(&event, config, &mut rand::thread_rng());

        if !host.apply(token, TourAction::Select { cursor, event }) {
            return TourOutcome::Cancelled;
        }
        if !host.apply(token, TourAction::FlyTo(step.camera)) {
            return TourOutcome::Cancelled;
        }
        tokio::time::sleep(step.settle).await;

        if !host.apply(token, TourAction::Effect(Some(step.effect))) {
            return TourOutcome::Cancelled;
        }
        tokio::time::sleep(step.effect.duration).await;

        if !host.apply(token, TourAction::Effect(None)) {
            return TourOutcome::Cancelled;
        }
        tokio::time::sleep(step.pause).await;
    }

    if host.apply(token, TourAction::Finish) {
        TourOutcome::Completed
    } else {
        TourOutcome::Cancelled
    }
}
