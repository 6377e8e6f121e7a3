use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use pulse_core::config::TourConfig;
use pulse_core::event::FloodLinks;
use pulse_core::tour::{plan_step, rank_for_tour, Effect, EffectKind, TourDeclined, TourToken};
use pulse_core::{
    run_tour, AlertLevel, Dashboard, FeedPayload, Flood, Hazard, HazardEvent, Quake, TourAction,
    TourHost, TourMachine, TourOutcome, WORLD_VIEW,
};

fn quake(id: &str, mag: f64) -> HazardEvent {
    HazardEvent::Quake(Quake {
        id: id.into(),
        mag,
        time: 0,
        place: None,
        lon: 10.0,
        lat: 20.0,
        depth: None,
        is_new: false,
    })
}

fn flood(id: &str, level: AlertLevel, end: i64) -> HazardEvent {
    HazardEvent::Flood(Flood {
        id: id.into(),
        name: id.into(),
        level,
        lat: 1.0,
        lon: 2.0,
        start: 0,
        end,
        time: end / 2,
        is_current: true,
        country: None,
        links: FloodLinks::default(),
    })
}

/// Owns a bare machine and records every action it accepted.
#[derive(Default)]
struct RecordingHost {
    machine: Mutex<TourMachine>,
    log: Mutex<Vec<TourAction>>,
}

impl TourHost for RecordingHost {
    fn apply(&self, token: TourToken, action: TourAction) -> bool {
        let mut machine = self.machine.lock();
        if !machine.is_current(token) {
            return false;
        }
        match &action {
            TourAction::Select { cursor, .. } => {
                machine.advance(token, *cursor);
            }
            TourAction::Finish => {
                machine.finish(token);
            }
            _ => {}
        }
        self.log.lock().push(action);
        true
    }
}

fn kinds(log: &[TourAction]) -> Vec<&'static str> {
    log.iter()
        .map(|a| match a {
            TourAction::Select { .. } => "select",
            TourAction::FlyTo(_) => "fly",
            TourAction::Effect(Some(_)) => "effect",
            TourAction::Effect(None) => "clear",
            TourAction::Finish => "finish",
        })
        .collect()
}

#[test]
fn quakes_rank_by_magnitude_and_cap() {
    let ranked = rank_for_tour(vec![quake("a", 2.0), quake("b", 6.1), quake("c", 4.2)], 2);
    let ids: Vec<&str> = ranked.iter().map(|e| e.id()).collect();
    assert_eq!(ids, vec!["b", "c"]);
}

#[test]
fn floods_rank_by_alert_then_recency() {
    let ranked = rank_for_tour(
        vec![
            flood("green", AlertLevel::Green, 900),
            flood("red-old", AlertLevel::Red, 100),
            flood("unknown", AlertLevel::Unknown, 1000),
            flood("orange", AlertLevel::Orange, 50),
            flood("red-new", AlertLevel::Red, 500),
        ],
        60,
    );
    let ids: Vec<&str> = ranked.iter().map(|e| e.id()).collect();
    assert_eq!(ids, vec!["red-new", "red-old", "orange", "green", "unknown"]);
}

#[test]
fn shake_scales_with_magnitude() {
    let small = Effect::shake(3.0);
    assert_eq!(small.kind, EffectKind::Shake);
    assert_eq!(small.duration, Duration::from_millis(1000));
    assert_eq!(small.intensity, 0.6);

    let strong = Effect::shake(6.1);
    assert_eq!(strong.duration, Duration::from_millis(2860));
    assert!((strong.intensity - 6.1 / 5.5).abs() < 1e-9);

    assert_eq!(Effect::shake(9.0).intensity, 1.35);
    assert_eq!(Effect::shake(1.0).duration, Duration::from_millis(1000));
}

#[test]
fn step_zoom_and_flight_follow_severity() {
    let config = TourConfig::default();
    let mut rng = StdRng::seed_from_u64(7);

    let big = plan_step(&quake("big", 6.1), &config, &mut rng);
    assert_eq!(big.camera.zoom, 6.0);
    assert_eq!(big.settle, Duration::from_millis(2600));
    assert_eq!(big.camera.center, [20.0, 10.0]);

    let mid = plan_step(&quake("mid", 4.5), &config, &mut rng);
    assert_eq!(mid.camera.zoom, 5.0);
    assert_eq!(mid.settle, Duration::from_millis(2000));

    let small = plan_step(&quake("small", 3.0), &config, &mut rng);
    assert_eq!(small.camera.zoom, 4.0);
    assert!(small.pause >= Duration::from_millis(300) && small.pause <= Duration::from_millis(700));

    let red = plan_step(&flood("red", AlertLevel::Red, 10), &config, &mut rng);
    assert_eq!(red.camera.zoom, 6.0);
    assert_eq!(red.settle, Duration::from_millis(2600));
    assert_eq!(red.effect, Effect::rain(1.4, Duration::from_millis(2600)));

    let green = plan_step(&flood("green", AlertLevel::Green, 10), &config, &mut rng);
    assert_eq!(green.camera.zoom, 5.0);
    assert_eq!(green.settle, Duration::from_millis(2200));
    assert_eq!(green.effect.intensity, 0.7);
}

#[test]
fn stop_is_idempotent_and_tokens_never_repeat() {
    let mut machine = TourMachine::new();
    assert!(!machine.stop());

    let first = machine
        .begin(Hazard::Earthquakes, vec![quake("a", 5.0)], 60)
        .unwrap();
    assert!(machine.is_current(first.token));
    assert!(machine.stop());
    assert!(!machine.stop());
    assert!(!machine.is_current(first.token));

    let second = machine
        .begin(Hazard::Earthquakes, vec![quake("a", 5.0)], 60)
        .unwrap();
    assert!(second.token > first.token);
    assert!(!machine.finish(first.token));
    assert!(machine.finish(second.token));
}

#[test]
fn empty_snapshot_is_declined() {
    let mut machine = TourMachine::new();
    assert_eq!(
        machine.begin(Hazard::Floods, Vec::new(), 60),
        Err(TourDeclined::Empty)
    );
    assert!(!machine.is_running());
}

#[tokio::test(start_paused = true)]
async fn tour_visits_every_stop_in_order() {
    let host = RecordingHost::default();
    let plan = host
        .machine
        .lock()
        .begin(Hazard::Earthquakes, vec![quake("a", 4.0), quake("b", 6.5)], 60)
        .unwrap();

    let outcome = run_tour(&host, plan, &TourConfig::default()).await;

    assert_eq!(outcome, TourOutcome::Completed);
    let log = host.log.lock();
    assert_eq!(
        kinds(&log),
        vec![
            "select", "fly", "effect", "clear", "select", "fly", "effect", "clear", "finish"
        ]
    );
    match &log[0] {
        TourAction::Select { cursor, event } => {
            assert_eq!(*cursor, 0);
            assert_eq!(event.id(), "b");
        }
        other => panic!("unexpected first action {other:?}"),
    }
    assert!(!host.machine.lock().is_running());
}

#[tokio::test(start_paused = true)]
async fn stops_without_coordinates_are_skipped() {
    let host = RecordingHost::default();
    let mut lost = quake("lost", 7.0);
    if let HazardEvent::Quake(q) = &mut lost {
        q.lat = f64::NAN;
    }
    let plan = host
        .machine
        .lock()
        .begin(Hazard::Earthquakes, vec![lost, quake("ok", 5.0)], 60)
        .unwrap();

    let outcome = run_tour(&host, plan, &TourConfig::default()).await;

    assert_eq!(outcome, TourOutcome::Completed);
    let log = host.log.lock();
    let visited: Vec<&str> = log
        .iter()
        .filter_map(|a| match a {
            TourAction::Select { event, .. } => Some(event.id()),
            _ => None,
        })
        .collect();
    assert_eq!(visited, vec!["ok"]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_tour_makes_no_further_changes() {
    let host = Arc::new(RecordingHost::default());
    let plan = host
        .machine
        .lock()
        .begin(Hazard::Earthquakes, vec![quake("a", 6.0), quake("b", 5.0)], 60)
        .unwrap();

    let walker = {
        let host = host.clone();
        tokio::spawn(async move { run_tour(&*host, plan, &TourConfig::default()).await })
    };

    // The walk is now waiting for the first flight to settle.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(kinds(&host.log.lock()), vec!["select", "fly"]);
    assert!(host.machine.lock().stop());

    let outcome = walker.await.unwrap();
    assert_eq!(outcome, TourOutcome::Cancelled);
    assert_eq!(kinds(&host.log.lock()), vec!["select", "fly"]);
}

#[tokio::test(start_paused = true)]
async fn dashboard_returns_to_world_view_after_a_tour() {
    let mut dash = Dashboard::default();
    let gen = dash.generation();
    let now = chrono::Utc::now();
    let t = now.timestamp_millis();
    let payload = serde_json::json!({
        "features": [{
            "id": "x",
            "properties": { "mag": 5.0, "time": t - 60_000 },
            "geometry": { "coordinates": [30.0, 40.0] }
        }]
    });
    dash.apply_payload(gen, FeedPayload::Quakes(payload), now);
    let plan = dash.start_tour(now).unwrap();
    let host = Mutex::new(dash);

    let outcome = run_tour(&host, plan, &TourConfig::default()).await;

    assert_eq!(outcome, TourOutcome::Completed);
    let dash = host.lock();
    assert!(!dash.tour().is_running());
    assert!(dash.selected().is_none());
    assert!(dash.effect().is_none());
    assert_eq!(dash.camera(), Some(WORLD_VIEW));
}

#[tokio::test(start_paused = true)]
async fn switching_hazard_mid_walk_cancels_the_tour() {
    let mut dash = Dashboard::default();
    let gen = dash.generation();
    let now = chrono::Utc::now();
    let t = now.timestamp_millis();
    let payload = serde_json::json!({
        "features": [
            {
                "id": "big",
                "properties": { "mag": 6.0, "time": t - 60_000 },
                "geometry": { "coordinates": [30.0, 40.0] }
            },
            {
                "id": "small",
                "properties": { "mag": 4.0, "time": t - 120_000 },
                "geometry": { "coordinates": [-70.0, -30.0] }
            }
        ]
    });
    dash.apply_payload(gen, FeedPayload::Quakes(payload), now);
    let plan = dash.start_tour(now).unwrap();
    let host = Arc::new(Mutex::new(dash));

    let walker = {
        let host = host.clone();
        tokio::spawn(async move { run_tour(&*host, plan, &TourConfig::default()).await })
    };

    // First stop selected, flight settling.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(host.lock().selected().map(|e| e.id().to_owned()).as_deref(), Some("big"));

    host.lock().set_hazard(Hazard::Floods);
    {
        let dash = host.lock();
        assert!(!dash.tour().is_running());
        assert!(dash.selected().is_none());
        assert_eq!(dash.camera(), Some(WORLD_VIEW));
    }

    // Long enough for every remaining step to have been attempted.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(walker.await.unwrap(), TourOutcome::Cancelled);

    let dash = host.lock();
    assert!(dash.selected().is_none());
    assert!(dash.effect().is_none());
    assert_eq!(dash.camera(), Some(WORLD_VIEW));
}
