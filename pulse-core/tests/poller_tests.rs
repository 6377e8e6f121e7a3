use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pulse_core::config::FeedConfig;
use pulse_core::{
    poll_once, spawn_feed_loop, Event, FeedPayload, FeedRequest, FetchError, FetchGovernor,
    Hazard, HazardFeeds, MemoryStore, PollError, PollInterval, QuakeWindow, SystemClock,
};

fn feeds_for(server: &MockServer) -> HazardFeeds {
    let config = FeedConfig {
        usgs_summary_base: format!("{}/summary", server.uri()),
        quake_min_gap_ms: 0,
        quake_retries: 0,
        ..FeedConfig::default()
    };
    let governor = FetchGovernor::new(
        Client::new(),
        Arc::new(SystemClock),
        Arc::new(MemoryStore::new()),
    );
    HazardFeeds::new(governor, config)
}

fn quick() -> PollInterval {
    PollInterval {
        base: Duration::from_millis(50),
        jitter: Duration::ZERO,
    }
}

#[tokio::test]
async fn poll_once_wraps_payload_with_generation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/summary/all_hour.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "features": [] })))
        .mount(&server)
        .await;

    let feeds = feeds_for(&server);
    let event = poll_once(&feeds, &FeedRequest::LiveQuakes(QuakeWindow::Hour), 7).await;

    match event {
        Event::Payload {
            generation,
            payload: FeedPayload::Quakes(value),
        } => {
            assert_eq!(generation, 7);
            assert_eq!(value, json!({ "features": [] }));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn feed_loop_emits_event() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/summary/all_day.geojson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "features": [] })))
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::channel(8);
    let handle = spawn_feed_loop(
        feeds_for(&server),
        FeedRequest::LiveQuakes(QuakeWindow::Day),
        quick(),
        3,
        tx,
    );
    assert_eq!(handle.generation(), 3);

    let evt = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("channel closed");
    assert!(matches!(evt, Event::Payload { generation: 3, .. }));

    handle.stop().await.expect("stop feed loop");
}

#[tokio::test]
async fn failed_ticks_are_reported_and_the_loop_continues() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::channel(8);
    let handle = spawn_feed_loop(
        feeds_for(&server),
        FeedRequest::LiveQuakes(QuakeWindow::Day),
        quick(),
        1,
        tx,
    );

    for _ in 0..2 {
        let evt = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        match evt {
            Event::Failed { hazard, error, .. } => {
                assert_eq!(hazard, Hazard::Earthquakes);
                assert!(matches!(error, FetchError::Http { status: 503, .. }));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    handle.stop().await.expect("stop feed loop");
}

#[tokio::test]
async fn stopped_loop_closes_the_channel() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "features": [] })))
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::channel(8);
    let handle = spawn_feed_loop(
        feeds_for(&server),
        FeedRequest::LiveQuakes(QuakeWindow::Hour),
        quick(),
        0,
        tx,
    );
    handle.stop().await.expect("stop feed loop");

    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok(), "sender should be dropped once the loop stops");
}

#[tokio::test]
async fn loop_ends_with_an_error_when_nobody_listens() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "features": [] })))
        .mount(&server)
        .await;

    let (tx, rx) = mpsc::channel(8);
    drop(rx);
    let handle = spawn_feed_loop(
        feeds_for(&server),
        FeedRequest::LiveQuakes(QuakeWindow::Hour),
        quick(),
        2,
        tx,
    );

    tokio::time::timeout(Duration::from_secs(2), async {
        while !handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("loop should end on its own");

    let err = handle.stop().await.unwrap_err();
    assert!(matches!(err, PollError::UpdateChannelClosed));
}

#[test]
fn jitter_stays_within_bounds() {
    let interval = PollInterval {
        base: Duration::from_secs(90),
        jitter: Duration::from_secs(45),
    };
    for _ in 0..100 {
        let delay = interval.next_delay();
        assert!(delay >= Duration::from_secs(90));
        assert!(delay < Duration::from_secs(135));
    }
}
