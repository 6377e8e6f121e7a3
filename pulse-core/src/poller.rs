use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{FetchError, PollError};
use crate::event::Hazard;
use crate::net::jitter;
use crate::source::{FeedPayload, FeedRequest, HazardFeeds};

/// Messages from feed loops to whoever owns the dashboard.
#[derive(Debug, Clone)]
pub enum Event {
    Payload {
        generation: u64,
        payload: FeedPayload,
    },
    Failed {
        generation: u64,
        hazard: Hazard,
        error: FetchError,
    },
}

impl Event {
    pub fn generation(&self) -> u64 {
        match self {
            Event::Payload { generation, .. } | Event::Failed { generation, .. } => *generation,
        }
    }
}

/// `base + U[0, jitter)` between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollInterval {
    pub base: Duration,
    pub jitter: Duration,
}

impl PollInterval {
    pub fn next_delay(&self) -> Duration {
        self.base + Duration::from_millis(jitter(self.jitter.as_millis() as u64))
    }
}

/// Shared stop flag, checked by a loop after every await.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct PollerHandle {
    cancel: CancelFlag,
    generation: u64,
    join: JoinHandle<Result<(), PollError>>,
}

impl PollerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Flags the loop and returns without waiting. A request already on the
    /// wire completes, but its result is dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the loop and waits for it. Reports a loop that had already
    /// ended because nobody was listening.
    pub async fn stop(self) -> Result<(), PollError> {
        self.cancel.cancel();
        self.join.abort();
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(PollError::from(e)),
        }
    }
}

/// Fetches `request` now, then again after every jittered interval, until
/// cancelled. A failed tick is reported and the loop carries on.
pub fn spawn_feed_loop(
    feeds: HazardFeeds,
    request: FeedRequest,
    interval: PollInterval,
    generation: u64,
    update_tx: mpsc::Sender<Event>,
) -> PollerHandle {
    let cancel = CancelFlag::new();
    let flag = cancel.clone();
    let hazard = request.hazard();
    let join = tokio::spawn(async move {
        info!(hazard = %hazard, generation, "feed loop started");
        loop {
            if flag.is_cancelled() {
                break;
            }
            let event = poll_once(&feeds, &request, generation).await;
            if flag.is_cancelled() {
                break;
            }
            if let Event::Failed { error, .. } = &event {
                warn!(hazard = %hazard, error = %error, "feed tick failed");
            }
            if update_tx.send(event).await.is_err() {
                warn!(hazard = %hazard, "update receiver dropped");
                return Err(PollError::UpdateChannelClosed);
            }
            if flag.is_cancelled() {
                break;
            }
            tokio::time::sleep(interval.next_delay()).await;
        }
        info!(hazard = %hazard, generation, "feed loop stopped");
        Ok(())
    });

    PollerHandle {
        cancel,
        generation,
        join,
    }
}

/// Single fetch, wrapped as the event a loop would emit.
pub async fn poll_once(feeds: &HazardFeeds, request: &FeedRequest, generation: u64) -> Event {
    match feeds.fetch(request).await {
        Ok(payload) => Event::Payload {
            generation,
            payload,
        },
        Err(error) => Event::Failed {
            generation,
            hazard: request.hazard(),
            error,
        },
    }
}
