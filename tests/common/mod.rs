//! Shared test harness.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use project_event_mux::{
    Dialer, Error, EventMux, FrameStream, MuxStats, ProgressUpdate, Result, SharedObserver,
};

// ============================================================================
// ChannelDialer
// ============================================================================

enum Session {
    Refuse,
    Open(mpsc::UnboundedReceiver<String>),
}

/// In-memory dialer. Each dial consumes the next scheduled session.
#[derive(Clone, Default)]
pub struct ChannelDialer {
    sessions: Arc<Mutex<VecDeque<Session>>>,
    dials: Arc<AtomicUsize>,
}

impl ChannelDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a session that accepts; frames sent on the returned
    /// sender are read by the client. Dropping it closes the stream.
    pub fn open_next(&self) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().push_back(Session::Open(rx));
        tx
    }

    /// Schedules a refused dial.
    pub fn refuse_next(&self) {
        self.sessions.lock().push_back(Session::Refuse);
    }

    /// Number of dial attempts so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Dialer for ChannelDialer {
    async fn dial(&self, endpoint: &str) -> Result<FrameStream> {
        self.dials.fetch_add(1, Ordering::SeqCst);

        let session = self.sessions.lock().pop_front();
        match session {
            Some(Session::Open(rx)) => {
                let frames = stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|text| (Ok(text), rx))
                });
                Ok(frames.boxed())
            }
            Some(Session::Refuse) | None => {
                Err(Error::connection(format!("no session scheduled for {endpoint}")))
            }
        }
    }
}

// ============================================================================
// Recording Observer
// ============================================================================

pub type Seen = Arc<Mutex<Vec<(String, f64)>>>;

/// Observer recording `(context, progress)` pairs.
pub fn recording_observer() -> (SharedObserver<String>, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer: SharedObserver<String> =
        Arc::new(move |ctx: &String, update: &ProgressUpdate| {
            sink.lock().push((ctx.clone(), update.progress.unwrap_or_default()));
        });
    (observer, seen)
}

/// Progress values seen for one context, in order.
pub fn seen_for(seen: &Seen, ctx: &str) -> Vec<f64> {
    seen.lock()
        .iter()
        .filter(|(c, _)| c == ctx)
        .map(|(_, v)| *v)
        .collect()
}

// ============================================================================
// Builders
// ============================================================================

pub const ENDPOINT: &str = "ws://mux.test/ws";

/// Multiplexer over `dialer` with fast backoff.
pub fn mux_with(dialer: ChannelDialer, observer: Option<SharedObserver<String>>) -> EventMux<String> {
    let mut builder = EventMux::builder()
        .dialer(dialer)
        .initial_backoff(Duration::from_millis(10))
        .max_backoff(Duration::from_millis(40))
        .connect_timeout(Duration::from_millis(500))
        .completion_timeout(Duration::from_secs(5));
    if let Some(observer) = observer {
        builder = builder.shared_observer(observer);
    }
    builder.build().expect("valid builder")
}

// ============================================================================
// Frames
// ============================================================================

pub fn progress(id: &str, value: f64) -> String {
    format!(r#"{{"type":"progress","projectId":"{id}","progress":{value}}}"#)
}

pub fn job_completed(id: &str, url: &str) -> String {
    format!(r#"{{"type":"jobCompleted","projectId":"{id}","resultUrl":"{url}"}}"#)
}

pub fn status(kind: &str, id: &str) -> String {
    format!(r#"{{"type":"{kind}","projectId":"{id}"}}"#)
}

// ============================================================================
// Polling
// ============================================================================

/// Polls stats until `pred` holds or two seconds pass.
pub async fn eventually<C>(mux: &EventMux<C>, pred: impl Fn(&MuxStats) -> bool) -> MuxStats {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let stats = mux.stats().await.expect("mux running");
        if pred(&stats) {
            return stats;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached, last stats: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
