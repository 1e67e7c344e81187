//! Single reconnecting stream connection.
//!
//! [`StreamConnection`] owns the one live transport of an
//! [`EventMux`](crate::EventMux). It is plain state driven by the
//! coordinator task: public operations and [`TransportEvent`]s call its
//! methods, and it spawns the transport read task and reconnect timers.
//!
//! # Lifecycle
//!
//! ```text
//!              connect()              Opened
//! Disconnected ─────────► Connecting ───────► Connected
//!      ▲                      │                   │
//!      │        Closed        │      Closed       │
//!      └──────────────────────┴───────────────────┘
//!            schedule_reconnect() after backoff
//! ```
//!
//! Every transport task and reconnect timer is stamped with a
//! *generation*. Lifecycle events from a superseded generation are
//! ignored, so a late `Closed` from an old socket cannot tear down a
//! newer one.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::Error;

use super::backoff::{Backoff, BackoffConfig};
use super::dialer::Dialer;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no dial in flight.
    Disconnected,
    /// Dial in flight.
    Connecting,
    /// Transport open and reading frames.
    Connected,
}

impl ConnectionState {
    /// Returns `true` while connecting or connected.
    #[inline]
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Events posted by transport tasks and timers to the coordinator.
#[derive(Debug)]
pub enum TransportEvent {
    /// The dial succeeded.
    Opened {
        /// Generation of the transport task.
        generation: u64,
    },
    /// A text frame was read.
    Frame {
        /// Raw frame text.
        text: String,
    },
    /// The dial failed or the stream dropped.
    Closed {
        /// Generation of the transport task.
        generation: u64,
        /// Why the transport closed.
        reason: Error,
    },
    /// A reconnect timer elapsed.
    ReconnectDue {
        /// Generation the timer was scheduled under.
        generation: u64,
    },
}

// ============================================================================
// OpenWaiters
// ============================================================================

/// Callers waiting for the connection to become ready.
///
/// Waiters are notified in registration order, once, on the next
/// transition to [`ConnectionState::Connected`].
#[derive(Debug, Default)]
pub struct OpenWaiters {
    waiters: Vec<oneshot::Sender<()>>,
}

impl OpenWaiters {
    /// Adds a waiter, discarding waiters whose caller already gave up.
    pub fn register(&mut self, tx: oneshot::Sender<()>) {
        self.waiters.retain(|waiter| !waiter.is_closed());
        self.waiters.push(tx);
    }

    /// Resolves and clears every waiter.
    pub fn notify_all(&mut self) -> usize {
        let waiters = std::mem::take(&mut self.waiters);
        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.send(());
        }
        count
    }

    /// Number of registered waiters.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Returns `true` if nobody is waiting.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Drops every waiter without resolving it.
    pub fn clear(&mut self) {
        self.waiters.clear();
    }
}

// ============================================================================
// StreamConnection
// ============================================================================

/// Handle to a running transport read task.
struct TransportTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// The single reconnecting stream of one client.
pub struct StreamConnection {
    dialer: Arc<dyn Dialer>,
    connect_timeout: Duration,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    endpoint: Option<String>,
    /// Cleared by `disconnect()` until the next `connect()`.
    auto_reconnect: bool,
    backoff: Backoff,
    reconnect_timer: Option<CancellationToken>,
    generation: u64,
    transport: Option<TransportTask>,
    open_waiters: OpenWaiters,
}

impl StreamConnection {
    /// Creates a disconnected stream.
    pub fn new(
        dialer: Arc<dyn Dialer>,
        backoff: BackoffConfig,
        connect_timeout: Duration,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            dialer,
            connect_timeout,
            events_tx,
            state_tx,
            state: ConnectionState::Disconnected,
            endpoint: None,
            auto_reconnect: true,
            backoff: Backoff::new(backoff),
            reconnect_timer: None,
            generation: 0,
            transport: None,
            open_waiters: OpenWaiters::default(),
        }
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Endpoint of the current (or last) transport.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Delay the next scheduled reconnect would wait.
    #[inline]
    #[must_use]
    pub fn next_backoff(&self) -> Duration {
        self.backoff.current()
    }

    /// Returns `true` while a reconnect timer is pending.
    #[inline]
    #[must_use]
    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_timer.is_some()
    }

    /// Number of callers waiting for the stream to open.
    #[inline]
    #[must_use]
    pub fn open_waiter_count(&self) -> usize {
        self.open_waiters.len()
    }

    /// Opens the transport unless one is already connecting or connected.
    pub fn connect(&mut self, endpoint: &str) {
        self.auto_reconnect = true;

        if self.state.is_active() {
            trace!(state = %self.state, "connect() ignored");
            return;
        }

        self.cancel_reconnect_timer();
        self.endpoint = Some(endpoint.to_owned());
        self.generation += 1;
        self.set_state(ConnectionState::Connecting);

        info!(endpoint, generation = self.generation, "Connecting stream");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_transport(
            Arc::clone(&self.dialer),
            endpoint.to_owned(),
            self.generation,
            self.connect_timeout,
            self.events_tx.clone(),
            cancel.clone(),
        ));

        self.transport = Some(TransportTask { cancel, handle });
    }

    /// Registers a caller waiting for the stream to open.
    ///
    /// Resolves immediately when already connected.
    pub fn register_open_waiter(&mut self, tx: oneshot::Sender<()>) {
        if self.state == ConnectionState::Connected {
            let _ = tx.send(());
        } else {
            self.open_waiters.register(tx);
        }
    }

    /// Handles a successful dial.
    pub fn on_opened(&mut self, generation: u64) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring stale open");
            return;
        }

        self.set_state(ConnectionState::Connected);
        self.backoff.reset();
        let notified = self.open_waiters.notify_all();

        info!(generation, notified, "Stream connected");
    }

    /// Handles a failed dial or dropped stream.
    pub fn on_closed(&mut self, generation: u64, reason: Error) {
        if generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring stale close");
            return;
        }

        warn!(generation, error = %reason, "Stream closed");

        self.dispose_transport();
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect();
    }

    /// Handles an elapsed reconnect timer.
    pub fn on_reconnect_due(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }

        self.reconnect_timer = None;

        match (self.auto_reconnect, self.endpoint.clone()) {
            (true, Some(endpoint)) => self.connect(&endpoint),
            _ => debug!("Reconnect skipped"),
        }
    }

    /// Closes the transport and suppresses reconnects until the next
    /// `connect()`.
    pub fn disconnect(&mut self) {
        info!(state = %self.state, "Disconnecting stream");

        self.auto_reconnect = false;
        self.generation += 1;
        self.cancel_reconnect_timer();
        self.dispose_transport();
        self.set_state(ConnectionState::Disconnected);
    }

    /// Tears everything down. Pending open waiters are dropped.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.open_waiters.clear();
    }

    /// Schedules `connect()` after the current backoff, then grows it.
    fn schedule_reconnect(&mut self) {
        if self.reconnect_timer.is_some() || self.state.is_active() {
            return;
        }
        if !self.auto_reconnect || self.endpoint.is_none() {
            return;
        }

        let delay = self.backoff.advance();
        let generation = self.generation;
        let events_tx = self.events_tx.clone();
        let token = CancellationToken::new();
        let cancelled = token.clone();

        info!(
            generation,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = sleep(delay) => {
                    let _ = events_tx.send(TransportEvent::ReconnectDue { generation });
                }
            }
        });

        self.reconnect_timer = Some(token);
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(token) = self.reconnect_timer.take() {
            token.cancel();
        }
    }

    fn dispose_transport(&mut self) {
        if let Some(task) = self.transport.take() {
            task.cancel.cancel();
            // The task exits on its own once cancelled
            drop(task.handle);
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.cancel_reconnect_timer();
        self.dispose_transport();
    }
}

// ============================================================================
// Transport Task
// ============================================================================

/// Dials `endpoint` and forwards frames until the stream drops or the
/// task is cancelled.
async fn run_transport(
    dialer: Arc<dyn Dialer>,
    endpoint: String,
    generation: u64,
    connect_timeout: Duration,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    let dialed = tokio::select! {
        _ = cancel.cancelled() => return,
        result = timeout(connect_timeout, dialer.dial(&endpoint)) => {
            result.unwrap_or_else(|_| {
                Err(Error::connection_timeout(connect_timeout.as_millis() as u64))
            })
        }
    };

    let mut frames = match dialed {
        Ok(frames) => frames,
        Err(reason) => {
            let _ = events_tx.send(TransportEvent::Closed { generation, reason });
            return;
        }
    };

    if events_tx.send(TransportEvent::Opened { generation }).is_err() {
        return;
    }

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(generation, "Transport task cancelled");
                return;
            }
            next = frames.next() => match next {
                Some(Ok(text)) => {
                    if events_tx.send(TransportEvent::Frame { text }).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => break e,
                None => break Error::ConnectionClosed,
            }
        }
    };

    let _ = events_tx.send(TransportEvent::Closed { generation, reason });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use futures_util::stream;

    use crate::error::Result;
    use crate::transport::dialer::FrameStream;

    /// Dialer that always fails.
    struct RefusingDialer;

    #[async_trait]
    impl Dialer for RefusingDialer {
        async fn dial(&self, endpoint: &str) -> Result<FrameStream> {
            Err(Error::connection(format!("refused: {endpoint}")))
        }
    }

    /// Dialer that opens a stream which never yields.
    struct SilentDialer;

    #[async_trait]
    impl Dialer for SilentDialer {
        async fn dial(&self, _endpoint: &str) -> Result<FrameStream> {
            Ok(stream::pending().boxed())
        }
    }

    fn fast_backoff() -> BackoffConfig {
        BackoffConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
        }
    }

    fn connection(
        dialer: Arc<dyn Dialer>,
    ) -> (
        StreamConnection,
        mpsc::UnboundedReceiver<TransportEvent>,
        watch::Receiver<ConnectionState>,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let conn = StreamConnection::new(
            dialer,
            fast_backoff(),
            Duration::from_secs(1),
            events_tx,
            state_tx,
        );
        (conn, events_rx, state_rx)
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_while_active() {
        let (mut conn, mut events, state) = connection(Arc::new(SilentDialer));

        conn.connect("ws://a");
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(*state.borrow(), ConnectionState::Connecting);

        // Second call must not start a second transport
        conn.connect("ws://b");
        assert_eq!(conn.endpoint(), Some("ws://a"));

        let Some(TransportEvent::Opened { generation }) = events.recv().await else {
            panic!("expected Opened");
        };
        assert_eq!(generation, 1);
        conn.on_opened(generation);
        assert_eq!(conn.state(), ConnectionState::Connected);

        conn.connect("ws://c");
        assert_eq!(conn.endpoint(), Some("ws://a"));
    }

    #[tokio::test]
    async fn test_open_waiters_resolve_on_open() {
        let (mut conn, mut events, _state) = connection(Arc::new(SilentDialer));

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        conn.register_open_waiter(tx1);
        conn.register_open_waiter(tx2);
        assert_eq!(conn.open_waiter_count(), 2);

        conn.connect("ws://a");
        let Some(TransportEvent::Opened { generation }) = events.recv().await else {
            panic!("expected Opened");
        };
        conn.on_opened(generation);

        assert!(rx1.await.is_ok());
        assert!(rx2.await.is_ok());
        assert_eq!(conn.open_waiter_count(), 0);

        // Already connected: resolves immediately
        let (tx3, rx3) = oneshot::channel();
        conn.register_open_waiter(tx3);
        assert!(rx3.await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_dial_schedules_growing_backoff() {
        let (mut conn, mut events, _state) = connection(Arc::new(RefusingDialer));

        conn.connect("ws://down");
        let mut delays = Vec::new();

        for _ in 0..4 {
            let Some(TransportEvent::Closed { generation, reason }) = events.recv().await else {
                panic!("expected Closed");
            };
            assert!(reason.is_connection_error());
            conn.on_closed(generation, reason);
            assert_eq!(conn.state(), ConnectionState::Disconnected);
            assert!(conn.reconnect_pending());
            delays.push(conn.next_backoff());

            let Some(TransportEvent::ReconnectDue { generation }) = events.recv().await else {
                panic!("expected ReconnectDue");
            };
            conn.on_reconnect_due(generation);
            assert_eq!(conn.state(), ConnectionState::Connecting);
        }

        // next_backoff() is read after advancing: 20, 40, 40, 40
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(20),
                Duration::from_millis(40),
                Duration::from_millis(40),
                Duration::from_millis(40),
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_close_is_ignored() {
        let (mut conn, mut events, _state) = connection(Arc::new(SilentDialer));

        conn.connect("ws://a");
        let Some(TransportEvent::Opened { generation }) = events.recv().await else {
            panic!("expected Opened");
        };
        conn.on_opened(generation);

        conn.on_closed(generation - 1, Error::ConnectionClosed);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(!conn.reconnect_pending());
    }

    #[tokio::test]
    async fn test_disconnect_suppresses_reconnect() {
        let (mut conn, mut events, _state) = connection(Arc::new(RefusingDialer));

        conn.connect("ws://down");
        let Some(TransportEvent::Closed { generation, reason }) = events.recv().await else {
            panic!("expected Closed");
        };
        conn.on_closed(generation, reason);
        assert!(conn.reconnect_pending());

        conn.disconnect();
        assert!(!conn.reconnect_pending());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // A timer that slipped through before cancellation is stale
        conn.on_reconnect_due(generation);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_open_waiters_prune_abandoned() {
        let mut waiters = OpenWaiters::default();
        let (tx1, rx1) = oneshot::channel();
        drop(rx1);
        waiters.register(tx1);

        let (tx2, _rx2) = oneshot::channel();
        waiters.register(tx2);

        assert_eq!(waiters.len(), 1);
        assert_eq!(waiters.notify_all(), 1);
        assert!(waiters.is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert!(ConnectionState::Connected.is_active());
        assert!(!ConnectionState::Disconnected.is_active());
    }
}
