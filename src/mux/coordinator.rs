//! Single-owner coordinator task.
//!
//! All mutable multiplexer state lives here: the [`StreamConnection`],
//! the project registry and the frame buffers. Nothing is shared, so
//! nothing is locked.
//!
//! The task drains two inboxes plus a sweep timer:
//!
//! | Inbox | Sender | Closes when |
//! |-------|--------|-------------|
//! | `Command` | `EventMux` handles, `PendingProject`s | every handle is dropped |
//! | `TransportEvent` | transport task, reconnect timers | never while the task runs |
//!
//! The task ends on [`Command::Shutdown`] or when the command inbox
//! closes. Either way every tracked project is rejected with
//! [`Error::Shutdown`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, info, trace};

use crate::error::Error;
use crate::identifiers::ProjectId;
use crate::observer::SharedObserver;
use crate::transport::{BackoffConfig, ConnectionState, Dialer, StreamConnection, TransportEvent};

use super::buffer::BufferLimits;
use super::core::MuxStats;
use super::router::EventRouter;
use super::tracker::Registration;

// ============================================================================
// Command
// ============================================================================

/// Requests sent from public handles to the coordinator.
pub(crate) enum Command<C> {
    /// Open the stream unless it is already active.
    Connect { endpoint: String },
    /// Notify when the stream is open.
    WaitForOpen { tx: oneshot::Sender<()> },
    /// Start tracking a project.
    Track(Registration<C>),
    /// Remove a project whose caller timed out or cancelled.
    Untrack {
        project_id: ProjectId,
        seq: u64,
        reason: Error,
    },
    /// Close the stream and stop reconnecting.
    Disconnect,
    /// Report counters.
    Stats { tx: oneshot::Sender<MuxStats> },
    /// Stop the task.
    Shutdown { done: oneshot::Sender<()> },
}

/// Sending half of the command inbox.
pub(crate) type CommandSender<C> = mpsc::UnboundedSender<Command<C>>;

// ============================================================================
// CoordinatorConfig
// ============================================================================

/// Settings the coordinator is started with.
pub(crate) struct CoordinatorConfig<C> {
    pub dialer: Arc<dyn Dialer>,
    pub backoff: BackoffConfig,
    pub connect_timeout: Duration,
    pub limits: BufferLimits,
    pub sweep_interval: Duration,
    pub observer: Option<SharedObserver<C>>,
    pub endpoint: Option<String>,
}

// ============================================================================
// Coordinator
// ============================================================================

pub(crate) struct Coordinator<C> {
    connection: StreamConnection,
    router: EventRouter<C>,
    commands_rx: mpsc::UnboundedReceiver<Command<C>>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    sweep_interval: Duration,
}

impl<C: Send + 'static> Coordinator<C> {
    /// Starts the coordinator task.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn spawn(
        config: CoordinatorConfig<C>,
    ) -> (
        CommandSender<C>,
        watch::Receiver<ConnectionState>,
        JoinHandle<()>,
    ) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let mut connection = StreamConnection::new(
            config.dialer,
            config.backoff,
            config.connect_timeout,
            events_tx,
            state_tx,
        );

        let router = EventRouter::new(config.observer, config.limits);

        let handle = tokio::spawn(async move {
            if let Some(endpoint) = config.endpoint {
                connection.connect(&endpoint);
            }

            Self {
                connection,
                router,
                commands_rx,
                events_rx,
                sweep_interval: config.sweep_interval,
            }
            .run()
            .await;
        });

        (commands_tx, state_rx, handle)
    }

    async fn run(mut self) {
        let start = tokio::time::Instant::now() + self.sweep_interval;
        let mut sweep = interval_at(start, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("Coordinator started");

        loop {
            tokio::select! {
                command = self.commands_rx.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.finish();
                        self.commands_rx.close();
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All handles dropped");
                        break;
                    }
                },

                Some(event) = self.events_rx.recv() => self.handle_event(event),

                _ = sweep.tick() => {
                    let evicted = self.router.sweep(Instant::now());
                    if evicted > 0 {
                        debug!(evicted, "Sweep evicted buffered frames");
                    }
                }
            }
        }

        self.finish();
    }

    fn handle_command(&mut self, command: Command<C>) {
        match command {
            Command::Connect { endpoint } => self.connection.connect(&endpoint),

            Command::WaitForOpen { tx } => self.connection.register_open_waiter(tx),

            Command::Track(registration) => {
                self.router.track_project(registration);
            }

            Command::Untrack {
                project_id,
                seq,
                reason,
            } => {
                self.router.abandon(&project_id, seq, reason, Instant::now());
            }

            Command::Disconnect => self.connection.disconnect(),

            Command::Stats { tx } => {
                let _ = tx.send(self.stats());
            }

            // Intercepted by the run loop
            Command::Shutdown { done } => {
                let _ = done.send(());
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { generation } => self.connection.on_opened(generation),
            TransportEvent::Frame { text } => {
                let outcome = self.router.on_frame(&text, Instant::now());
                trace!(?outcome, "Frame routed");
            }
            TransportEvent::Closed { generation, reason } => {
                self.connection.on_closed(generation, reason);
            }
            TransportEvent::ReconnectDue { generation } => {
                self.connection.on_reconnect_due(generation);
            }
        }
    }

    fn stats(&self) -> MuxStats {
        let counters = self.router.counters();
        MuxStats {
            state: self.connection.state(),
            reconnect_pending: self.connection.reconnect_pending(),
            next_backoff: self.connection.next_backoff(),
            tracked_projects: self.router.tracked_count(),
            buffered_projects: self.router.buffered_projects(),
            buffered_frames: self.router.buffered_frames(),
            frames_delivered: counters.delivered,
            frames_buffered: counters.buffered,
            frames_dropped: counters.dropped,
        }
    }

    fn finish(&mut self) {
        self.connection.shutdown();
        let failed = self.router.shutdown();
        info!(failed, "Coordinator stopped");
    }
}
