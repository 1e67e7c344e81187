//! Event multiplexer handle.
//!
//! [`EventMux`] is the service callers hold. It is cheap to clone; every
//! clone talks to the same coordinator task and therefore shares one
//! stream.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use project_event_mux::{EventMux, ProjectId};
//!
//! # async fn example() -> project_event_mux::Result<()> {
//! let mux: EventMux = EventMux::builder()
//!     .endpoint("wss://socket.example.com/ws")
//!     .build()?;
//!
//! mux.wait_for_open(Duration::from_secs(5)).await;
//!
//! let result = mux
//!     .wait_for_project_completion(ProjectId::new("p1"), ())
//!     .await?;
//! println!("{:?}", result.result_url);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ProjectId;
use crate::protocol::ProjectResult;
use crate::transport::{ConnectionState, Endpoint};

use super::builder::EventMuxBuilder;
use super::coordinator::{Command, CommandSender};
use super::tracker::Registration;
use super::waiter::PendingProject;

// ============================================================================
// MuxStats
// ============================================================================

/// Point-in-time counters of a multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MuxStats {
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Whether a reconnect timer is pending.
    pub reconnect_pending: bool,
    /// Delay the next reconnect would wait.
    pub next_backoff: Duration,
    /// Projects currently tracked.
    pub tracked_projects: usize,
    /// Projects with buffered frames.
    pub buffered_projects: usize,
    /// Frames waiting in buffers.
    pub buffered_frames: usize,
    /// Frames delivered live since start.
    pub frames_delivered: u64,
    /// Frames buffered since start.
    pub frames_buffered: u64,
    /// Frames dropped since start.
    pub frames_dropped: u64,
}

// ============================================================================
// Types
// ============================================================================

/// Internal shared state for the multiplexer.
pub(crate) struct MuxInner<C> {
    /// Command inbox of the coordinator.
    pub commands_tx: CommandSender<C>,
    /// Published connection state.
    pub state_rx: watch::Receiver<ConnectionState>,
    /// Source of registration numbers.
    pub next_seq: AtomicU64,
    /// Timeout used by `wait_for_project_completion`.
    pub completion_timeout: Duration,
}

// ============================================================================
// EventMux
// ============================================================================

/// Multiplexes project notifications over one shared stream.
///
/// `C` is the caller context carried with each tracked project and handed
/// to the [`ProgressObserver`](crate::ProgressObserver).
pub struct EventMux<C = ()> {
    pub(crate) inner: Arc<MuxInner<C>>,
}

impl<C> Clone for EventMux<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> fmt::Debug for EventMux<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMux")
            .field("state", &self.state())
            .field("completion_timeout", &self.inner.completion_timeout)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// EventMux - Construction
// ============================================================================

impl<C: Send + 'static> EventMux<C> {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> EventMuxBuilder<C> {
        EventMuxBuilder::new()
    }

    pub(crate) fn from_parts(
        commands_tx: CommandSender<C>,
        state_rx: watch::Receiver<ConnectionState>,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                commands_tx,
                state_rx,
                next_seq: AtomicU64::new(1),
                completion_timeout,
            }),
        }
    }
}

// ============================================================================
// EventMux - Connection
// ============================================================================

impl<C> EventMux<C> {
    /// Opens the stream unless it is already connecting or connected.
    ///
    /// Also re-enables automatic reconnects after [`disconnect`](Self::disconnect).
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `endpoint` is not a ws/wss URL
    /// - [`Error::Shutdown`] if the multiplexer stopped
    pub fn ensure_connected(&self, endpoint: &str) -> Result<()> {
        let url = Endpoint::validate(endpoint)?;
        self.send(Command::Connect {
            endpoint: url.into(),
        })
    }

    /// Waits until the stream is open, for at most `timeout`.
    ///
    /// Returns `false` on timeout or after shutdown. Neither is an error;
    /// callers proceed and rely on buffering.
    pub async fn wait_for_open(&self, timeout: Duration) -> bool {
        if self.state() == ConnectionState::Connected {
            return true;
        }

        let (tx, rx) = oneshot::channel();
        if self.send(Command::WaitForOpen { tx }).is_err() {
            return false;
        }

        let opened = matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(())));
        if !opened {
            debug!(timeout_ms = timeout.as_millis() as u64, "Stream not open in time");
        }
        opened
    }

    /// Closes the stream and stops reconnecting until the next
    /// [`ensure_connected`](Self::ensure_connected).
    ///
    /// Tracked projects stay tracked.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] if the multiplexer stopped.
    pub fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect)
    }

    /// Current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    /// Subscribes to connection state changes.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Returns `true` once the coordinator has stopped.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.commands_tx.is_closed()
    }

    /// Timeout applied by [`wait_for_project_completion`](Self::wait_for_project_completion).
    #[inline]
    #[must_use]
    pub fn completion_timeout(&self) -> Duration {
        self.inner.completion_timeout
    }
}

// ============================================================================
// EventMux - Projects
// ============================================================================

impl<C> EventMux<C> {
    /// Starts tracking a project.
    ///
    /// Frames that arrived for `project_id` before this call are replayed
    /// in order before any live frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if `project_id` is empty
    /// - [`Error::Shutdown`] if the multiplexer stopped
    pub fn track_project(
        &self,
        project_id: impl Into<ProjectId>,
        context: C,
    ) -> Result<PendingProject<C>> {
        let project_id = project_id.into();
        if project_id.is_empty() {
            return Err(Error::config("Project ID must not be empty"));
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.send(Command::Track(Registration {
            project_id: project_id.clone(),
            context,
            seq,
            outcome: tx,
        }))?;

        Ok(PendingProject::new(
            project_id,
            seq,
            rx,
            self.inner.commands_tx.clone(),
        ))
    }

    /// Tracks a project and waits for its outcome with the default
    /// completion timeout.
    ///
    /// # Errors
    ///
    /// See [`PendingProject::wait`].
    pub async fn wait_for_project_completion(
        &self,
        project_id: impl Into<ProjectId>,
        context: C,
    ) -> Result<ProjectResult> {
        self.wait_for_project_completion_with_timeout(
            project_id,
            context,
            self.inner.completion_timeout,
        )
        .await
    }

    /// Tracks a project and waits for its outcome for at most `timeout`.
    ///
    /// # Errors
    ///
    /// See [`PendingProject::wait`].
    pub async fn wait_for_project_completion_with_timeout(
        &self,
        project_id: impl Into<ProjectId>,
        context: C,
        timeout: Duration,
    ) -> Result<ProjectResult> {
        self.track_project(project_id, context)?.wait(timeout).await
    }
}

// ============================================================================
// EventMux - Lifecycle
// ============================================================================

impl<C> EventMux<C> {
    /// Returns current counters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] if the multiplexer stopped.
    pub async fn stats(&self) -> Result<MuxStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats { tx })?;
        Ok(rx.await?)
    }

    /// Stops the coordinator.
    ///
    /// Closes the stream and rejects every tracked project with
    /// [`Error::Shutdown`]. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Shutdown { done }).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, command: Command<C>) -> Result<()> {
        self.inner
            .commands_tx
            .send(command)
            .map_err(|_| Error::Shutdown)
    }
}
