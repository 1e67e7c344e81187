//! Builder pattern for multiplexer configuration.
//!
//! Provides a fluent API for configuring and starting an [`EventMux`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use project_event_mux::EventMux;
//!
//! # async fn example() -> project_event_mux::Result<()> {
//! let mux: EventMux<String> = EventMux::builder()
//!     .endpoint("wss://socket.example.com/ws")
//!     .max_backoff(Duration::from_secs(30))
//!     .completion_timeout(Duration::from_secs(300))
//!     .observer(|file: &String, update: &project_event_mux::ProgressUpdate| {
//!         println!("{file}: {:?}%", update.percent());
//!     })
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Defaults
//!
//! | Setting | Default |
//! |---------|---------|
//! | `initial_backoff` | 1 s |
//! | `max_backoff` | 10 s |
//! | `backoff_multiplier` | 2.0 |
//! | `connect_timeout` | 10 s |
//! | `completion_timeout` | 120 s |
//! | `buffer_ttl` | same as `completion_timeout` |
//! | `max_buffered_frames` | 256 per project |
//! | `sweep_interval` | 5 s |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::{Error, Result};
use crate::observer::{ProgressObserver, SharedObserver};
use crate::transport::{BackoffConfig, Dialer, Endpoint, WebSocketDialer};

use super::buffer::{BufferLimits, DEFAULT_MAX_BUFFERED_FRAMES};
use super::coordinator::{Coordinator, CoordinatorConfig};
use super::core::EventMux;

// ============================================================================
// Constants
// ============================================================================

/// Default bound on a single dial.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on `wait_for_project_completion`.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Default period of the buffer eviction sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

// ============================================================================
// EventMuxBuilder
// ============================================================================

/// Builder for configuring an [`EventMux`].
///
/// Use [`EventMux::builder()`] to create a new builder.
pub struct EventMuxBuilder<C = ()> {
    /// Endpoint to connect to on build.
    endpoint: Option<String>,
    /// Reconnect delay policy.
    backoff: BackoffConfig,
    /// Bound on a single dial.
    connect_timeout: Duration,
    /// Default project wait.
    completion_timeout: Duration,
    /// Buffered frame TTL. Follows `completion_timeout` when unset.
    buffer_ttl: Option<Duration>,
    /// Per-project buffer cap.
    max_buffered_frames: usize,
    /// Eviction sweep period.
    sweep_interval: Duration,
    /// Progress sink.
    observer: Option<SharedObserver<C>>,
    /// Transport factory.
    dialer: Option<Arc<dyn Dialer>>,
}

impl<C> Default for EventMuxBuilder<C> {
    fn default() -> Self {
        Self {
            endpoint: None,
            backoff: BackoffConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            completion_timeout: DEFAULT_COMPLETION_TIMEOUT,
            buffer_ttl: None,
            max_buffered_frames: DEFAULT_MAX_BUFFERED_FRAMES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            observer: None,
            dialer: None,
        }
    }
}

impl<C> fmt::Debug for EventMuxBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventMuxBuilder")
            .field("endpoint", &self.endpoint)
            .field("backoff", &self.backoff)
            .field("connect_timeout", &self.connect_timeout)
            .field("completion_timeout", &self.completion_timeout)
            .field("buffer_ttl", &self.buffer_ttl)
            .field("max_buffered_frames", &self.max_buffered_frames)
            .field("sweep_interval", &self.sweep_interval)
            .field("has_observer", &self.observer.is_some())
            .field("custom_dialer", &self.dialer.is_some())
            .finish()
    }
}

// ============================================================================
// EventMuxBuilder Implementation
// ============================================================================

impl<C> EventMuxBuilder<C> {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects to `endpoint` as soon as the multiplexer starts.
    ///
    /// Without it, call [`EventMux::ensure_connected`] later.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the first reconnect delay.
    #[inline]
    #[must_use]
    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.backoff.initial_delay = delay;
        self
    }

    /// Sets the reconnect delay ceiling.
    #[inline]
    #[must_use]
    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.backoff.max_delay = delay;
        self
    }

    /// Sets the factor the reconnect delay grows by.
    #[inline]
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff.multiplier = multiplier;
        self
    }

    /// Bounds a single dial.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the timeout of [`EventMux::wait_for_project_completion`].
    #[inline]
    #[must_use]
    pub fn completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    /// Sets how long frames for untracked projects are kept.
    #[inline]
    #[must_use]
    pub fn buffer_ttl(mut self, ttl: Duration) -> Self {
        self.buffer_ttl = Some(ttl);
        self
    }

    /// Caps the frames buffered per project.
    #[inline]
    #[must_use]
    pub fn max_buffered_frames(mut self, max: usize) -> Self {
        self.max_buffered_frames = max;
        self
    }

    /// Sets how often expired buffers are swept.
    #[inline]
    #[must_use]
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the progress observer.
    #[must_use]
    pub fn observer(mut self, observer: impl ProgressObserver<C> + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Sets an already shared progress observer.
    #[inline]
    #[must_use]
    pub fn shared_observer(mut self, observer: SharedObserver<C>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Replaces the default WebSocket dialer.
    #[must_use]
    pub fn dialer(mut self, dialer: impl Dialer) -> Self {
        self.dialer = Some(Arc::new(dialer));
        self
    }
}

impl<C: Send + 'static> EventMuxBuilder<C> {
    /// Validates the settings and starts the coordinator.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the endpoint is not a ws/wss URL
    /// - [`Error::Config`] if a duration is zero or the backoff bounds
    ///   are inverted
    /// - [`Error::Config`] if no Tokio runtime is running
    pub fn build(self) -> Result<EventMux<C>> {
        self.validate()?;

        let endpoint = self
            .endpoint
            .as_deref()
            .map(Endpoint::validate)
            .transpose()?
            .map(String::from);

        let limits = BufferLimits {
            ttl: self.buffer_ttl.unwrap_or(self.completion_timeout),
            max_frames_per_project: self.max_buffered_frames,
        };

        info!(
            endpoint = endpoint.as_deref().unwrap_or("<none>"),
            completion_timeout_ms = self.completion_timeout.as_millis() as u64,
            buffer_ttl_ms = limits.ttl.as_millis() as u64,
            "Starting event multiplexer"
        );

        let (commands_tx, state_rx, _handle) = Coordinator::spawn(CoordinatorConfig {
            dialer: self.dialer.unwrap_or_else(|| Arc::new(WebSocketDialer)),
            backoff: self.backoff,
            connect_timeout: self.connect_timeout,
            limits,
            sweep_interval: self.sweep_interval,
            observer: self.observer,
            endpoint,
        });

        Ok(EventMux::from_parts(
            commands_tx,
            state_rx,
            self.completion_timeout,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl<C> EventMuxBuilder<C> {
    fn validate(&self) -> Result<()> {
        let backoff = &self.backoff;

        if backoff.initial_delay.is_zero() {
            return Err(Error::config("initial_backoff must be greater than zero"));
        }
        if backoff.max_delay < backoff.initial_delay {
            return Err(Error::config(format!(
                "max_backoff ({:?}) must not be below initial_backoff ({:?})",
                backoff.max_delay, backoff.initial_delay
            )));
        }
        if !(backoff.multiplier.is_finite() && backoff.multiplier >= 1.0) {
            return Err(Error::config(format!(
                "backoff_multiplier must be at least 1.0, got {}",
                backoff.multiplier
            )));
        }

        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("completion_timeout", self.completion_timeout),
            ("sweep_interval", self.sweep_interval),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }

        if self.buffer_ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(Error::config("buffer_ttl must be greater than zero"));
        }
        if self.max_buffered_frames == 0 {
            return Err(Error::config("max_buffered_frames must be at least 1"));
        }

        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::config(
                "EventMux must be built inside a Tokio runtime.\n\
                 Call build() from an async context or within Runtime::enter().",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let builder: EventMuxBuilder = EventMuxBuilder::new();
        assert!(builder.endpoint.is_none());
        assert_eq!(builder.backoff, BackoffConfig::default());
        assert_eq!(builder.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(builder.completion_timeout, Duration::from_secs(120));
        assert_eq!(builder.max_buffered_frames, 256);
        assert!(builder.validate().is_err(), "no runtime in a plain test");
    }

    #[test]
    fn test_setters() {
        let builder: EventMuxBuilder = EventMuxBuilder::new()
            .endpoint("ws://localhost:1")
            .initial_backoff(Duration::from_millis(50))
            .max_backoff(Duration::from_secs(2))
            .buffer_ttl(Duration::from_secs(30))
            .max_buffered_frames(8);

        assert_eq!(builder.endpoint.as_deref(), Some("ws://localhost:1"));
        assert_eq!(builder.backoff.initial_delay, Duration::from_millis(50));
        assert_eq!(builder.backoff.max_delay, Duration::from_secs(2));
        assert_eq!(builder.buffer_ttl, Some(Duration::from_secs(30)));
        assert_eq!(builder.max_buffered_frames, 8);
    }

    #[tokio::test]
    async fn test_build_rejects_inverted_backoff() {
        let err = EventMux::<()>::builder()
            .initial_backoff(Duration::from_secs(5))
            .max_backoff(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_settings() {
        assert!(EventMux::<()>::builder()
            .initial_backoff(Duration::ZERO)
            .build()
            .is_err());
        assert!(EventMux::<()>::builder()
            .completion_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(EventMux::<()>::builder().max_buffered_frames(0).build().is_err());
        assert!(EventMux::<()>::builder()
            .backoff_multiplier(0.5)
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_build_rejects_http_endpoint() {
        let err = EventMux::<()>::builder()
            .endpoint("http://localhost:8080")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("ws or wss"));
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = EventMux::<()>::builder().build().unwrap_err();
        assert!(err.to_string().contains("Tokio runtime"));
    }

    #[tokio::test]
    async fn test_build_starts_disconnected_without_endpoint() {
        let mux = EventMux::<()>::builder().build().unwrap();
        assert_eq!(mux.state(), crate::ConnectionState::Disconnected);
        assert_eq!(mux.completion_timeout(), DEFAULT_COMPLETION_TIMEOUT);
        mux.shutdown().await;
        assert!(mux.is_shutdown());
    }
}
