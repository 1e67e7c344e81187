//! Project event multiplexer.
//!
//! Delivers progress and result notifications for many concurrently
//! running remote jobs ("projects") over one shared, long-lived stream.
//!
//! # Architecture
//!
//! ```text
//!  callers ──EventMux──► coordinator task ◄── transport task ◄── stream
//!                           │
//!                           ├─ StreamConnection (state, backoff, open waiters)
//!                           ├─ EventRouter      (parse, deliver or buffer)
//!                           ├─ ProjectTracker   (registry, state machine)
//!                           └─ BufferedQueue    (early frames, TTL, cap)
//! ```
//!
//! Key design principles:
//!
//! - Exactly one stream per [`EventMux`], however many callers clone it
//! - Frames are routed by their `projectId`
//! - Frames that arrive before their caller registers are buffered and
//!   replayed in order
//! - Transport failures reconnect with capped exponential backoff
//! - Every caller's wait is bounded and settles exactly once
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use project_event_mux::{EventMux, ProgressUpdate, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mux: EventMux<String> = EventMux::builder()
//!         .endpoint("wss://socket.example.com/ws?clientId=abc")
//!         .observer(|file: &String, update: &ProgressUpdate| {
//!             println!("{file}: {:?}%", update.percent());
//!         })
//!         .build()?;
//!
//!     mux.wait_for_open(Duration::from_secs(5)).await;
//!
//!     // The project ID comes from the remote API that created the job
//!     let result = mux
//!         .wait_for_project_completion("p1", "photo.png".to_string())
//!         .await?;
//!     println!("Result: {:?}", result.result_url);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`mux`] | Multiplexer handle, builder, routing and registry |
//! | [`transport`] | Reconnecting stream and dialers |
//! | [`protocol`] | Inbound frame types |
//! | [`observer`] | Progress observer interface |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing project, job and client IDs.
pub mod identifiers;

/// Multiplexer handle, builder, routing and registry.
///
/// Use [`EventMux::builder()`] to create a configured instance.
pub mod mux;

/// Progress observer interface.
pub mod observer;

/// Inbound frame types.
pub mod protocol;

/// Reconnecting stream transport.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ClientId, JobId, ProjectId};

// Multiplexer types
pub use mux::{EventMux, EventMuxBuilder, MuxStats, PendingProject};

// Observer types
pub use observer::{ProgressObserver, SharedObserver};

// Protocol types
pub use protocol::{FrameKind, InboundFrame, ProgressUpdate, ProjectResult};

// Transport types
pub use transport::{ConnectionState, Dialer, Endpoint, FrameStream, WebSocketDialer};
