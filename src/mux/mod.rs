//! Event multiplexer.
//!
//! This module demultiplexes project notifications from the shared
//! stream to the callers waiting on them.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`EventMux`] | Cloneable service handle |
//! | [`EventMuxBuilder`] | Fluent configuration builder |
//! | [`PendingProject`] | One caller's bounded wait |
//! | [`EventRouter`] | Parses frames, delivers or buffers them |
//! | [`ProjectTracker`] | In-flight registry and per-project state machine |
//! | [`BufferedQueue`] | Frames for projects not tracked yet |
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use project_event_mux::{EventMux, Result};
//!
//! # async fn example() -> Result<()> {
//! let mux: EventMux = EventMux::builder().build()?;
//! mux.ensure_connected("wss://socket.example.com/ws?clientId=abc")?;
//!
//! let pending = mux.track_project("p1", ())?;
//! let result = pending.wait(Duration::from_secs(60)).await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Per-project frame buffers with TTL and cap eviction.
pub mod buffer;

/// Fluent builder pattern for multiplexer configuration.
pub mod builder;

/// Single-owner coordinator task.
mod coordinator;

/// Core multiplexer handle.
pub mod core;

/// Frame parsing and routing.
pub mod router;

/// Project registry and state machine.
pub mod tracker;

/// Bounded wait for one project.
pub mod waiter;

// ============================================================================
// Re-exports
// ============================================================================

pub use buffer::{BufferLimits, BufferedQueue, PushOutcome};
pub use builder::EventMuxBuilder;
pub use self::core::{EventMux, MuxStats};
pub use router::{EventRouter, RouteOutcome, RouterCounters};
pub use tracker::{ProjectState, ProjectTracker, Registration};
pub use waiter::PendingProject;
