//! Stream transport layer.
//!
//! This module owns the single long-lived connection of a client and
//! keeps it alive across failures.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   TransportEvent   ┌──────────────────────┐
//! │  transport task      │ ─────────────────► │  coordinator         │
//! │  (Dialer + reader)   │  Opened / Frame /  │  StreamConnection    │
//! │                      │  Closed            │  (state, backoff,    │
//! └──────────────────────┘                    │   open waiters)      │
//!            ▲                                └──────────────────────┘
//!            │ spawn / cancel                            │
//!            └───────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `backoff` | Doubling reconnect delay with ceiling |
//! | `connection` | Connection state machine and transport task |
//! | `dialer` | `Dialer` trait, WebSocket dialer, endpoint helpers |

// ============================================================================
// Submodules
// ============================================================================

/// Exponential reconnect backoff.
pub mod backoff;

/// Connection state machine and transport task.
pub mod connection;

/// Opening the underlying stream.
pub mod dialer;

// ============================================================================
// Re-exports
// ============================================================================

pub use backoff::{Backoff, BackoffConfig};
pub use connection::{ConnectionState, OpenWaiters, StreamConnection, TransportEvent};
pub use dialer::{Dialer, Endpoint, FrameStream, WebSocketDialer};
