//! Error types for the event multiplexer.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use project_event_mux::{EventMux, ProjectId, Result};
//!
//! async fn example(mux: &EventMux) -> Result<()> {
//!     let result = mux
//!         .wait_for_project_completion(ProjectId::new("p1"), ())
//!         .await?;
//!     println!("{:?}", result.result_url);
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Transport | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Frames | [`Error::MalformedFrame`], [`Error::MissingProjectId`] |
//! | Project outcome | [`Error::RemoteJobFailure`], [`Error::Timeout`], [`Error::CompletedWithoutResult`], [`Error::Cancelled`], [`Error::AlreadyTracked`] |
//! | Lifecycle | [`Error::Shutdown`], [`Error::ChannelClosed`] |
//! | External | [`Error::WebSocket`] |
//!
//! Transport errors never reach a project caller: they only drive the
//! reconnect loop. Frame errors are logged and dropped. The project
//! outcome category is what a caller of
//! [`EventMux::wait_for_project_completion`](crate::EventMux::wait_for_project_completion)
//! can observe.

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::ProjectId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when builder settings are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Stream connection failed.
    ///
    /// Returned when the transport cannot be established.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Dialing the endpoint took too long.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The stream was closed by the remote end.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Frame Errors
    // ========================================================================
    /// Inbound frame could not be parsed.
    #[error("Malformed frame: {message}")]
    MalformedFrame {
        /// Parser error description.
        message: String,
    },

    /// Inbound frame carries no usable `projectId`.
    #[error("Frame of type '{frame_type}' has no projectId")]
    MissingProjectId {
        /// The frame's `type` field.
        frame_type: String,
    },

    // ========================================================================
    // Project Outcome Errors
    // ========================================================================
    /// The remote job reported a failure.
    ///
    /// Produced by `failed` and `error` frames.
    #[error("Project {project_id} failed: {message}")]
    RemoteJobFailure {
        /// The failed project.
        project_id: ProjectId,
        /// Error text reported by the remote end.
        message: String,
    },

    /// No terminal frame arrived within the completion budget.
    #[error("Project {project_id} timed out after {timeout_ms}ms")]
    Timeout {
        /// The project that timed out.
        project_id: ProjectId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A `completed` frame closed the project before any result arrived.
    #[error("Project {project_id} completed without a result")]
    CompletedWithoutResult {
        /// The project that closed.
        project_id: ProjectId,
    },

    /// The caller abandoned the project.
    #[error("Project {project_id} was cancelled")]
    Cancelled {
        /// The cancelled project.
        project_id: ProjectId,
    },

    /// Another caller already tracks this project.
    #[error("Project {project_id} is already tracked")]
    AlreadyTracked {
        /// The duplicated project.
        project_id: ProjectId,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The multiplexer was shut down.
    #[error("Event multiplexer shut down")]
    Shutdown,

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),

    // ========================================================================
    // External Errors
    // ========================================================================
    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// Creates a missing project ID error.
    #[inline]
    pub fn missing_project_id(frame_type: impl Into<String>) -> Self {
        Self::MissingProjectId {
            frame_type: frame_type.into(),
        }
    }

    /// Creates a remote job failure.
    #[inline]
    pub fn remote_job_failure(project_id: ProjectId, message: impl Into<String>) -> Self {
        Self::RemoteJobFailure {
            project_id,
            message: message.into(),
        }
    }

    /// Creates a project timeout error.
    #[inline]
    pub fn timeout(project_id: ProjectId, timeout_ms: u64) -> Self {
        Self::Timeout {
            project_id,
            timeout_ms,
        }
    }

    /// Creates a completed-without-result error.
    #[inline]
    pub fn completed_without_result(project_id: ProjectId) -> Self {
        Self::CompletedWithoutResult { project_id }
    }

    /// Creates a cancellation error.
    #[inline]
    pub fn cancelled(project_id: ProjectId) -> Self {
        Self::Cancelled { project_id }
    }

    /// Creates an already-tracked error.
    #[inline]
    pub fn already_tracked(project_id: ProjectId) -> Self {
        Self::AlreadyTracked { project_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. } | Self::Timeout { .. })
    }

    /// Returns `true` if the remote job itself reported failure.
    #[inline]
    #[must_use]
    pub fn is_remote_failure(&self) -> bool {
        matches!(self, Self::RemoteJobFailure { .. })
    }

    /// Returns `true` if this is a transport error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error was raised for a frame, not a caller.
    #[inline]
    #[must_use]
    pub fn is_frame_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedFrame { .. } | Self::MissingProjectId { .. }
        )
    }

    /// Returns the project this error belongs to, if any.
    #[must_use]
    pub fn project_id(&self) -> Option<&ProjectId> {
        match self {
            Self::RemoteJobFailure { project_id, .. }
            | Self::Timeout { project_id, .. }
            | Self::CompletedWithoutResult { project_id }
            | Self::Cancelled { project_id }
            | Self::AlreadyTracked { project_id } => Some(project_id),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
