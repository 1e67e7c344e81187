//! Wire protocol message types.
//!
//! The stream is one-directional: the remote end pushes JSON text frames,
//! each describing an event for exactly one project. This client never
//! writes application messages back.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Inbound frame, progress and result types |

// ============================================================================
// Submodules
// ============================================================================

/// Inbound frame types.
pub mod frame;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{FrameKind, InboundFrame, ProgressUpdate, ProjectResult};
