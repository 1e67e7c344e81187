//! Progress observer interface.
//!
//! The multiplexer never renders anything itself. Progress and status
//! frames are forwarded to a [`ProgressObserver`] together with the
//! caller-supplied context of the project they belong to.
//!
//! Observers run on the coordinator task, in per-project wire order, so
//! they must return quickly. Hand heavy work off to a channel.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use crate::identifiers::ProjectId;
use crate::protocol::{FrameKind, ProgressUpdate};

// ============================================================================
// ProgressObserver
// ============================================================================

/// Receives progress side effects for tracked projects.
///
/// Any `Fn(&C, &ProgressUpdate)` closure is an observer that ignores
/// status frames.
pub trait ProgressObserver<C>: Send + Sync {
    /// Called for every `progress` frame.
    fn on_progress(&self, context: &C, update: &ProgressUpdate);

    /// Called for `connected`, `queued` and `started` frames.
    fn on_status(&self, context: &C, project_id: &ProjectId, kind: &FrameKind) {
        let _ = (context, project_id, kind);
    }
}

impl<C, F> ProgressObserver<C> for F
where
    F: Fn(&C, &ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, context: &C, update: &ProgressUpdate) {
        self(context, update);
    }
}

/// Shared observer handle.
pub type SharedObserver<C> = Arc<dyn ProgressObserver<C>>;

// ============================================================================
// Tests
// ============================================================================
