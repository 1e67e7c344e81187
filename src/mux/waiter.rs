//! Bounded wait for one project's outcome.
//!
//! A [`PendingProject`] is returned by
//! [`EventMux::track_project`](crate::EventMux::track_project). It owns
//! the receiving end of the project's outcome and settles exactly once:
//!
//! | First event | Caller sees | Registry |
//! |-------------|-------------|----------|
//! | `jobCompleted` | `Ok(ProjectResult)` | kept until `completed` |
//! | `failed` / `error` / bare `completed` | `Err(..)` | removed |
//! | timer | `Err(Error::Timeout)` | removed, ID tombstoned |
//! | `cancel()` or drop | nothing | removed, ID tombstoned |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ProjectId;
use crate::protocol::ProjectResult;

use super::coordinator::{Command, CommandSender};

// ============================================================================
// PendingProject
// ============================================================================

/// A tracked project whose outcome has not been collected yet.
///
/// Dropping an unfinished handle cancels the project.
#[must_use = "dropping a PendingProject cancels it"]
pub struct PendingProject<C> {
    project_id: ProjectId,
    seq: u64,
    outcome: Option<oneshot::Receiver<Result<ProjectResult>>>,
    commands_tx: CommandSender<C>,
}

impl<C> fmt::Debug for PendingProject<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingProject")
            .field("project_id", &self.project_id)
            .field("seq", &self.seq)
            .field("finished", &self.outcome.is_none())
            .finish_non_exhaustive()
    }
}

impl<C> PendingProject<C> {
    pub(crate) fn new(
        project_id: ProjectId,
        seq: u64,
        outcome: oneshot::Receiver<Result<ProjectResult>>,
        commands_tx: CommandSender<C>,
    ) -> Self {
        Self {
            project_id,
            seq,
            outcome: Some(outcome),
            commands_tx,
        }
    }

    /// The tracked project.
    #[inline]
    #[must_use]
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// Waits for the outcome for at most `timeout`.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing settles the project in time
    /// - [`Error::RemoteJobFailure`] on `failed` or `error`
    /// - [`Error::CompletedWithoutResult`] on `completed` without a result
    /// - [`Error::AlreadyTracked`] if the ID was tracked by another caller
    /// - [`Error::Shutdown`] if the multiplexer stopped
    pub async fn wait(mut self, timeout: Duration) -> Result<ProjectResult> {
        let Some(outcome) = self.outcome.as_mut() else {
            return Err(Error::Shutdown);
        };

        let settled = tokio::time::timeout(timeout, outcome).await;
        self.outcome = None;

        match settled {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Shutdown),
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                debug!(project_id = %self.project_id, timeout_ms, "Project timed out");
                self.untrack(Error::timeout(self.project_id.clone(), timeout_ms));
                Err(Error::timeout(self.project_id.clone(), timeout_ms))
            }
        }
    }

    /// Stops tracking the project and discards its pending frames.
    pub fn cancel(mut self) {
        self.cancel_in_place();
    }

    fn cancel_in_place(&mut self) {
        if self.outcome.take().is_some() {
            debug!(project_id = %self.project_id, seq = self.seq, "Project cancelled");
            self.untrack(Error::cancelled(self.project_id.clone()));
        }
    }

    fn untrack(&self, reason: Error) {
        let _ = self.commands_tx.send(Command::Untrack {
            project_id: self.project_id.clone(),
            seq: self.seq,
            reason,
        });
    }
}

impl<C> Drop for PendingProject<C> {
    fn drop(&mut self) {
        self.cancel_in_place();
    }
}
