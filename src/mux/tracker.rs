//! Registry of in-flight projects.
//!
//! [`ProjectTracker`] applies the per-project event state machine and
//! delivers each project's outcome exactly once.
//!
//! # State Machine
//!
//! ```text
//!            jobCompleted               completed
//! Pending ───────────────► Resolved ───────────────► Closed
//!    │                                                 ▲
//!    │   completed / failed / error / timeout / cancel │
//!    └─────────────────────────────────────────────────┘
//! ```
//!
//! `Resolved` projects stay tracked until `completed` arrives so that
//! duplicate terminal frames still find (and are absorbed by) their
//! project.

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ProjectId;
use crate::observer::SharedObserver;
use crate::protocol::{FrameKind, InboundFrame, ProjectResult};

use super::buffer::BufferedQueue;

// ============================================================================
// Types
// ============================================================================

/// Channel a project's single outcome is delivered on.
pub type OutcomeSender = oneshot::Sender<Result<ProjectResult>>;

/// A caller's request to track a project.
pub struct Registration<C> {
    /// Project to track.
    pub project_id: ProjectId,
    /// Caller payload handed to the observer.
    pub context: C,
    /// Registration number, matched by timeout and cancel requests.
    pub seq: u64,
    /// Where the outcome goes.
    pub outcome: OutcomeSender,
}

/// Observable state of a tracked project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    /// Waiting for a result.
    Pending,
    /// Result delivered, waiting for `completed`.
    Resolved,
}

struct Project<C> {
    context: C,
    seq: u64,
    resolved: bool,
    resolved_at: Option<Instant>,
    outcome: Option<OutcomeSender>,
}

impl<C> Project<C> {
    fn resolve(&mut self, result: ProjectResult) {
        self.resolved = true;
        self.resolved_at = Some(Instant::now());
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(Ok(result));
        }
    }

    fn reject(&mut self, error: Error) {
        if self.resolved {
            return;
        }
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(Err(error));
        }
    }
}

// ============================================================================
// ProjectTracker
// ============================================================================

/// In-flight project registry.
pub struct ProjectTracker<C> {
    projects: FxHashMap<ProjectId, Project<C>>,
    observer: Option<SharedObserver<C>>,
}

impl<C> ProjectTracker<C> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(observer: Option<SharedObserver<C>>) -> Self {
        Self {
            projects: FxHashMap::default(),
            observer,
        }
    }

    /// Number of tracked projects.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Returns `true` if nothing is tracked.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Returns `true` if the project is tracked.
    #[inline]
    #[must_use]
    pub fn is_tracked(&self, project_id: &ProjectId) -> bool {
        self.projects.contains_key(project_id)
    }

    /// Returns the project's state, or `None` once closed.
    #[must_use]
    pub fn state_of(&self, project_id: &ProjectId) -> Option<ProjectState> {
        self.projects.get(project_id).map(|p| {
            if p.resolved {
                ProjectState::Resolved
            } else {
                ProjectState::Pending
            }
        })
    }

    /// Starts tracking a project and flushes its buffered frames.
    ///
    /// Buffered frames run through [`handle`](Self::handle) in arrival
    /// order before this returns, so they precede any live frame.
    ///
    /// Returns `false` (and rejects the registration with
    /// [`Error::AlreadyTracked`]) if the ID is already tracked.
    pub fn track_project(
        &mut self,
        registration: Registration<C>,
        buffered: &mut BufferedQueue,
    ) -> bool {
        let Registration {
            project_id,
            context,
            seq,
            outcome,
        } = registration;

        if self.projects.contains_key(&project_id) {
            warn!(%project_id, "Project already tracked");
            let _ = outcome.send(Err(Error::already_tracked(project_id)));
            return false;
        }

        buffered.revive(&project_id);
        self.projects.insert(
            project_id.clone(),
            Project {
                context,
                seq,
                resolved: false,
                resolved_at: None,
                outcome: Some(outcome),
            },
        );

        let frames = buffered.take(&project_id);
        debug!(%project_id, seq, flushed = frames.len(), "Tracking project");

        for frame in &frames {
            self.handle(&project_id, frame);
        }

        true
    }

    /// Applies one frame to a tracked project.
    ///
    /// Frames for untracked projects are ignored here; routing decides
    /// whether to buffer them.
    pub fn handle(&mut self, project_id: &ProjectId, frame: &InboundFrame) {
        let Some(project) = self.projects.get_mut(project_id) else {
            trace!(%project_id, kind = %frame.kind, "Frame for closed project ignored");
            return;
        };

        match &frame.kind {
            kind @ (FrameKind::Connected | FrameKind::Queued | FrameKind::Started) => {
                debug!(%project_id, %kind, "Project status");
                if let Some(observer) = &self.observer {
                    observer.on_status(&project.context, project_id, kind);
                }
            }

            FrameKind::Progress => {
                if let Some(observer) = &self.observer {
                    let update = frame.progress_update(project_id);
                    observer.on_progress(&project.context, &update);
                }
            }

            FrameKind::JobCompleted => {
                if project.resolved {
                    debug!(%project_id, "Duplicate jobCompleted ignored");
                    return;
                }
                info!(%project_id, result_url = ?frame.result_url, "Project resolved");
                project.resolve(frame.project_result(project_id));
            }

            FrameKind::Completed => {
                if let Some(mut project) = self.projects.remove(project_id) {
                    if !project.resolved {
                        warn!(%project_id, "Project completed without a result");
                        project.reject(Error::completed_without_result(project_id.clone()));
                    }
                    debug!(%project_id, "Project closed");
                }
            }

            FrameKind::Failed | FrameKind::Error => {
                if let Some(mut project) = self.projects.remove(project_id) {
                    let message = frame.failure_text();
                    if project.resolved {
                        debug!(%project_id, %message, "Failure after resolve ignored");
                    } else {
                        warn!(%project_id, %message, "Project failed");
                        project.reject(Error::remote_job_failure(project_id.clone(), message));
                    }
                }
            }

            FrameKind::Other(name) => {
                trace!(%project_id, kind = %name, "Unknown frame type ignored");
            }
        }
    }

    /// Force-removes a project on behalf of its caller.
    ///
    /// Only removes the registration numbered `seq`, so a stale timeout
    /// cannot close a newer registration under the same ID. An unresolved
    /// project is rejected with `error`.
    pub fn remove(&mut self, project_id: &ProjectId, seq: u64, error: Error) -> bool {
        match self.projects.get(project_id) {
            Some(project) if project.seq == seq => {}
            _ => return false,
        }

        if let Some(mut project) = self.projects.remove(project_id) {
            debug!(%project_id, seq, reason = %error, "Project removed");
            project.reject(error);
        }
        true
    }

    /// Drops resolved projects whose `completed` frame is overdue.
    ///
    /// Their callers already hold a result, so nothing is delivered.
    pub fn expire_resolved(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.projects.len();
        self.projects.retain(|project_id, project| {
            let keep = project
                .resolved_at
                .is_none_or(|at| now.saturating_duration_since(at) < max_age);
            if !keep {
                debug!(%project_id, "Resolved project expired without completed");
            }
            keep
        });
        before - self.projects.len()
    }

    /// Rejects and removes every tracked project.
    pub fn fail_all(&mut self, mut make_error: impl FnMut(&ProjectId) -> Error) -> usize {
        let count = self.projects.len();
        for (project_id, mut project) in self.projects.drain() {
            project.reject(make_error(&project_id));
        }
        if count > 0 {
            debug!(count, "Failed tracked projects");
        }
        count
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::protocol::ProgressUpdate;

    type Seen = Arc<Mutex<Vec<(String, Option<f64>)>>>;

    fn recording_tracker() -> (ProjectTracker<String>, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: SharedObserver<String> =
            Arc::new(move |ctx: &String, update: &ProgressUpdate| {
                sink.lock().push((ctx.clone(), update.progress));
            });
        (ProjectTracker::new(Some(observer)), seen)
    }

    fn frame(json: &str) -> InboundFrame {
        InboundFrame::parse(json).expect("valid frame")
    }

    fn register(
        tracker: &mut ProjectTracker<String>,
        buffered: &mut BufferedQueue,
        id: &str,
        seq: u64,
    ) -> oneshot::Receiver<Result<ProjectResult>> {
        let (tx, rx) = oneshot::channel();
        tracker.track_project(
            Registration {
                project_id: ProjectId::new(id),
                context: format!("ctx-{id}"),
                seq,
                outcome: tx,
            },
            buffered,
        );
        rx
    }

    #[test]
    fn test_job_completed_resolves_once() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let mut rx = register(&mut tracker, &mut buffered, "p1", 1);

        tracker.handle(&id, &frame(r#"{"type":"jobCompleted","projectId":"p1","resultUrl":"r1"}"#));
        tracker.handle(&id, &frame(r#"{"type":"jobCompleted","projectId":"p1","resultUrl":"r2"}"#));

        let result = rx.try_recv().unwrap().unwrap();
        assert_eq!(result.result_url.as_deref(), Some("r1"));
        assert_eq!(tracker.state_of(&id), Some(ProjectState::Resolved));
    }

    #[test]
    fn test_completed_untracks_resolved_project() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let mut rx = register(&mut tracker, &mut buffered, "p1", 1);

        tracker.handle(&id, &frame(r#"{"type":"jobCompleted","projectId":"p1","resultUrl":"r1"}"#));
        tracker.handle(&id, &frame(r#"{"type":"completed","projectId":"p1"}"#));

        assert!(!tracker.is_tracked(&id));
        assert!(rx.try_recv().unwrap().is_ok());
    }

    #[test]
    fn test_failed_before_result_rejects_and_untracks() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let mut rx = register(&mut tracker, &mut buffered, "p1", 1);

        tracker.handle(&id, &frame(r#"{"type":"failed","projectId":"p1","error":"nsfw"}"#));

        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, Error::RemoteJobFailure { ref message, .. } if message == "nsfw"));
        assert!(!tracker.is_tracked(&id));
    }

    #[test]
    fn test_error_after_resolve_keeps_result() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let mut rx = register(&mut tracker, &mut buffered, "p1", 1);

        tracker.handle(&id, &frame(r#"{"type":"jobCompleted","projectId":"p1","resultUrl":"r1"}"#));
        tracker.handle(&id, &frame(r#"{"type":"error","projectId":"p1","message":"late"}"#));

        assert!(rx.try_recv().unwrap().is_ok());
        assert!(!tracker.is_tracked(&id));
    }

    #[test]
    fn test_completed_without_result_rejects() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let mut rx = register(&mut tracker, &mut buffered, "p1", 1);

        tracker.handle(&id, &frame(r#"{"type":"completed","projectId":"p1"}"#));

        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, Error::CompletedWithoutResult { .. }));
    }

    #[test]
    fn test_buffered_frames_flush_in_order_on_track() {
        let (mut tracker, seen) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let now = Instant::now();

        for json in [
            r#"{"type":"queued","projectId":"p1"}"#,
            r#"{"type":"progress","projectId":"p1","progress":0.3}"#,
            r#"{"type":"progress","projectId":"p1","progress":0.6}"#,
        ] {
            buffered.push(&id, frame(json), now);
        }
        assert!(seen.lock().is_empty());

        let _rx = register(&mut tracker, &mut buffered, "p1", 1);

        assert_eq!(
            *seen.lock(),
            vec![("ctx-p1".to_string(), Some(0.3)), ("ctx-p1".to_string(), Some(0.6))]
        );
        assert_eq!(buffered.frame_count(), 0);

        // Live frames follow the flushed ones
        tracker.handle(&id, &frame(r#"{"type":"progress","projectId":"p1","progress":0.9}"#));
        assert_eq!(seen.lock().last(), Some(&("ctx-p1".to_string(), Some(0.9))));
    }

    #[test]
    fn test_buffered_terminal_frame_closes_on_track() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let now = Instant::now();

        buffered.push(&id, frame(r#"{"type":"jobCompleted","projectId":"p1","resultUrl":"r1"}"#), now);
        buffered.push(&id, frame(r#"{"type":"completed","projectId":"p1"}"#), now);

        let mut rx = register(&mut tracker, &mut buffered, "p1", 1);

        assert_eq!(rx.try_recv().unwrap().unwrap().result_url.as_deref(), Some("r1"));
        assert!(!tracker.is_tracked(&id));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let _first = register(&mut tracker, &mut buffered, "p1", 1);
        let mut second = register(&mut tracker, &mut buffered, "p1", 2);

        let err = second.try_recv().unwrap().unwrap_err();
        assert!(matches!(err, Error::AlreadyTracked { .. }));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_remove_matches_registration_seq() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let mut rx = register(&mut tracker, &mut buffered, "p1", 7);

        assert!(!tracker.remove(&id, 6, Error::timeout(id.clone(), 10)));
        assert!(tracker.is_tracked(&id));

        assert!(tracker.remove(&id, 7, Error::timeout(id.clone(), 10)));
        assert!(!tracker.is_tracked(&id));
        assert!(rx.try_recv().unwrap().unwrap_err().is_timeout());
    }

    #[test]
    fn test_fail_all() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let mut a = register(&mut tracker, &mut buffered, "a", 1);
        let mut b = register(&mut tracker, &mut buffered, "b", 2);

        assert_eq!(tracker.fail_all(|_| Error::Shutdown), 2);
        assert!(tracker.is_empty());
        assert!(matches!(a.try_recv().unwrap(), Err(Error::Shutdown)));
        assert!(matches!(b.try_recv().unwrap(), Err(Error::Shutdown)));
    }

    #[test]
    fn test_expire_resolved_keeps_pending() {
        let (mut tracker, _) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let resolved = ProjectId::new("done");
        let _a = register(&mut tracker, &mut buffered, "done", 1);
        let _b = register(&mut tracker, &mut buffered, "waiting", 2);

        tracker.handle(&resolved, &frame(r#"{"type":"jobCompleted","projectId":"done"}"#));

        let ttl = Duration::from_secs(60);
        assert_eq!(tracker.expire_resolved(Instant::now(), ttl), 0);
        assert_eq!(tracker.expire_resolved(Instant::now() + ttl, ttl), 1);
        assert!(!tracker.is_tracked(&resolved));
        assert!(tracker.is_tracked(&ProjectId::new("waiting")));
    }

    #[test]
    fn test_unknown_kind_is_ignored() {
        let (mut tracker, seen) = recording_tracker();
        let mut buffered = BufferedQueue::default();
        let id = ProjectId::new("p1");
        let mut rx = register(&mut tracker, &mut buffered, "p1", 1);

        tracker.handle(&id, &frame(r#"{"type":"preview","projectId":"p1"}"#));

        assert!(seen.lock().is_empty());
        assert_eq!(tracker.state_of(&id), Some(ProjectState::Pending));
        assert!(rx.try_recv().is_err());
    }
}
