//! Inbound frame routing.
//!
//! [`EventRouter`] sits between the transport and the project registry.
//! Every text frame read from the stream goes through
//! [`EventRouter::on_frame`]:
//!
//! ```text
//! raw text ──parse──► InboundFrame ──projectId──┬─ tracked ──► ProjectTracker::handle
//!    │                     │                    └─ unknown ──► BufferedQueue::push
//!    ▼                     ▼
//!  dropped             dropped
//! (malformed)      (no projectId)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::identifiers::ProjectId;
use crate::observer::SharedObserver;
use crate::protocol::InboundFrame;

use super::buffer::{BufferLimits, BufferedQueue, PushOutcome};
use super::tracker::{ProjectTracker, Registration};

// ============================================================================
// RouteOutcome
// ============================================================================

/// Where a frame ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handled by a tracked project.
    Delivered,
    /// Held until the project is tracked.
    Buffered,
    /// Discarded and logged.
    Dropped,
}

// ============================================================================
// RouterCounters
// ============================================================================

/// Running totals since the router was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouterCounters {
    /// Frames handled live.
    pub delivered: u64,
    /// Frames sent to the buffer.
    pub buffered: u64,
    /// Frames discarded (malformed, unroutable, tombstoned, evicted).
    pub dropped: u64,
}

// ============================================================================
// EventRouter
// ============================================================================

/// Demultiplexes frames to tracked projects or their buffers.
pub struct EventRouter<C> {
    tracker: ProjectTracker<C>,
    buffered: BufferedQueue,
    ttl: Duration,
    counters: RouterCounters,
}

impl<C> EventRouter<C> {
    /// Creates a router with an empty registry.
    #[must_use]
    pub fn new(observer: Option<SharedObserver<C>>, limits: BufferLimits) -> Self {
        Self {
            tracker: ProjectTracker::new(observer),
            buffered: BufferedQueue::new(limits),
            ttl: limits.ttl,
            counters: RouterCounters::default(),
        }
    }

    /// Parses and routes one raw frame.
    pub fn on_frame(&mut self, raw: &str, now: Instant) -> RouteOutcome {
        match InboundFrame::parse(raw) {
            Ok(frame) => self.dispatch(frame, now),
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
                self.counters.dropped += 1;
                RouteOutcome::Dropped
            }
        }
    }

    /// Routes a parsed frame by its `projectId`.
    pub fn dispatch(&mut self, frame: InboundFrame, now: Instant) -> RouteOutcome {
        let project_id = match frame.routing_id() {
            Ok(id) => id.clone(),
            Err(e) => {
                warn!(error = %e, "Dropping unroutable frame");
                self.counters.dropped += 1;
                return RouteOutcome::Dropped;
            }
        };

        if self.tracker.is_tracked(&project_id) {
            trace!(%project_id, kind = %frame.kind, "Delivering frame");
            self.tracker.handle(&project_id, &frame);
            self.counters.delivered += 1;
            return RouteOutcome::Delivered;
        }

        match self.buffered.push(&project_id, frame, now) {
            PushOutcome::Buffered => {
                self.counters.buffered += 1;
                RouteOutcome::Buffered
            }
            PushOutcome::Overflowed => {
                self.counters.buffered += 1;
                self.counters.dropped += 1;
                RouteOutcome::Buffered
            }
            PushOutcome::Tombstoned => {
                self.counters.dropped += 1;
                RouteOutcome::Dropped
            }
        }
    }

    /// Registers a project and flushes its buffered frames.
    pub fn track_project(&mut self, registration: Registration<C>) -> bool {
        self.tracker.track_project(registration, &mut self.buffered)
    }

    /// Removes a project on behalf of its caller and tombstones the ID.
    ///
    /// Used for timeouts and cancellation. Does nothing unless `seq`
    /// matches the current registration.
    pub fn abandon(
        &mut self,
        project_id: &ProjectId,
        seq: u64,
        reason: Error,
        now: Instant,
    ) -> bool {
        if !self.tracker.remove(project_id, seq, reason) {
            trace!(%project_id, seq, "Abandon ignored, registration already gone");
            return false;
        }

        let purged = self.buffered.abandon(project_id, now);
        if purged > 0 {
            debug!(%project_id, purged, "Purged buffered frames");
            self.counters.dropped += purged as u64;
        }
        true
    }

    /// Runs periodic eviction of stale buffers and resolved projects.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let evicted = self.buffered.evict_expired(now);
        self.counters.dropped += evicted as u64;
        self.tracker.expire_resolved(now, self.ttl);
        evicted
    }

    /// Rejects every tracked project and clears all buffers.
    pub fn shutdown(&mut self) -> usize {
        let failed = self.tracker.fail_all(|_| Error::Shutdown);
        self.buffered.clear();
        failed
    }

    /// Returns `true` if the project is tracked.
    #[inline]
    #[must_use]
    pub fn is_tracked(&self, project_id: &ProjectId) -> bool {
        self.tracker.is_tracked(project_id)
    }

    /// Number of tracked projects.
    #[inline]
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracker.len()
    }

    /// Number of projects with buffered frames.
    #[inline]
    #[must_use]
    pub fn buffered_projects(&self) -> usize {
        self.buffered.project_count()
    }

    /// Total number of buffered frames.
    #[inline]
    #[must_use]
    pub fn buffered_frames(&self) -> usize {
        self.buffered.frame_count()
    }

    /// Running frame totals.
    #[inline]
    #[must_use]
    pub fn counters(&self) -> RouterCounters {
        self.counters
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
    use proptest::prelude::*;
    use tokio::sync::oneshot;

    use crate::error::Result;
    use crate::protocol::{ProgressUpdate, ProjectResult};

    type Seen = Arc<Mutex<Vec<(String, f64)>>>;

    fn router() -> (EventRouter<String>, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: SharedObserver<String> =
            Arc::new(move |ctx: &String, update: &ProgressUpdate| {
                let value = update.progress.or(update.step.map(f64::from));
                sink.lock().push((ctx.clone(), value.unwrap_or_default()));
            });
        (EventRouter::new(Some(observer), BufferLimits::default()), seen)
    }

    fn track(
        router: &mut EventRouter<String>,
        id: &str,
        seq: u64,
    ) -> oneshot::Receiver<Result<ProjectResult>> {
        let (tx, rx) = oneshot::channel();
        router.track_project(Registration {
            project_id: ProjectId::new(id),
            context: id.to_string(),
            seq,
            outcome: tx,
        });
        rx
    }

    fn progress(id: &str, value: f64) -> String {
        format!(r#"{{"type":"progress","projectId":"{id}","progress":{value}}}"#)
    }

    fn step(id: &str, step: u32) -> String {
        format!(r#"{{"type":"progress","projectId":"{id}","step":{step},"stepCount":1000}}"#)
    }

    #[test]
    fn test_malformed_and_unroutable_frames_dropped() {
        let (mut router, _) = router();
        let now = Instant::now();

        assert_eq!(router.on_frame("{not json", now), RouteOutcome::Dropped);
        assert_eq!(router.on_frame(r#"{"type":"progress"}"#, now), RouteOutcome::Dropped);
        assert_eq!(
            router.on_frame(r#"{"type":"progress","projectId":""}"#, now),
            RouteOutcome::Dropped
        );
        assert_eq!(router.counters().dropped, 3);
        assert_eq!(router.buffered_frames(), 0);
    }

    #[test]
    fn test_progress_before_track_is_replayed() {
        let (mut router, seen) = router();
        let now = Instant::now();

        assert_eq!(router.on_frame(&progress("p1", 0.3), now), RouteOutcome::Buffered);
        assert!(seen.lock().is_empty());

        let _rx = track(&mut router, "p1", 1);
        assert_eq!(*seen.lock(), vec![("p1".to_string(), 0.3)]);
        assert_eq!(router.buffered_projects(), 0);
    }

    #[test]
    fn test_duplicate_job_completed_keeps_first_result() {
        let (mut router, _) = router();
        let now = Instant::now();
        let mut rx = track(&mut router, "p1", 1);

        router.on_frame(r#"{"type":"jobCompleted","projectId":"p1","resultUrl":"r1"}"#, now);
        router.on_frame(r#"{"type":"jobCompleted","projectId":"p1","resultUrl":"r2"}"#, now);

        let result = rx.try_recv().unwrap().unwrap();
        assert_eq!(result.result_url.as_deref(), Some("r1"));
    }

    #[test]
    fn test_terminal_frames_with_odd_counts_still_route() {
        let (mut router, _) = router();
        let now = Instant::now();

        let mut resolved = track(&mut router, "p1", 1);
        let raw = r#"{"type":"jobCompleted","projectId":"p1","resultUrl":"r1","step":20.0,"stepCount":20}"#;
        assert_eq!(router.on_frame(raw, now), RouteOutcome::Delivered);
        let result = resolved.try_recv().unwrap().unwrap();
        assert_eq!(result.result_url.as_deref(), Some("r1"));

        let mut rejected = track(&mut router, "p2", 2);
        let raw = r#"{"type":"failed","projectId":"p2","step":-1,"error":"x"}"#;
        assert_eq!(router.on_frame(raw, now), RouteOutcome::Delivered);
        assert!(matches!(
            rejected.try_recv().unwrap(),
            Err(Error::RemoteJobFailure { .. })
        ));
        assert!(!router.is_tracked(&ProjectId::new("p2")));
        assert_eq!(router.counters().dropped, 0);
    }

    #[test]
    fn test_interleaved_projects_stay_separate() {
        let (mut router, seen) = router();
        let now = Instant::now();
        let _p1 = track(&mut router, "p1", 1);
        let _p2 = track(&mut router, "p2", 2);

        for raw in [
            progress("p1", 0.1),
            progress("p2", 0.5),
            progress("p1", 0.2),
            progress("p2", 0.6),
            progress("p1", 0.3),
        ] {
            assert_eq!(router.on_frame(&raw, now), RouteOutcome::Delivered);
        }

        let seen = seen.lock();
        let of = |id: &str| -> Vec<f64> {
            seen.iter().filter(|(c, _)| c == id).map(|(_, v)| *v).collect()
        };
        assert_eq!(of("p1"), vec![0.1, 0.2, 0.3]);
        assert_eq!(of("p2"), vec![0.5, 0.6]);
    }

    #[test]
    fn test_abandon_tombstones_late_frames() {
        let (mut router, _) = router();
        let now = Instant::now();
        let id = ProjectId::new("p1");
        let mut rx = track(&mut router, "p1", 4);

        assert!(!router.abandon(&id, 3, Error::cancelled(id.clone()), now));
        assert!(router.abandon(&id, 4, Error::cancelled(id.clone()), now));
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Cancelled { .. })));

        assert_eq!(router.on_frame(&progress("p1", 0.9), now), RouteOutcome::Dropped);
        assert_eq!(router.buffered_frames(), 0);
    }

    #[test]
    fn test_sweep_evicts_old_buffers() {
        let limits = BufferLimits {
            ttl: Duration::from_secs(5),
            max_frames_per_project: 8,
        };
        let mut router: EventRouter<()> = EventRouter::new(None, limits);
        let start = Instant::now();

        router.on_frame(&progress("orphan", 0.1), start);
        assert_eq!(router.sweep(start + Duration::from_secs(1)), 0);
        assert_eq!(router.sweep(start + Duration::from_secs(5)), 1);
        assert_eq!(router.buffered_projects(), 0);
    }

    #[test]
    fn test_shutdown_rejects_tracked() {
        let (mut router, _) = router();
        let mut rx = track(&mut router, "p1", 1);
        router.on_frame(&progress("p2", 0.1), Instant::now());

        assert_eq!(router.shutdown(), 1);
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Shutdown)));
        assert_eq!(router.buffered_frames(), 0);
    }

    proptest! {
        #[test]
        fn prop_buffered_then_live_order_is_wire_order(
            values in prop::collection::vec(0u32..1000, 1..40),
            split in 0usize..40,
        ) {
            let (mut router, seen) = router();
            let now = Instant::now();
            let split = split.min(values.len());
            let expected: Vec<f64> = values.iter().copied().map(f64::from).collect();

            for value in &values[..split] {
                router.on_frame(&step("p1", *value), now);
            }
            let _rx = track(&mut router, "p1", 1);
            for value in &values[split..] {
                router.on_frame(&step("p1", *value), now);
            }

            let got: Vec<f64> = seen.lock().iter().map(|(_, v)| *v).collect();
            prop_assert_eq!(got, expected);
        }
    }
}
