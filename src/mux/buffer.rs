//! Buffered frames for projects that are not tracked yet.
//!
//! A job can start reporting before its caller registers it. Those frames
//! are kept per project, in arrival order, until the project is tracked
//! and the buffer is flushed.
//!
//! Buffers are bounded two ways:
//!
//! - frames older than the TTL are evicted by [`BufferedQueue::evict_expired`];
//! - each project keeps at most `max_frames_per_project`, dropping the
//!   oldest on overflow.
//!
//! Projects whose caller cancelled or timed out are tombstoned for one
//! TTL so their late frames are dropped instead of buffered again.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::identifiers::ProjectId;
use crate::protocol::InboundFrame;

// ============================================================================
// Constants
// ============================================================================

/// Default age after which buffered frames are discarded.
pub const DEFAULT_BUFFER_TTL: Duration = Duration::from_secs(120);

/// Default per-project frame cap.
pub const DEFAULT_MAX_BUFFERED_FRAMES: usize = 256;

// ============================================================================
// BufferLimits
// ============================================================================

/// Eviction policy for buffered frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    /// Maximum age of a buffered frame.
    pub ttl: Duration,
    /// Maximum frames kept per project.
    pub max_frames_per_project: usize,
}

impl Default for BufferLimits {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_BUFFER_TTL,
            max_frames_per_project: DEFAULT_MAX_BUFFERED_FRAMES,
        }
    }
}

// ============================================================================
// PushOutcome
// ============================================================================

/// What happened to a frame handed to [`BufferedQueue::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Appended to the project's buffer.
    Buffered,
    /// Appended; the oldest frame was dropped to respect the cap.
    Overflowed,
    /// Dropped because the project was recently abandoned.
    Tombstoned,
}

// ============================================================================
// BufferedQueue
// ============================================================================

/// Per-project ordered frame buffers.
#[derive(Debug, Default)]
pub struct BufferedQueue {
    queues: FxHashMap<ProjectId, VecDeque<(Instant, InboundFrame)>>,
    tombstones: FxHashMap<ProjectId, Instant>,
    limits: BufferLimits,
}

impl BufferedQueue {
    /// Creates an empty queue with the given limits.
    #[must_use]
    pub fn new(limits: BufferLimits) -> Self {
        Self {
            queues: FxHashMap::default(),
            tombstones: FxHashMap::default(),
            limits,
        }
    }

    /// Appends a frame to the project's buffer, creating it if absent.
    pub fn push(&mut self, project_id: &ProjectId, frame: InboundFrame, now: Instant) -> PushOutcome {
        if self.is_tombstoned(project_id, now) {
            debug!(%project_id, kind = %frame.kind, "Dropping frame for abandoned project");
            return PushOutcome::Tombstoned;
        }

        let queue = self.queues.entry(project_id.clone()).or_default();
        queue.push_back((now, frame));

        if queue.len() > self.limits.max_frames_per_project {
            queue.pop_front();
            warn!(
                %project_id,
                cap = self.limits.max_frames_per_project,
                "Buffer full, dropped oldest frame"
            );
            return PushOutcome::Overflowed;
        }

        PushOutcome::Buffered
    }

    /// Removes and returns the project's frames in arrival order.
    pub fn take(&mut self, project_id: &ProjectId) -> Vec<InboundFrame> {
        self.queues
            .remove(project_id)
            .map(|queue| queue.into_iter().map(|(_, frame)| frame).collect())
            .unwrap_or_default()
    }

    /// Discards the project's frames and drops its future ones for a TTL.
    pub fn abandon(&mut self, project_id: &ProjectId, now: Instant) -> usize {
        let purged = self.queues.remove(project_id).map_or(0, |q| q.len());
        self.tombstones.insert(project_id.clone(), now);
        purged
    }

    /// Lifts a tombstone so the ID can be tracked again.
    pub fn revive(&mut self, project_id: &ProjectId) {
        self.tombstones.remove(project_id);
    }

    /// Returns `true` if frames for this project are currently dropped.
    #[must_use]
    pub fn is_tombstoned(&self, project_id: &ProjectId, now: Instant) -> bool {
        self.tombstones
            .get(project_id)
            .is_some_and(|since| now.saturating_duration_since(*since) < self.limits.ttl)
    }

    /// Drops frames and tombstones older than the TTL.
    ///
    /// Returns the number of frames evicted.
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let ttl = self.limits.ttl;
        let mut evicted = 0;

        self.queues.retain(|project_id, queue| {
            let before = queue.len();
            while queue
                .front()
                .is_some_and(|(at, _)| now.saturating_duration_since(*at) >= ttl)
            {
                queue.pop_front();
            }
            let dropped = before - queue.len();
            if dropped > 0 {
                warn!(%project_id, dropped, "Evicted expired buffered frames");
            }
            evicted += dropped;
            !queue.is_empty()
        });

        self.tombstones
            .retain(|_, since| now.saturating_duration_since(*since) < ttl);

        evicted
    }

    /// Drops every buffer and tombstone.
    pub fn clear(&mut self) {
        self.queues.clear();
        self.tombstones.clear();
    }

    /// Number of projects with buffered frames.
    #[inline]
    #[must_use]
    pub fn project_count(&self) -> usize {
        self.queues.len()
    }

    /// Total number of buffered frames.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.queues.values().map(VecDeque::len).sum()
    }

    /// Number of frames buffered for one project.
    #[must_use]
    pub fn len_for(&self, project_id: &ProjectId) -> usize {
        self.queues.get(project_id).map_or(0, VecDeque::len)
    }
}

// ============================================================================
// Tests
// ============================================================================
