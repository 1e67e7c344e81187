//! Inbound frame types.
//!
//! Every message on the stream is one JSON object describing an event for
//! a single project.
//!
//! # Format
//!
//! ```json
//! {
//!   "type": "progress",
//!   "projectId": "p1",
//!   "jobId": "j1",
//!   "progress": 0.3,
//!   "step": 6,
//!   "stepCount": 20
//! }
//! ```
//!
//! # Frame Types
//!
//! | Type | Meaning | Terminal |
//! |------|---------|----------|
//! | `connected`, `queued`, `started` | informational status | no |
//! | `progress` | step-level progress | no |
//! | `jobCompleted` | result available | no (project stays tracked) |
//! | `completed` | project finished | yes |
//! | `failed`, `error` | remote failure | yes |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{JobId, ProjectId};

// ============================================================================
// FrameKind
// ============================================================================

/// The `type` field of an inbound frame.
///
/// Unknown types are kept as [`FrameKind::Other`] so newer servers do not
/// break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum FrameKind {
    /// Remote end accepted the project.
    Connected,
    /// Project is waiting for a worker.
    Queued,
    /// A worker started the project.
    Started,
    /// Step-level progress.
    Progress,
    /// A result is available.
    JobCompleted,
    /// The project is finished and can be untracked.
    Completed,
    /// The remote job failed.
    Failed,
    /// The remote end reported an error for the project.
    Error,
    /// Any type this client does not know.
    Other(String),
}

impl FrameKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Progress => "progress",
            Self::JobCompleted => "jobCompleted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Error => "error",
            Self::Other(name) => name,
        }
    }

    /// Returns `true` for purely informational status kinds.
    #[inline]
    #[must_use]
    pub fn is_status(&self) -> bool {
        matches!(self, Self::Connected | Self::Queued | Self::Started)
    }

    /// Returns `true` for kinds that end tracking of a project.
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Error)
    }
}

impl From<String> for FrameKind {
    fn from(name: String) -> Self {
        match name.as_str() {
            "connected" => Self::Connected,
            "queued" => Self::Queued,
            "started" => Self::Started,
            "progress" => Self::Progress,
            "jobCompleted" => Self::JobCompleted,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "error" => Self::Error,
            _ => Self::Other(name),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// InboundFrame
// ============================================================================

/// One parsed message from the stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundFrame {
    /// Event type.
    #[serde(rename = "type")]
    pub kind: FrameKind,

    /// Routing key. Frames without one cannot be delivered.
    #[serde(default)]
    pub project_id: Option<ProjectId>,

    /// Remote job within the project.
    #[serde(default, deserialize_with = "lenient_job_id")]
    pub job_id: Option<JobId>,

    /// Fractional progress in `0..=1`.
    #[serde(default, deserialize_with = "lenient_number")]
    pub progress: Option<f64>,

    /// Current step.
    #[serde(default, deserialize_with = "lenient_count")]
    pub step: Option<u32>,

    /// Total number of steps.
    #[serde(default, deserialize_with = "lenient_count")]
    pub step_count: Option<u32>,

    /// Where the finished result can be fetched.
    #[serde(default, deserialize_with = "lenient_text")]
    pub result_url: Option<String>,

    /// Failure description.
    #[serde(default, deserialize_with = "lenient_text")]
    pub error: Option<String>,

    /// Free-form message.
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: Option<String>,
}

impl InboundFrame {
    /// Parses a text frame.
    ///
    /// Only `type` and `projectId` are strict. Payload fields with an
    /// unusable value are read as absent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedFrame`] for invalid JSON, a missing
    /// `type` field, or a `projectId` that is not a string.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::malformed_frame(e.to_string()))
    }

    /// Returns the routing key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingProjectId`] when the ID is absent or empty.
    pub fn routing_id(&self) -> Result<&ProjectId> {
        match &self.project_id {
            Some(id) if !id.is_empty() => Ok(id),
            _ => Err(Error::missing_project_id(self.kind.as_str())),
        }
    }

    /// Returns the failure text carried by a `failed`/`error` frame.
    #[must_use]
    pub fn failure_text(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| format!("remote reported '{}'", self.kind))
    }

    /// Extracts the progress fields.
    #[must_use]
    pub fn progress_update(&self, project_id: &ProjectId) -> ProgressUpdate {
        ProgressUpdate {
            project_id: project_id.clone(),
            job_id: self.job_id.clone(),
            progress: self.progress,
            step: self.step,
            step_count: self.step_count,
        }
    }

    /// Extracts the result payload of a `jobCompleted` frame.
    #[must_use]
    pub fn project_result(&self, project_id: &ProjectId) -> ProjectResult {
        ProjectResult {
            project_id: project_id.clone(),
            job_id: self.job_id.clone(),
            result_url: self.result_url.clone(),
            message: self.message.clone(),
        }
    }
}

/// Accepts a string, or any other JSON value rendered as text.
fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

fn lenient_job_id<'de, D>(deserializer: D) -> std::result::Result<Option<JobId>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.map(JobId::new))
}

/// Accepts any JSON number; anything else is absent.
fn lenient_number<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(|v| v.as_f64()))
}

/// Accepts any JSON number holding a whole value in `u32` range, so `20.0`
/// and `1e3` count. Negative, fractional or non-numeric values are absent.
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_number(deserializer)?
        .filter(|n| n.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(n))
        .map(|n| n as u32))
}

// ============================================================================
// ProgressUpdate
// ============================================================================

/// Progress fields forwarded to a
/// [`ProgressObserver`](crate::ProgressObserver).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Project the update belongs to.
    pub project_id: ProjectId,
    /// Job within the project, if reported.
    pub job_id: Option<JobId>,
    /// Fractional progress in `0..=1`.
    pub progress: Option<f64>,
    /// Current step.
    pub step: Option<u32>,
    /// Total number of steps.
    pub step_count: Option<u32>,
}

impl ProgressUpdate {
    /// Completion percentage, derived from `progress` or `step/stepCount`.
    #[must_use]
    pub fn percent(&self) -> Option<u8> {
        let fraction = match (self.progress, self.step, self.step_count) {
            (Some(p), _, _) => p,
            (None, Some(step), Some(count)) if count > 0 => f64::from(step) / f64::from(count),
            _ => return None,
        };
        Some((fraction.clamp(0.0, 1.0) * 100.0).round() as u8)
    }
}

// ============================================================================
// ProjectResult
// ============================================================================

/// Value a successfully resolved project completes with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectResult {
    /// The resolved project.
    pub project_id: ProjectId,
    /// Job that produced the result.
    pub job_id: Option<JobId>,
    /// Where the result can be fetched.
    pub result_url: Option<String>,
    /// Free-form message from the remote end.
    pub message: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
