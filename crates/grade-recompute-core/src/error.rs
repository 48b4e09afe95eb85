//! Error taxonomy for the recalculation pipeline.
//!
//! A disabled feature flag and content deleted after an event was queued
//! are normal outcomes ([`RecalcOutcome`](crate::pipeline::RecalcOutcome)),
//! never errors.

use thiserror::Error;

use crate::keys::{CourseKey, LearnerId, UsageKey};

/// Errors surfaced to the task runner by a recalculation run.
#[derive(Debug, Error)]
pub enum RecalcError {
    /// A required task argument was absent.
    #[error("missing required task argument: {0}")]
    MissingField(&'static str),

    /// A task argument was present but had the wrong shape.
    #[error("invalid task argument '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A course or usage key could not be parsed.
    #[error("invalid {kind} key: '{value}'")]
    InvalidKey { kind: &'static str, value: String },

    /// The course no longer exists in durable storage.
    #[error("course not found: {0}")]
    CourseNotFound(CourseKey),

    /// The learner referenced by the event does not exist.
    #[error("learner not found: {0}")]
    LearnerNotFound(LearnerId),

    /// A course outline could not be assembled into a structure.
    #[error("invalid course structure: {0}")]
    InvalidStructure(String),

    /// A collaborator (provider, directory, score store) failed.
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),

    /// One or more subsection grades could not be written. Writes listed in
    /// `persisted` are committed and stay committed.
    #[error("failed to persist {} subsection grade(s)", failed.len())]
    PersistFailed {
        persisted: Vec<UsageKey>,
        failed: Vec<(UsageKey, String)>,
    },
}

impl RecalcError {
    /// Whether the runner may reasonably retry the task later.
    ///
    /// Malformed input never succeeds on retry; storage hiccups might.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecalcError::Collaborator(_)
                | RecalcError::PersistFailed { .. }
                | RecalcError::CourseNotFound(_)
        )
    }
}
