use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::answer::Answer;
use crate::model::ids::QuestionId;

/// Serialized quiz-taking state, written to both the on-device cache and the
/// remote store.
///
/// `updated_at` is stamped at write time and is only ever used to pick the
/// most recent copy when a session resumes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PersistedProgress {
    #[serde(rename = "currentIndex", default)]
    pub current_index: usize,
    #[serde(default)]
    pub answers: BTreeMap<QuestionId, Answer>,
    #[serde(rename = "elapsedTime", default)]
    pub elapsed_seconds: u64,
    #[serde(rename = "submittedQROC", default)]
    pub submitted_free_text: BTreeMap<QuestionId, bool>,
    #[serde(rename = "qrocSelfEval", default)]
    pub self_evaluation: BTreeMap<QuestionId, bool>,
    #[serde(rename = "isCompleted", default)]
    pub completed: bool,
    #[serde(rename = "updated_at", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersistedProgress {
    /// Index 0, no answers, no elapsed time.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Status label recorded alongside the remote row.
    #[must_use]
    pub fn status(&self) -> &'static str {
        if self.completed {
            "completed"
        } else {
            "in_progress"
        }
    }
}

/// Which storage tier a loaded snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressSource {
    /// Supplied by the caller, e.g. reopening an attempt from a list.
    Provided,
    Remote,
    Local,
    /// Nothing stored anywhere; a fresh attempt.
    Fresh,
}

/// Pick the most recently written of two optional snapshots.
///
/// Equal timestamps resolve to the remote copy. A snapshot without a
/// timestamp is older than any stamped one.
#[must_use]
pub fn pick_latest(
    remote: Option<PersistedProgress>,
    local: Option<PersistedProgress>,
) -> (ProgressSource, PersistedProgress) {
    match (remote, local) {
        (Some(remote), Some(local)) => {
            if local.updated_at > remote.updated_at {
                (ProgressSource::Local, local)
            } else {
                (ProgressSource::Remote, remote)
            }
        }
        (Some(remote), None) => (ProgressSource::Remote, remote),
        (None, Some(local)) => (ProgressSource::Local, local),
        (None, None) => (ProgressSource::Fresh, PersistedProgress::empty()),
    }
}
