use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{NoteId, QuestionId, QuizId, UserId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReportError {
    #[error("report description must not be empty")]
    EmptyDescription,
}

/// A user's private note on a question. At most one exists per (user, question).
///
/// Empty content is a valid note; removing a note is always an explicit delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: NoteId,
    pub user_id: UserId,
    pub question_id: QuestionId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Kind tag stored with every report raised from the quiz player.
pub const QUESTION_REPORT_KIND: &str = "question";

/// A problem report raised against a question. Reports are append-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    quiz_id: QuizId,
    question_id: QuestionId,
    description: String,
    submitted_at: DateTime<Utc>,
}

impl Report {
    /// Build a report, trimming the description.
    ///
    /// # Errors
    ///
    /// Returns `ReportError::EmptyDescription` if nothing is left after trimming.
    pub fn new(
        quiz_id: QuizId,
        question_id: QuestionId,
        description: &str,
        submitted_at: DateTime<Utc>,
    ) -> Result<Self, ReportError> {
        let description = description.trim();
        if description.is_empty() {
            return Err(ReportError::EmptyDescription);
        }
        Ok(Self {
            quiz_id,
            question_id,
            description: description.to_owned(),
            submitted_at,
        })
    }

    #[must_use]
    pub fn quiz_id(&self) -> &QuizId {
        &self.quiz_id
    }

    #[must_use]
    pub fn question_id(&self) -> QuestionId {
        self.question_id
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        QUESTION_REPORT_KIND
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn report_trims_description() {
        let report = Report::new(
            QuizId::new("q"),
            QuestionId::new(1),
            "  typo in option B \n",
            fixed_now(),
        )
        .unwrap();
        assert_eq!(report.description(), "typo in option B");
        assert_eq!(report.kind(), "question");
    }

    #[test]
    fn report_rejects_blank_description() {
        let err = Report::new(QuizId::new("q"), QuestionId::new(1), " \t ", fixed_now())
            .unwrap_err();
        assert_eq!(err, ReportError::EmptyDescription);
    }
}
