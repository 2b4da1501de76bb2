use std::collections::BTreeSet;
use std::sync::Arc;

use quiz_core::Clock;
use quiz_core::model::{Note, NoteId, QuestionId, QuizId, Report, UserId};
use storage::repository::{NoteRepository, ReportRepository, SavedQuestionRepository};
use tracing::{info, warn};

use crate::error::AnnotationError;

/// A user's private per-question notes.
///
/// Failures are returned so the caller can show them next to the editor;
/// nothing is retried.
#[derive(Clone)]
pub struct NoteService {
    clock: Clock,
    user_id: UserId,
    notes: Arc<dyn NoteRepository>,
}

impl NoteService {
    #[must_use]
    pub fn new(clock: Clock, user_id: UserId, notes: Arc<dyn NoteRepository>) -> Self {
        Self {
            clock,
            user_id,
            notes,
        }
    }

    /// # Errors
    ///
    /// Returns `AnnotationError::Storage` if the backend cannot be reached.
    pub async fn note_for(&self, question_id: QuestionId) -> Result<Option<Note>, AnnotationError> {
        Ok(self.notes.get_note(&self.user_id, question_id).await?)
    }

    /// Create or replace the note on a question. Empty content is kept as an
    /// empty note.
    ///
    /// # Errors
    ///
    /// Returns `AnnotationError::Storage` if the backend rejects the write.
    pub async fn save_note(
        &self,
        question_id: QuestionId,
        content: &str,
    ) -> Result<Note, AnnotationError> {
        let note = self
            .notes
            .upsert_note(&self.user_id, question_id, content, self.clock.now())
            .await
            .inspect_err(|err| {
                warn!(question = %question_id, error = %err, "note save failed");
            })?;
        Ok(note)
    }

    /// # Errors
    ///
    /// Returns `AnnotationError::Storage` if the note does not exist or the
    /// backend cannot be reached.
    pub async fn delete_note(&self, note_id: NoteId) -> Result<(), AnnotationError> {
        self.notes
            .delete_note(&self.user_id, note_id)
            .await
            .inspect_err(|err| {
                warn!(note = %note_id, error = %err, "note delete failed");
            })?;
        Ok(())
    }

    /// All of the user's notes, newest first.
    ///
    /// # Errors
    ///
    /// Returns `AnnotationError::Storage` if the backend cannot be reached.
    pub async fn list_notes(&self) -> Result<Vec<Note>, AnnotationError> {
        Ok(self.notes.list_notes(&self.user_id).await?)
    }
}

/// Problem reports raised against questions. Append-only.
#[derive(Clone)]
pub struct ReportService {
    clock: Clock,
    user_id: UserId,
    reports: Arc<dyn ReportRepository>,
}

impl ReportService {
    #[must_use]
    pub fn new(clock: Clock, user_id: UserId, reports: Arc<dyn ReportRepository>) -> Self {
        Self {
            clock,
            user_id,
            reports,
        }
    }

    /// # Errors
    ///
    /// Returns `AnnotationError::Report` for a blank description and
    /// `AnnotationError::Storage` if the backend rejects the report.
    pub async fn submit(
        &self,
        quiz_id: QuizId,
        question_id: QuestionId,
        description: &str,
    ) -> Result<Report, AnnotationError> {
        let report = Report::new(quiz_id, question_id, description, self.clock.now())?;
        self.reports
            .append_report(&self.user_id, &report)
            .await
            .inspect_err(|err| {
                warn!(question = %question_id, error = %err, "report submission failed");
            })?;
        info!(quiz = %report.quiz_id(), question = %question_id, "report submitted");
        Ok(report)
    }
}

/// Which questions of a quiz the user already filed into a playlist.
#[derive(Clone)]
pub struct SavedQuestionService {
    user_id: UserId,
    saved: Arc<dyn SavedQuestionRepository>,
}

impl SavedQuestionService {
    #[must_use]
    pub fn new(user_id: UserId, saved: Arc<dyn SavedQuestionRepository>) -> Self {
        Self { user_id, saved }
    }

    /// The saved subset of `question_ids`. A failed lookup only costs the
    /// markers, so it is logged and reads as nothing saved.
    pub async fn saved_among(&self, question_ids: &[QuestionId]) -> BTreeSet<QuestionId> {
        self.saved
            .saved_question_ids(&self.user_id, question_ids)
            .await
            .unwrap_or_else(|err| {
                warn!(error = %err, "saved question lookup failed");
                BTreeSet::new()
            })
    }
}
