//! In-memory quiz attempt and its phase state machine.
//!
//! `Answering -> Results -> Correction`, with `Correction -> Results` as a
//! back-transition and `Results -> Answering` only through `restart`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;

use crate::model::{
    Answer, AnswerInput, ChoiceOption, PersistedProgress, Question, QuestionId, QuestionKind,
    QuizId, Selection,
};
use crate::scoring::{self, Grade, Score};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    #[error("quiz has no questions")]
    Empty,

    #[error("operation requires the {expected} phase, session is in {actual}")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("unknown question: {0}")]
    UnknownQuestion(QuestionId),

    #[error("option {option} does not belong to question {question}")]
    UnknownOption {
        question: QuestionId,
        option: crate::model::OptionId,
    },

    #[error("question {0} has no options to choose from")]
    Unanswerable(QuestionId),

    #[error("answer kind does not match question {0}")]
    KindMismatch(QuestionId),

    #[error("question {0} is not a free-text question")]
    NotFreeText(QuestionId),

    #[error("free-text answer for question {0} is already submitted")]
    AlreadySubmitted(QuestionId),

    #[error("free-text answer for question {0} is empty")]
    EmptyAnswer(QuestionId),

    #[error("free-text answer for question {0} has not been submitted")]
    NotSubmitted(QuestionId),

    #[error("restart is not available in challenge mode")]
    RestartDisallowed,
}

//
// ─── PHASE & MODE ──────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Answering,
    Results,
    Correction,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Answering => "answering",
            Phase::Results => "results",
            Phase::Correction => "correction",
        };
        f.write_str(name)
    }
}

/// How the quiz was opened. Challenge attempts are single-shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuizMode {
    #[default]
    Practice,
    Playlist,
    Challenge,
}

impl QuizMode {
    #[must_use]
    pub fn allows_restart(self) -> bool {
        self != QuizMode::Challenge
    }
}

//
// ─── CORRECTION VIEW ───────────────────────────────────────────────────────────
//

/// Per-question correctness shown during correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Choice { correct: bool },
    /// Free text: whatever the user declared, if anything.
    SelfEvaluated(Option<bool>),
    NotGraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionMark<'a> {
    pub option: &'a ChoiceOption,
    pub selected: bool,
    pub correct: bool,
}

/// Read-only replay of one question with the user's recorded answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectionEntry<'a> {
    pub index: usize,
    pub question: &'a Question,
    pub answer: Option<&'a Answer>,
    pub verdict: Verdict,
    pub options: Vec<OptionMark<'a>>,
    pub expected_answer: &'a str,
    /// Present only while the explanation is toggled open.
    pub explanation: Option<&'a str>,
    pub has_explanation: bool,
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One attempt at a fixed question set.
///
/// `revision` increases on every change to persisted fields, so an observer
/// can tell whether a call needs to be written out.
pub struct QuizSession {
    quiz_id: QuizId,
    mode: QuizMode,
    questions: Vec<Question>,
    current_index: usize,
    answers: BTreeMap<QuestionId, Answer>,
    elapsed_seconds: u64,
    submitted_free_text: BTreeSet<QuestionId>,
    self_evaluation: BTreeMap<QuestionId, bool>,
    phase: Phase,
    revealed_explanations: BTreeSet<QuestionId>,
    revision: u64,
}

impl QuizSession {
    #[must_use]
    pub fn new(quiz_id: QuizId, mode: QuizMode, questions: Vec<Question>) -> Self {
        Self {
            quiz_id,
            mode,
            questions,
            current_index: 0,
            answers: BTreeMap::new(),
            elapsed_seconds: 0,
            submitted_free_text: BTreeSet::new(),
            self_evaluation: BTreeMap::new(),
            phase: Phase::Answering,
            revealed_explanations: BTreeSet::new(),
            revision: 0,
        }
    }

    /// Rebuild a session from a stored snapshot.
    ///
    /// Answers whose shape does not fit their question are dropped and their
    /// ids returned. A completed snapshot reopens in `Results`.
    #[must_use]
    pub fn restore(
        quiz_id: QuizId,
        mode: QuizMode,
        questions: Vec<Question>,
        progress: PersistedProgress,
    ) -> (Self, Vec<QuestionId>) {
        let mut session = Self::new(quiz_id, mode, questions);
        let mut discarded = Vec::new();

        for (question_id, answer) in progress.answers {
            match session.question(question_id) {
                Some(question) => match answer.conform_to(question) {
                    Some(answer) => {
                        session.answers.insert(question_id, answer);
                    }
                    None => discarded.push(question_id),
                },
                None => {
                    session.answers.insert(question_id, answer);
                }
            }
        }

        let is_free_text = |session: &Self, id: QuestionId| {
            session
                .question(id)
                .is_some_and(|q| q.kind == QuestionKind::FreeText)
        };
        session.submitted_free_text = progress
            .submitted_free_text
            .into_iter()
            .filter(|(id, submitted)| *submitted && is_free_text(&session, *id))
            .map(|(id, _)| id)
            .collect();
        session.self_evaluation = progress
            .self_evaluation
            .into_iter()
            .filter(|(id, _)| is_free_text(&session, *id))
            .collect();

        session.current_index = progress
            .current_index
            .min(session.questions.len().saturating_sub(1));
        session.elapsed_seconds = progress.elapsed_seconds;
        if progress.completed && !session.questions.is_empty() {
            session.phase = Phase::Results;
        }

        (session, discarded)
    }

    /// Snapshot of the persisted fields, not yet stamped.
    #[must_use]
    pub fn to_progress(&self) -> PersistedProgress {
        PersistedProgress {
            current_index: self.current_index,
            answers: self.answers.clone(),
            elapsed_seconds: self.elapsed_seconds,
            submitted_free_text: self
                .submitted_free_text
                .iter()
                .map(|id| (*id, true))
                .collect(),
            self_evaluation: self.self_evaluation.clone(),
            completed: self.phase != Phase::Answering,
            updated_at: None,
        }
    }

    // ─── accessors ────────────────────────────────────────────────────────────

    #[must_use]
    pub fn quiz_id(&self) -> &QuizId {
        &self.quiz_id
    }

    #[must_use]
    pub fn mode(&self) -> QuizMode {
        self.mode
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// A quiz without questions only offers exit.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    #[must_use]
    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == id)
    }

    #[must_use]
    pub fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    /// One-based position and total, e.g. `(2, 10)` for "Question 2 / 10".
    #[must_use]
    pub fn position(&self) -> (usize, usize) {
        if self.questions.is_empty() {
            return (0, 0);
        }
        (self.current_index + 1, self.questions.len())
    }

    #[must_use]
    pub fn is_last_question(&self) -> bool {
        !self.questions.is_empty() && self.current_index + 1 == self.questions.len()
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, Answer> {
        &self.answers
    }

    #[must_use]
    pub fn answer(&self, id: QuestionId) -> Option<&Answer> {
        self.answers.get(&id)
    }

    /// Number of questions with a recorded answer.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }

    #[must_use]
    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    #[must_use]
    pub fn is_submitted(&self, id: QuestionId) -> bool {
        self.submitted_free_text.contains(&id)
    }

    #[must_use]
    pub fn self_evaluation(&self, id: QuestionId) -> Option<bool> {
        self.self_evaluation.get(&id).copied()
    }

    /// Live score from the current answers and self-evaluations.
    #[must_use]
    pub fn score(&self) -> Score {
        scoring::score(&self.questions, &self.answers, &self.self_evaluation)
    }

    // ─── answering ────────────────────────────────────────────────────────────

    /// Move to the next question; a no-op on the last one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `Answering`.
    pub fn next(&mut self) -> Result<(), SessionError> {
        self.require(Phase::Answering)?;
        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            self.touch();
        }
        Ok(())
    }

    /// Move to the previous question; a no-op on the first one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `Answering`.
    pub fn previous(&mut self) -> Result<(), SessionError> {
        self.require(Phase::Answering)?;
        if self.current_index > 0 {
            self.current_index -= 1;
            self.touch();
        }
        Ok(())
    }

    /// Record an input for a question.
    ///
    /// Choosing an option on a multi-select question toggles it; every other
    /// input replaces the previous answer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` when the phase is wrong, the question or option
    /// is unknown, the input does not fit the question, or a free-text answer
    /// is already locked for self-evaluation.
    pub fn set_answer(&mut self, id: QuestionId, input: AnswerInput) -> Result<(), SessionError> {
        self.require(Phase::Answering)?;
        let question = self.question(id).ok_or(SessionError::UnknownQuestion(id))?;
        if !question.is_answerable() {
            return Err(SessionError::Unanswerable(id));
        }

        let answer = match (question.kind, question.selection(), input) {
            (QuestionKind::Choice, Some(selection), AnswerInput::Choose(option)) => {
                if question.option(option).is_none() {
                    return Err(SessionError::UnknownOption {
                        question: id,
                        option,
                    });
                }
                match selection {
                    Selection::Single => Answer::Single(option),
                    Selection::Multiple => {
                        let mut chosen = match self.answers.remove(&id) {
                            Some(Answer::Multiple(ids)) => ids,
                            Some(Answer::Single(single)) => BTreeSet::from([single]),
                            _ => BTreeSet::new(),
                        };
                        if !chosen.remove(&option) {
                            chosen.insert(option);
                        }
                        Answer::Multiple(chosen)
                    }
                }
            }
            (QuestionKind::FreeText, _, AnswerInput::Text(text)) => {
                if self.submitted_free_text.contains(&id) {
                    return Err(SessionError::AlreadySubmitted(id));
                }
                Answer::Text(text)
            }
            (QuestionKind::ClinicalCase, _, AnswerInput::Text(text)) => Answer::Text(text),
            _ => return Err(SessionError::KindMismatch(id)),
        };

        self.answers.insert(id, answer);
        self.touch();
        Ok(())
    }

    /// Lock a free-text answer and open self-evaluation for it.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` if the question is not free text, was already
    /// submitted, or its answer is blank.
    pub fn submit_free_text(&mut self, id: QuestionId) -> Result<(), SessionError> {
        self.require(Phase::Answering)?;
        let question = self.question(id).ok_or(SessionError::UnknownQuestion(id))?;
        if question.kind != QuestionKind::FreeText {
            return Err(SessionError::NotFreeText(id));
        }
        if self.submitted_free_text.contains(&id) {
            return Err(SessionError::AlreadySubmitted(id));
        }
        let has_text = self
            .answers
            .get(&id)
            .and_then(Answer::as_text)
            .is_some_and(|text| !text.trim().is_empty());
        if !has_text {
            return Err(SessionError::EmptyAnswer(id));
        }

        self.submitted_free_text.insert(id);
        self.touch();
        Ok(())
    }

    /// Declare a submitted free-text answer right or wrong. Can be changed
    /// until the quiz is finished.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotSubmitted` unless the answer was submitted first.
    pub fn self_evaluate(&mut self, id: QuestionId, correct: bool) -> Result<(), SessionError> {
        self.require(Phase::Answering)?;
        if self.question(id).is_none() {
            return Err(SessionError::UnknownQuestion(id));
        }
        if !self.submitted_free_text.contains(&id) {
            return Err(SessionError::NotSubmitted(id));
        }
        if self.self_evaluation.insert(id, correct) != Some(correct) {
            self.touch();
        }
        Ok(())
    }

    /// Advance the elapsed-time counter by one second.
    ///
    /// Returns `false` (and counts nothing) outside `Answering` or for an
    /// empty quiz.
    pub fn tick(&mut self) -> bool {
        if self.phase != Phase::Answering || self.questions.is_empty() {
            return false;
        }
        self.elapsed_seconds = self.elapsed_seconds.saturating_add(1);
        self.touch();
        true
    }

    /// Submit the attempt from any question and show results.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Empty` for a quiz without questions and
    /// `SessionError::WrongPhase` outside `Answering`.
    pub fn finish(&mut self) -> Result<Score, SessionError> {
        if self.questions.is_empty() {
            return Err(SessionError::Empty);
        }
        self.require(Phase::Answering)?;
        self.phase = Phase::Results;
        Ok(self.score())
    }

    // ─── results & correction ─────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `Results`.
    pub fn view_correction(&mut self) -> Result<(), SessionError> {
        self.require(Phase::Results)?;
        self.phase = Phase::Correction;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `Correction`.
    pub fn back_to_results(&mut self) -> Result<(), SessionError> {
        self.require(Phase::Correction)?;
        self.phase = Phase::Results;
        Ok(())
    }

    /// Discard the attempt and start over at the first question.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::RestartDisallowed` in challenge mode and
    /// `SessionError::WrongPhase` outside `Results`.
    pub fn restart(&mut self) -> Result<(), SessionError> {
        if !self.mode.allows_restart() {
            return Err(SessionError::RestartDisallowed);
        }
        self.require(Phase::Results)?;

        self.current_index = 0;
        self.answers.clear();
        self.elapsed_seconds = 0;
        self.submitted_free_text.clear();
        self.self_evaluation.clear();
        self.revealed_explanations.clear();
        self.phase = Phase::Answering;
        Ok(())
    }

    /// Show or hide a question's explanation. Returns the new visibility.
    ///
    /// # Errors
    ///
    /// Returns `SessionError` outside `Correction` or for an unknown question.
    pub fn toggle_explanation(&mut self, id: QuestionId) -> Result<bool, SessionError> {
        self.require(Phase::Correction)?;
        if self.question(id).is_none() {
            return Err(SessionError::UnknownQuestion(id));
        }
        if self.revealed_explanations.remove(&id) {
            Ok(false)
        } else {
            self.revealed_explanations.insert(id);
            Ok(true)
        }
    }

    /// Replay every question with its recorded answer.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::WrongPhase` outside `Correction`.
    pub fn correction(&self) -> Result<Vec<CorrectionEntry<'_>>, SessionError> {
        self.require(Phase::Correction)?;
        Ok(self
            .questions
            .iter()
            .enumerate()
            .map(|(index, question)| self.correction_entry(index, question))
            .collect())
    }

    fn correction_entry<'a>(&'a self, index: usize, question: &'a Question) -> CorrectionEntry<'a> {
        let answer = self.answers.get(&question.id);
        let self_evaluation = self.self_evaluation.get(&question.id).copied();
        let verdict = match question.kind {
            QuestionKind::Choice => Verdict::Choice {
                correct: scoring::grade(question, answer, None) == Grade::Correct,
            },
            QuestionKind::FreeText => Verdict::SelfEvaluated(self_evaluation),
            QuestionKind::ClinicalCase => Verdict::NotGraded,
        };
        let options = question
            .options()
            .iter()
            .map(|option| OptionMark {
                option,
                selected: answer.is_some_and(|a| a.selects(option.id)),
                correct: option.is_correct,
            })
            .collect();

        CorrectionEntry {
            index,
            question,
            answer,
            verdict,
            options,
            expected_answer: question.expected_answer_or_placeholder(),
            explanation: question
                .explanation()
                .filter(|_| self.revealed_explanations.contains(&question.id)),
            has_explanation: question.explanation().is_some(),
        }
    }

    // ─── internals ────────────────────────────────────────────────────────────

    fn require(&self, expected: Phase) -> Result<(), SessionError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(SessionError::WrongPhase {
                expected,
                actual: self.phase,
            })
        }
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

impl fmt::Debug for QuizSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuizSession")
            .field("quiz_id", &self.quiz_id)
            .field("mode", &self.mode)
            .field("questions_len", &self.questions.len())
            .field("current_index", &self.current_index)
            .field("answers_len", &self.answers.len())
            .field("elapsed_seconds", &self.elapsed_seconds)
            .field("phase", &self.phase)
            .field("revision", &self.revision)
            .finish_non_exhaustive()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OptionId;

    fn questions() -> Vec<Question> {
        vec![
            Question::choice(
                1,
                "Pick one",
                vec![ChoiceOption::new(5, "a", true), ChoiceOption::new(6, "b", false)],
            )
            .with_explanation("Because a."),
            Question::choice(
                2,
                "Pick two",
                vec![
                    ChoiceOption::new(7, "a", true),
                    ChoiceOption::new(8, "b", true),
                    ChoiceOption::new(9, "c", false),
                ],
            ),
            Question::free_text(3, "Capital of France?", Some("Paris".into())),
        ]
    }

    fn session() -> QuizSession {
        QuizSession::new(QuizId::new("quiz-1"), QuizMode::Practice, questions())
    }

    fn q(id: u64) -> QuestionId {
        QuestionId::new(id)
    }

    fn choose(id: u64) -> AnswerInput {
        AnswerInput::Choose(OptionId::new(id))
    }

    #[test]
    fn navigation_is_bounded_and_edges_are_noops() {
        let mut s = session();
        s.previous().unwrap();
        assert_eq!(s.current_index(), 0);
        assert_eq!(s.revision(), 0);

        s.next().unwrap();
        s.next().unwrap();
        s.next().unwrap();
        assert_eq!(s.current_index(), 2);
        assert!(s.is_last_question());
        assert_eq!(s.position(), (3, 3));
        assert_eq!(s.revision(), 2);
    }

    #[test]
    fn single_select_replaces_previous_choice() {
        let mut s = session();
        s.set_answer(q(1), choose(6)).unwrap();
        s.set_answer(q(1), choose(5)).unwrap();
        assert_eq!(s.answer(q(1)), Some(&Answer::Single(OptionId::new(5))));
    }

    #[test]
    fn multi_select_toggles_membership() {
        let mut s = session();
        s.set_answer(q(2), choose(7)).unwrap();
        s.set_answer(q(2), choose(8)).unwrap();
        s.set_answer(q(2), choose(9)).unwrap();
        s.set_answer(q(2), choose(9)).unwrap();
        assert_eq!(
            s.answer(q(2)),
            Some(&Answer::Multiple(BTreeSet::from([
                OptionId::new(7),
                OptionId::new(8)
            ])))
        );
    }

    #[test]
    fn deselecting_everything_keeps_an_empty_answer() {
        let mut s = session();
        s.set_answer(q(2), choose(7)).unwrap();
        s.set_answer(q(2), choose(7)).unwrap();
        assert_eq!(s.answer(q(2)), Some(&Answer::Multiple(BTreeSet::new())));
        assert_eq!(s.answered_count(), 1);
    }

    #[test]
    fn rejects_foreign_option_and_wrong_input_kind() {
        let mut s = session();
        assert!(matches!(
            s.set_answer(q(1), choose(99)),
            Err(SessionError::UnknownOption { .. })
        ));
        assert_eq!(
            s.set_answer(q(1), AnswerInput::Text("a".into())),
            Err(SessionError::KindMismatch(q(1)))
        );
        assert_eq!(
            s.set_answer(q(42), choose(5)),
            Err(SessionError::UnknownQuestion(q(42)))
        );
    }

    #[test]
    fn choice_without_options_is_unanswerable() {
        let mut s = QuizSession::new(
            QuizId::new("broken"),
            QuizMode::Practice,
            vec![Question::choice(1, "No options", Vec::new())],
        );
        assert_eq!(
            s.set_answer(q(1), choose(1)),
            Err(SessionError::Unanswerable(q(1)))
        );
    }

    #[test]
    fn free_text_submit_requires_text_and_happens_once() {
        let mut s = session();
        assert_eq!(s.submit_free_text(q(3)), Err(SessionError::EmptyAnswer(q(3))));

        s.set_answer(q(3), AnswerInput::Text("   ".into())).unwrap();
        assert_eq!(s.submit_free_text(q(3)), Err(SessionError::EmptyAnswer(q(3))));

        s.set_answer(q(3), AnswerInput::Text("Paris".into())).unwrap();
        s.submit_free_text(q(3)).unwrap();
        assert!(s.is_submitted(q(3)));
        assert_eq!(
            s.submit_free_text(q(3)),
            Err(SessionError::AlreadySubmitted(q(3)))
        );
        assert_eq!(
            s.set_answer(q(3), AnswerInput::Text("Lyon".into())),
            Err(SessionError::AlreadySubmitted(q(3)))
        );
        assert_eq!(s.submit_free_text(q(1)), Err(SessionError::NotFreeText(q(1))));
    }

    #[test]
    fn self_evaluation_requires_submission() {
        let mut s = session();
        assert_eq!(s.self_evaluate(q(3), true), Err(SessionError::NotSubmitted(q(3))));
        s.set_answer(q(3), AnswerInput::Text("Paris".into())).unwrap();
        s.submit_free_text(q(3)).unwrap();
        s.self_evaluate(q(3), false).unwrap();
        s.self_evaluate(q(3), true).unwrap();
        assert_eq!(s.self_evaluation(q(3)), Some(true));
    }

    #[test]
    fn full_attempt_scores_everything() {
        let mut s = session();
        s.set_answer(q(1), choose(5)).unwrap();
        s.set_answer(q(2), choose(7)).unwrap();
        s.set_answer(q(2), choose(8)).unwrap();
        s.set_answer(q(3), AnswerInput::Text("Paris".into())).unwrap();
        s.submit_free_text(q(3)).unwrap();
        s.self_evaluate(q(3), true).unwrap();

        let score = s.finish().unwrap();
        assert_eq!(score, Score { earned: 3, possible: 3, percentage: 100 });
        assert_eq!(s.phase(), Phase::Results);
    }

    #[test]
    fn finish_is_allowed_from_any_question_and_freezes_input() {
        let mut s = session();
        s.set_answer(q(1), choose(5)).unwrap();
        s.finish().unwrap();

        let revision = s.revision();
        assert!(matches!(s.next(), Err(SessionError::WrongPhase { .. })));
        assert!(matches!(
            s.set_answer(q(1), choose(6)),
            Err(SessionError::WrongPhase { .. })
        ));
        assert!(!s.tick());
        assert_eq!(s.revision(), revision);
    }

    #[test]
    fn timer_counts_only_while_answering_and_resumes() {
        let mut s = session();
        assert!(s.tick());
        assert!(s.tick());
        s.finish().unwrap();
        assert!(!s.tick());
        s.view_correction().unwrap();
        assert!(!s.tick());
        assert_eq!(s.elapsed_seconds(), 2);

        let mut progress = s.to_progress();
        progress.completed = false;
        let (mut resumed, _) =
            QuizSession::restore(QuizId::new("quiz-1"), QuizMode::Practice, questions(), progress);
        assert!(resumed.tick());
        assert_eq!(resumed.elapsed_seconds(), 3);
    }

    #[test]
    fn correction_round_trip_between_phases() {
        let mut s = session();
        assert!(matches!(s.correction(), Err(SessionError::WrongPhase { .. })));
        s.finish().unwrap();
        s.view_correction().unwrap();
        assert_eq!(s.phase(), Phase::Correction);
        s.back_to_results().unwrap();
        assert_eq!(s.phase(), Phase::Results);
        s.view_correction().unwrap();
        assert!(matches!(s.restart(), Err(SessionError::WrongPhase { .. })));
    }

    #[test]
    fn correction_marks_choices_and_self_evaluation() {
        let mut s = session();
        s.set_answer(q(1), choose(6)).unwrap();
        s.set_answer(q(2), choose(7)).unwrap();
        s.set_answer(q(2), choose(8)).unwrap();
        s.set_answer(q(3), AnswerInput::Text("Paris".into())).unwrap();
        s.submit_free_text(q(3)).unwrap();
        s.self_evaluate(q(3), true).unwrap();
        s.finish().unwrap();
        s.view_correction().unwrap();

        let entries = s.correction().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].verdict, Verdict::Choice { correct: false });
        assert!(entries[0].options[1].selected);
        assert!(entries[0].options[0].correct);
        assert!(entries[0].has_explanation);
        assert_eq!(entries[0].explanation, None);
        assert_eq!(entries[1].verdict, Verdict::Choice { correct: true });
        assert_eq!(entries[2].verdict, Verdict::SelfEvaluated(Some(true)));
        assert_eq!(entries[2].expected_answer, "Paris");
    }

    #[test]
    fn explanation_toggle_is_reversible() {
        let mut s = session();
        s.finish().unwrap();
        s.view_correction().unwrap();
        assert!(s.toggle_explanation(q(1)).unwrap());
        assert_eq!(s.correction().unwrap()[0].explanation, Some("Because a."));
        assert!(!s.toggle_explanation(q(1)).unwrap());
        assert_eq!(s.correction().unwrap()[0].explanation, None);
    }

    #[test]
    fn restart_discards_attempt() {
        let mut s = session();
        s.next().unwrap();
        s.set_answer(q(1), choose(5)).unwrap();
        s.tick();
        s.finish().unwrap();
        s.restart().unwrap();

        assert_eq!(s.phase(), Phase::Answering);
        assert_eq!(s.current_index(), 0);
        assert!(s.answers().is_empty());
        assert_eq!(s.elapsed_seconds(), 0);
        assert_eq!(s.to_progress(), PersistedProgress::empty());
    }

    #[test]
    fn challenge_mode_is_single_shot() {
        let mut s = QuizSession::new(QuizId::new("c"), QuizMode::Challenge, questions());
        s.finish().unwrap();
        assert_eq!(s.restart(), Err(SessionError::RestartDisallowed));
    }

    #[test]
    fn empty_quiz_has_no_score_or_timer() {
        let mut s = QuizSession::new(QuizId::new("e"), QuizMode::Practice, Vec::new());
        assert!(s.is_empty());
        assert!(!s.tick());
        assert_eq!(s.finish(), Err(SessionError::Empty));
        s.next().unwrap();
        assert_eq!(s.position(), (0, 0));
        assert!(s.current_question().is_none());
    }

    #[test]
    fn restore_conforms_answers_and_reopens_completed_attempts() {
        let mut progress = PersistedProgress::empty();
        progress.current_index = 7;
        progress.elapsed_seconds = 30;
        progress
            .answers
            .insert(q(1), Answer::Single(OptionId::new(5)));
        progress
            .answers
            .insert(q(2), Answer::Single(OptionId::new(7)));
        progress.answers.insert(q(3), Answer::Single(OptionId::new(1)));
        progress.submitted_free_text.insert(q(1), true);
        progress.completed = true;

        let (s, discarded) =
            QuizSession::restore(QuizId::new("quiz-1"), QuizMode::Practice, questions(), progress);

        assert_eq!(discarded, vec![q(3)]);
        assert_eq!(
            s.answer(q(2)),
            Some(&Answer::Multiple(BTreeSet::from([OptionId::new(7)])))
        );
        assert!(!s.is_submitted(q(1)));
        assert_eq!(s.current_index(), 2);
        assert_eq!(s.elapsed_seconds(), 30);
        assert_eq!(s.phase(), Phase::Results);
    }

    #[test]
    fn progress_snapshot_matches_session_state() {
        let mut s = session();
        s.next().unwrap();
        s.set_answer(q(3), AnswerInput::Text("Paris".into())).unwrap();
        s.submit_free_text(q(3)).unwrap();
        s.self_evaluate(q(3), true).unwrap();

        let progress = s.to_progress();
        assert_eq!(progress.current_index, 1);
        assert_eq!(progress.submitted_free_text.get(&q(3)), Some(&true));
        assert_eq!(progress.self_evaluation.get(&q(3)), Some(&true));
        assert!(!progress.completed);
        assert_eq!(progress.updated_at, None);
    }
}
