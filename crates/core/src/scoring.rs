//! Deterministic scoring across question kinds.
//!
//! Nothing here is cached: callers re-score whenever answers or
//! self-evaluations change.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{Answer, Question, QuestionId, QuestionKind, Selection};

//
// ─── SCORE ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Score {
    pub earned: u32,
    pub possible: u32,
    /// `round(earned / possible * 100)`, or 0 when nothing is possible.
    pub percentage: u8,
}

impl Score {
    #[must_use]
    pub fn new(earned: u32, possible: u32) -> Self {
        Self {
            earned,
            possible,
            percentage: percentage(earned, possible),
        }
    }
}

fn percentage(earned: u32, possible: u32) -> u8 {
    if possible == 0 {
        return 0;
    }
    let earned = u64::from(earned.min(possible));
    let possible = u64::from(possible);
    // Integer round-half-up of earned * 100 / possible.
    let rounded = (earned * 200 + possible) / (2 * possible);
    u8::try_from(rounded).unwrap_or(100)
}

//
// ─── GRADING ───────────────────────────────────────────────────────────────────
//

/// Outcome of a single question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Correct,
    Incorrect,
    Unanswered,
    /// The question kind earns no points automatically.
    Ungraded,
}

impl Grade {
    #[must_use]
    pub fn is_correct(self) -> bool {
        self == Grade::Correct
    }
}

/// Grade one question. Free-text questions are correct only when the user
/// declared them so; a missing self-evaluation counts as incorrect.
#[must_use]
pub fn grade(question: &Question, answer: Option<&Answer>, self_evaluation: Option<bool>) -> Grade {
    match question.kind {
        QuestionKind::Choice => grade_choice(question, answer),
        QuestionKind::FreeText => match (answer, self_evaluation) {
            (_, Some(true)) => Grade::Correct,
            (Some(answer), _) if !answer.is_empty() => Grade::Incorrect,
            (_, Some(false)) => Grade::Incorrect,
            _ => Grade::Unanswered,
        },
        QuestionKind::ClinicalCase => Grade::Ungraded,
    }
}

fn grade_choice(question: &Question, answer: Option<&Answer>) -> Grade {
    let Some(answer) = answer.filter(|a| !a.is_empty()) else {
        return Grade::Unanswered;
    };
    if !question.is_answerable() {
        return Grade::Unanswered;
    }

    let correct = question.correct_option_ids();
    let chosen: BTreeSet<_> = match answer {
        Answer::Single(id) => BTreeSet::from([*id]),
        Answer::Multiple(ids) => ids.clone(),
        Answer::Text(_) => return Grade::Incorrect,
    };

    let matches = match question.selection() {
        Some(Selection::Single) => correct.len() == 1 && chosen == correct,
        Some(Selection::Multiple) => chosen == correct,
        None => false,
    };

    if matches {
        Grade::Correct
    } else {
        Grade::Incorrect
    }
}

/// Score a full question set.
#[must_use]
pub fn score(
    questions: &[Question],
    answers: &BTreeMap<QuestionId, Answer>,
    self_evaluation: &BTreeMap<QuestionId, bool>,
) -> Score {
    let mut earned = 0_u32;
    let mut possible = 0_u32;

    for question in questions {
        let points = question.points();
        possible = possible.saturating_add(points);
        let outcome = grade(
            question,
            answers.get(&question.id),
            self_evaluation.get(&question.id).copied(),
        );
        if outcome.is_correct() {
            earned = earned.saturating_add(points);
        }
    }

    Score::new(earned, possible)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
