use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::ids::{OptionId, QuestionId};

/// Shown in place of a free-text question's expected answer when none was authored.
pub const NO_EXPECTED_ANSWER: &str = "No expected answer was defined for this question.";

//
// ─── QUESTION KIND ─────────────────────────────────────────────────────────────
//

/// Declared type of a question, as stored by the backend.
///
/// Single- vs multi-select is not a separate kind: a `Choice` question becomes
/// multi-select when more than one of its options is marked correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionKind {
    #[serde(rename = "qcm")]
    Choice,
    #[serde(rename = "qroc")]
    FreeText,
    #[serde(rename = "cas_clinique")]
    ClinicalCase,
}

impl QuestionKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            QuestionKind::Choice => "QCM",
            QuestionKind::FreeText => "QROC",
            QuestionKind::ClinicalCase => "Clinical case",
        }
    }
}

/// How many options a choice question accepts, derived from its correct options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Single,
    Multiple,
}

//
// ─── OPTIONS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub id: OptionId,
    pub content: String,
    #[serde(default)]
    pub is_correct: bool,
}

impl ChoiceOption {
    #[must_use]
    pub fn new(id: u64, content: impl Into<String>, is_correct: bool) -> Self {
        Self {
            id: OptionId::new(id),
            content: content.into(),
            is_correct,
        }
    }
}

//
// ─── QUESTION ──────────────────────────────────────────────────────────────────
//

/// A quiz question, supplied by the caller and never mutated during a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(default)]
    points: Option<u32>,
    #[serde(default)]
    options: Option<Vec<ChoiceOption>>,
    #[serde(default)]
    expected_answer: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
}

impl Question {
    #[must_use]
    pub fn choice(id: u64, content: impl Into<String>, options: Vec<ChoiceOption>) -> Self {
        Self {
            id: QuestionId::new(id),
            content: content.into(),
            kind: QuestionKind::Choice,
            points: None,
            options: Some(options),
            expected_answer: None,
            explanation: None,
        }
    }

    #[must_use]
    pub fn free_text(
        id: u64,
        content: impl Into<String>,
        expected_answer: Option<String>,
    ) -> Self {
        Self {
            id: QuestionId::new(id),
            content: content.into(),
            kind: QuestionKind::FreeText,
            points: None,
            options: None,
            expected_answer,
            explanation: None,
        }
    }

    #[must_use]
    pub fn clinical_case(id: u64, content: impl Into<String>) -> Self {
        Self {
            id: QuestionId::new(id),
            content: content.into(),
            kind: QuestionKind::ClinicalCase,
            points: None,
            options: None,
            expected_answer: None,
            explanation: None,
        }
    }

    #[must_use]
    pub fn with_points(mut self, points: u32) -> Self {
        self.points = Some(points);
        self
    }

    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Points awarded for a correct answer; absent or zero counts as 1.
    #[must_use]
    pub fn points(&self) -> u32 {
        match self.points {
            Some(0) | None => 1,
            Some(p) => p,
        }
    }

    /// Options in authoring order; empty for non-choice or malformed questions.
    #[must_use]
    pub fn options(&self) -> &[ChoiceOption] {
        self.options.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn option(&self, id: OptionId) -> Option<&ChoiceOption> {
        self.options().iter().find(|o| o.id == id)
    }

    #[must_use]
    pub fn correct_option_ids(&self) -> BTreeSet<OptionId> {
        self.options()
            .iter()
            .filter(|o| o.is_correct)
            .map(|o| o.id)
            .collect()
    }

    /// `None` for non-choice questions.
    #[must_use]
    pub fn selection(&self) -> Option<Selection> {
        if self.kind != QuestionKind::Choice {
            return None;
        }
        let correct = self.options().iter().filter(|o| o.is_correct).count();
        Some(if correct > 1 {
            Selection::Multiple
        } else {
            Selection::Single
        })
    }

    #[must_use]
    pub fn is_multi_select(&self) -> bool {
        self.selection() == Some(Selection::Multiple)
    }

    /// A choice question without options cannot receive an answer.
    #[must_use]
    pub fn is_answerable(&self) -> bool {
        self.kind != QuestionKind::Choice || !self.options().is_empty()
    }

    #[must_use]
    pub fn expected_answer(&self) -> Option<&str> {
        self.expected_answer
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }

    #[must_use]
    pub fn expected_answer_or_placeholder(&self) -> &str {
        self.expected_answer().unwrap_or(NO_EXPECTED_ANSWER)
    }

    #[must_use]
    pub fn explanation(&self) -> Option<&str> {
        self.explanation
            .as_deref()
            .filter(|text| !text.trim().is_empty())
    }
}
