use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::model::ids::OptionId;
use crate::model::question::{Question, QuestionKind, Selection};

/// A recorded answer. Its shape follows the question it answers.
///
/// On the wire the variants are distinguished by JSON type alone: a number is a
/// single option id, an array is a set of option ids, a string is free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Single(OptionId),
    Multiple(BTreeSet<OptionId>),
    Text(String),
}

impl Answer {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Answer::Single(_) => false,
            Answer::Multiple(ids) => ids.is_empty(),
            Answer::Text(text) => text.trim().is_empty(),
        }
    }

    /// Whether the given option is part of this answer.
    #[must_use]
    pub fn selects(&self, option: OptionId) -> bool {
        match self {
            Answer::Single(id) => *id == option,
            Answer::Multiple(ids) => ids.contains(&option),
            Answer::Text(_) => false,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Answer::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Reshape a decoded answer to fit `question`, or `None` when it cannot.
    ///
    /// A lone option id for a multi-select question becomes a one-element set,
    /// and a one-element set for a single-select question becomes that id.
    #[must_use]
    pub fn conform_to(self, question: &Question) -> Option<Answer> {
        match (question.kind, question.selection(), self) {
            (QuestionKind::Choice, _, _) if !question.is_answerable() => None,
            (QuestionKind::Choice, Some(Selection::Single), Answer::Single(id)) => {
                question.option(id).map(|_| Answer::Single(id))
            }
            (QuestionKind::Choice, Some(Selection::Single), Answer::Multiple(ids))
                if ids.len() == 1 =>
            {
                let id = ids.into_iter().next()?;
                question.option(id).map(|_| Answer::Single(id))
            }
            (QuestionKind::Choice, Some(Selection::Multiple), Answer::Single(id)) => question
                .option(id)
                .map(|_| Answer::Multiple(BTreeSet::from([id]))),
            (QuestionKind::Choice, Some(Selection::Multiple), Answer::Multiple(ids)) => {
                if ids.iter().all(|id| question.option(*id).is_some()) {
                    Some(Answer::Multiple(ids))
                } else {
                    None
                }
            }
            (QuestionKind::FreeText | QuestionKind::ClinicalCase, _, Answer::Text(text)) => {
                Some(Answer::Text(text))
            }
            _ => None,
        }
    }
}

/// A single user input against a question.
///
/// `Choose` on a multi-select question toggles the option; everywhere else an
/// input replaces the previous answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerInput {
    Choose(OptionId),
    Text(String),
}
