mod annotation;
mod answer;
mod ids;
mod progress;
mod question;
mod stats;

pub use ids::{NoteId, OptionId, ParseIdError, QuestionId, QuizId, UserId};

pub use annotation::{Note, QUESTION_REPORT_KIND, Report, ReportError};
pub use answer::{Answer, AnswerInput};
pub use progress::{PersistedProgress, ProgressSource, pick_latest};
pub use question::{ChoiceOption, NO_EXPECTED_ANSWER, Question, QuestionKind, Selection};
pub use stats::UserStats;
