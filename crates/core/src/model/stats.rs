use chrono::{DateTime, Utc};

use crate::scoring::Score;

/// Per-user totals across completed quizzes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserStats {
    pub quizzes_completed: u32,
    pub total_points: u64,
    /// Mean of the completed quizzes' percentages.
    pub average_score: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserStats {
    /// Fold one more completed quiz into the totals.
    pub fn record(&mut self, score: Score, at: DateTime<Utc>) {
        let previous = f64::from(self.quizzes_completed);
        self.quizzes_completed = self.quizzes_completed.saturating_add(1);
        self.total_points = self.total_points.saturating_add(u64::from(score.earned));
        self.average_score = (self.average_score * previous + f64::from(score.percentage))
            / f64::from(self.quizzes_completed);
        self.updated_at = Some(at);
    }
}
