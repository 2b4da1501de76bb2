use std::sync::Arc;

use quiz_core::model::{UserId, UserStats};
use quiz_core::{Clock, Score};
use storage::repository::{StorageError, UserStatsRepository};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::player::CompletionHandler;

/// Accumulates per-user totals as quizzes are completed.
#[derive(Clone)]
pub struct UserStatsService {
    clock: Clock,
    user_id: UserId,
    stats: Arc<dyn UserStatsRepository>,
}

impl UserStatsService {
    #[must_use]
    pub fn new(clock: Clock, user_id: UserId, stats: Arc<dyn UserStatsRepository>) -> Self {
        Self {
            clock,
            user_id,
            stats,
        }
    }

    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    pub async fn current(&self) -> Result<Option<UserStats>, StorageError> {
        self.stats.get_stats(&self.user_id).await
    }

    /// Fold one completed quiz into the stored totals.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if reading or saving the totals fails.
    pub async fn record_completion(&self, score: Score) -> Result<UserStats, StorageError> {
        let mut stats = self.stats.get_stats(&self.user_id).await?.unwrap_or_default();
        stats.record(score, self.clock.now());
        self.stats.save_stats(&self.user_id, &stats).await?;
        info!(
            user = %self.user_id,
            quizzes = stats.quizzes_completed,
            average = stats.average_score,
            "user stats updated"
        );
        Ok(stats)
    }

    /// A player completion handler that records the score in the background.
    #[must_use]
    pub fn completion_handler(self: Arc<Self>, runtime: Handle) -> CompletionHandler {
        Arc::new(move |score| {
            let service = Arc::clone(&self);
            runtime.spawn(async move {
                if let Err(err) = service.record_completion(score).await {
                    warn!(user = %service.user_id, error = %err, "user stats update failed");
                }
            });
        })
    }
}
