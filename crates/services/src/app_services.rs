use std::sync::Arc;

use quiz_core::model::{PersistedProgress, Question, QuizId};
use quiz_core::{Clock, QuizMode};
use storage::repository::{InMemoryRepository, Storage};
use tokio::runtime::Handle;
use tracing::info;

use crate::annotations::{NoteService, ReportService, SavedQuestionService};
use crate::config::{AppConfig, SyncSettings};
use crate::error::AppServicesError;
use crate::player::QuizPlayer;
use crate::reachability::Reachability;
use crate::reconciler::ProgressReconciler;
use crate::remote::RestBackend;
use crate::stats_service::UserStatsService;

/// Assembles app-facing services for one signed-in user.
#[derive(Clone)]
pub struct AppServices {
    clock: Clock,
    config: AppConfig,
    storage: Storage,
    reachability: Reachability,
    notes: Arc<NoteService>,
    reports: Arc<ReportService>,
    stats: Arc<UserStatsService>,
    saved: Arc<SavedQuestionService>,
}

impl AppServices {
    /// Build services with a `SQLite` progress cache and, when configured, the
    /// hosted backend.
    ///
    /// Without a remote the backend contracts are served in-process and the
    /// reachability signal stays offline, so progress lives in the cache only.
    /// Notes, reports and stats written in that mode end with the process.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(config: AppConfig, clock: Clock) -> Result<Self, AppServicesError> {
        let (storage, reachability) = match &config.remote {
            Some(remote) => {
                info!(url = %remote.base_url, "using hosted backend");
                let backend = RestBackend::new(remote.clone());
                (Storage::sqlite(&config.db_url, backend).await?, Reachability::online())
            }
            None => {
                info!("no remote configured, progress stays on this device");
                (
                    Storage::sqlite(&config.db_url, InMemoryRepository::new()).await?,
                    Reachability::offline(),
                )
            }
        };
        Ok(Self::with_storage(config, storage, reachability, clock))
    }

    #[must_use]
    pub fn with_storage(
        config: AppConfig,
        storage: Storage,
        reachability: Reachability,
        clock: Clock,
    ) -> Self {
        let user_id = config.user_id.clone();
        let notes = Arc::new(NoteService::new(
            clock,
            user_id.clone(),
            Arc::clone(&storage.notes),
        ));
        let reports = Arc::new(ReportService::new(
            clock,
            user_id.clone(),
            Arc::clone(&storage.reports),
        ));
        let stats = Arc::new(UserStatsService::new(
            clock,
            user_id.clone(),
            Arc::clone(&storage.stats),
        ));
        let saved = Arc::new(SavedQuestionService::new(user_id, Arc::clone(&storage.saved)));
        Self {
            clock,
            config,
            storage,
            reachability,
            notes,
            reports,
            stats,
            saved,
        }
    }

    #[must_use]
    pub fn reconciler(&self, quiz_id: QuizId) -> ProgressReconciler {
        ProgressReconciler::new(
            self.config.user_id.clone(),
            quiz_id,
            Arc::clone(&self.storage.local),
            Arc::clone(&self.storage.remote),
            self.reachability.clone(),
            self.clock,
        )
    }

    /// Open a quiz attempt with its playlist markers loaded. Practice
    /// completions feed the user's stats.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub async fn open_quiz(
        &self,
        quiz_id: QuizId,
        mode: QuizMode,
        questions: Vec<Question>,
        initial: Option<PersistedProgress>,
    ) -> QuizPlayer {
        let mut player = QuizPlayer::open(
            self.reconciler(quiz_id),
            mode,
            questions,
            initial,
            self.config.sync,
        )
        .await;
        player.refresh_saved_questions(&self.saved).await;
        if mode == QuizMode::Practice {
            player.with_completion_handler(Arc::clone(&self.stats).completion_handler(Handle::current()))
        } else {
            player
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[must_use]
    pub fn sync_settings(&self) -> SyncSettings {
        self.config.sync
    }

    #[must_use]
    pub fn reachability(&self) -> &Reachability {
        &self.reachability
    }

    #[must_use]
    pub fn notes(&self) -> Arc<NoteService> {
        Arc::clone(&self.notes)
    }

    #[must_use]
    pub fn reports(&self) -> Arc<ReportService> {
        Arc::clone(&self.reports)
    }

    #[must_use]
    pub fn stats(&self) -> Arc<UserStatsService> {
        Arc::clone(&self.stats)
    }

    #[must_use]
    pub fn saved_questions(&self) -> Arc<SavedQuestionService> {
        Arc::clone(&self.saved)
    }
}
