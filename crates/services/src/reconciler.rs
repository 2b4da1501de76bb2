use std::sync::Arc;

use quiz_core::Clock;
use quiz_core::model::{PersistedProgress, ProgressSource, QuizId, UserId, pick_latest};
use storage::repository::{LocalProgressCache, RemoteProgressStore, StorageError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::reachability::Reachability;

/// Keeps the local cache and the remote store in step for one (user, quiz).
///
/// Nothing here returns an error: background persistence failures are
/// logged and the local cache remains the fallback.
#[derive(Clone)]
pub struct ProgressReconciler {
    user_id: UserId,
    quiz_id: QuizId,
    local: Arc<dyn LocalProgressCache>,
    remote: Arc<dyn RemoteProgressStore>,
    reachability: Reachability,
    clock: Clock,
}

impl ProgressReconciler {
    #[must_use]
    pub fn new(
        user_id: UserId,
        quiz_id: QuizId,
        local: Arc<dyn LocalProgressCache>,
        remote: Arc<dyn RemoteProgressStore>,
        reachability: Reachability,
        clock: Clock,
    ) -> Self {
        Self {
            user_id,
            quiz_id,
            local,
            remote,
            reachability,
            clock,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    #[must_use]
    pub fn quiz_id(&self) -> &QuizId {
        &self.quiz_id
    }

    #[must_use]
    pub fn reachability(&self) -> &Reachability {
        &self.reachability
    }

    /// Resolve the snapshot a session should resume from.
    ///
    /// An explicit `initial` snapshot is used as-is. Otherwise the newer of
    /// the remote copy (read only while online) and the local copy wins;
    /// unreadable copies count as absent.
    pub async fn load(&self, initial: Option<PersistedProgress>) -> (ProgressSource, PersistedProgress) {
        if let Some(initial) = initial {
            info!(quiz = %self.quiz_id, "resuming from provided progress");
            return (ProgressSource::Provided, initial);
        }

        let remote = if self.reachability.is_online() {
            self.read_remote().await
        } else {
            debug!(quiz = %self.quiz_id, "offline, skipping remote read");
            None
        };
        let local = self.read_local().await;

        let (source, progress) = pick_latest(remote, local);
        info!(
            quiz = %self.quiz_id,
            ?source,
            current_index = progress.current_index,
            answers = progress.answers.len(),
            "progress loaded"
        );
        (source, progress)
    }

    async fn read_remote(&self) -> Option<PersistedProgress> {
        match self.remote.read_remote(&self.user_id, &self.quiz_id).await {
            Ok(progress) => progress,
            Err(err) => {
                warn!(quiz = %self.quiz_id, error = %err, "remote progress unreadable");
                None
            }
        }
    }

    async fn read_local(&self) -> Option<PersistedProgress> {
        match self.local.read_local(&self.quiz_id).await {
            Ok(progress) => progress,
            Err(StorageError::Serialization(reason)) => {
                warn!(quiz = %self.quiz_id, %reason, "local progress corrupt, ignoring");
                None
            }
            Err(err) => {
                warn!(quiz = %self.quiz_id, error = %err, "local progress unreadable");
                None
            }
        }
    }

    /// Stamp and write a snapshot: always to the local cache, and to the
    /// remote store while online.
    pub async fn persist(&self, progress: PersistedProgress) {
        let progress = progress.stamped(self.clock.now());

        if let Err(err) = self.local.write_local(&self.quiz_id, &progress).await {
            warn!(quiz = %self.quiz_id, error = %err, "local progress write failed");
        }

        if !self.reachability.is_online() {
            debug!(quiz = %self.quiz_id, "offline, remote write deferred");
            return;
        }
        match self
            .remote
            .upsert_remote(&self.user_id, &self.quiz_id, &progress)
            .await
        {
            Ok(()) => debug!(
                quiz = %self.quiz_id,
                status = progress.status(),
                current_index = progress.current_index,
                "progress persisted"
            ),
            Err(err) => warn!(quiz = %self.quiz_id, error = %err, "remote progress write failed"),
        }
    }

    /// Copy whatever the local cache holds to the remote store, once.
    ///
    /// Returns `true` if a snapshot was pushed.
    pub async fn push_local_to_remote(&self) -> bool {
        let Some(progress) = self.read_local().await else {
            debug!(quiz = %self.quiz_id, "nothing cached to push");
            return false;
        };
        match self
            .remote
            .upsert_remote(&self.user_id, &self.quiz_id, &progress)
            .await
        {
            Ok(()) => {
                info!(quiz = %self.quiz_id, "cached progress pushed to remote");
                true
            }
            Err(err) => {
                warn!(quiz = %self.quiz_id, error = %err, "catch-up push failed");
                false
            }
        }
    }

    /// Delete both stored copies. Safe to repeat.
    pub async fn discard(&self) {
        if let Err(err) = self.local.delete_local(&self.quiz_id).await {
            warn!(quiz = %self.quiz_id, error = %err, "local progress delete failed");
        }
        if let Err(err) = self
            .remote
            .delete_remote(&self.user_id, &self.quiz_id)
            .await
        {
            warn!(quiz = %self.quiz_id, error = %err, "remote progress delete failed");
        }
        info!(quiz = %self.quiz_id, "stored progress discarded");
    }

    /// Push the cached snapshot each time the network comes back.
    ///
    /// The task runs until aborted.
    #[must_use]
    pub fn spawn_reconnect_watcher(&self, runtime: &Handle) -> JoinHandle<()> {
        let mut rx = self.reachability.subscribe();
        let reconciler = self.clone();
        runtime.spawn(async move {
            let mut was_online = *rx.borrow_and_update();
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if online && !was_online {
                    reconciler.push_local_to_remote().await;
                }
                was_online = online;
            }
        })
    }
}
