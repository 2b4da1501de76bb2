use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use quiz_core::model::{AnswerInput, PersistedProgress, ProgressSource, Question, QuestionId};
use quiz_core::time::format_elapsed;
use quiz_core::{Phase, QuizMode, QuizSession, Score, SessionError};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::annotations::SavedQuestionService;
use crate::config::SyncSettings;
use crate::debounce::{Debouncer, DeferredAction, DeferredFuture};
use crate::error::PlayerError;
use crate::reconciler::ProgressReconciler;

/// Called once each time an attempt is finished.
pub type CompletionHandler = Arc<dyn Fn(Score) + Send + Sync>;

/// A running quiz attempt: the session state machine plus its background
/// persistence and elapsed-time ticker.
///
/// User actions are synchronous and never wait on I/O. Every state change
/// schedules a debounced write; dropping the player stops both timers.
pub struct QuizPlayer {
    runtime: Handle,
    session: Arc<Mutex<QuizSession>>,
    reconciler: ProgressReconciler,
    debouncer: Debouncer,
    tick_interval: Duration,
    source: ProgressSource,
    ticker: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    final_write: Option<JoinHandle<()>>,
    on_complete: Option<CompletionHandler>,
    saved: BTreeSet<QuestionId>,
}

impl QuizPlayer {
    /// Load stored progress and start the attempt.
    ///
    /// The returned player already reflects the resumed state, so no input
    /// can race the load. An empty quiz loads nothing and runs no timer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub async fn open(
        reconciler: ProgressReconciler,
        mode: QuizMode,
        questions: Vec<Question>,
        initial: Option<PersistedProgress>,
        settings: SyncSettings,
    ) -> Self {
        let runtime = Handle::current();
        let quiz_id = reconciler.quiz_id().clone();

        let (source, session) = if questions.is_empty() {
            info!(quiz = %quiz_id, "quiz has no questions");
            (ProgressSource::Fresh, QuizSession::new(quiz_id, mode, questions))
        } else {
            let (source, progress) = reconciler.load(initial).await;
            let (session, discarded) = QuizSession::restore(quiz_id, mode, questions, progress);
            if !discarded.is_empty() {
                warn!(
                    quiz = %session.quiz_id(),
                    ?discarded,
                    "stored answers did not fit their questions and were dropped"
                );
            }
            (source, session)
        };

        let resumable = !session.is_empty();
        let answering = session.phase() == Phase::Answering;
        let session = Arc::new(Mutex::new(session));
        let debouncer = Debouncer::new(
            runtime.clone(),
            settings.debounce(),
            settings.max_wait(),
            persist_action(Arc::clone(&session), reconciler.clone()),
        );

        let mut player = Self {
            runtime,
            session,
            reconciler,
            debouncer,
            tick_interval: settings.tick_interval(),
            source,
            ticker: None,
            reconnect: None,
            final_write: None,
            on_complete: None,
            saved: BTreeSet::new(),
        };
        if resumable {
            player.reconnect = Some(
                player
                    .reconciler
                    .spawn_reconnect_watcher(&player.runtime),
            );
            if answering {
                player.start_ticker();
            }
        }
        player
    }

    #[must_use]
    pub fn with_completion_handler(mut self, handler: CompletionHandler) -> Self {
        self.on_complete = Some(handler);
        self
    }

    // ─── reads ────────────────────────────────────────────────────────────────

    /// Where the resumed state came from.
    #[must_use]
    pub fn source(&self) -> ProgressSource {
        self.source
    }

    /// Run `f` against the current session state.
    pub fn inspect<R>(&self, f: impl FnOnce(&QuizSession) -> R) -> R {
        f(&self.lock())
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.lock().phase()
    }

    #[must_use]
    pub fn score(&self) -> Score {
        self.lock().score()
    }

    #[must_use]
    pub fn snapshot(&self) -> PersistedProgress {
        self.lock().to_progress()
    }

    /// `m:ss` rendering of the elapsed-time counter.
    #[must_use]
    pub fn elapsed_label(&self) -> String {
        format_elapsed(self.lock().elapsed_seconds())
    }

    /// `(answered, total)` for the live progress line.
    #[must_use]
    pub fn answered(&self) -> (usize, usize) {
        let session = self.lock();
        (session.answered_count(), session.questions().len())
    }

    /// Whether the question sits in one of the user's playlists, as of the
    /// last [`QuizPlayer::refresh_saved_questions`].
    #[must_use]
    pub fn is_saved(&self, question_id: QuestionId) -> bool {
        self.saved.contains(&question_id)
    }

    /// Re-read the playlist markers for this quiz's questions.
    pub async fn refresh_saved_questions(&mut self, playlists: &SavedQuestionService) {
        let ids: Vec<QuestionId> = self.lock().questions().iter().map(|q| q.id).collect();
        if ids.is_empty() {
            return;
        }
        self.saved = playlists.saved_among(&ids).await;
    }

    // ─── answering ────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `PlayerError::Session` outside `Answering`.
    pub fn next(&self) -> Result<(), PlayerError> {
        self.mutate(QuizSession::next)
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Session` outside `Answering`.
    pub fn previous(&self) -> Result<(), PlayerError> {
        self.mutate(QuizSession::previous)
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Session` when the session rejects the answer.
    pub fn set_answer(&self, question_id: QuestionId, input: AnswerInput) -> Result<(), PlayerError> {
        self.mutate(|session| session.set_answer(question_id, input))
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Session` when the answer cannot be locked.
    pub fn submit_free_text(&self, question_id: QuestionId) -> Result<(), PlayerError> {
        self.mutate(|session| session.submit_free_text(question_id))
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Session` when the question was not submitted.
    pub fn self_evaluate(&self, question_id: QuestionId, correct: bool) -> Result<(), PlayerError> {
        self.mutate(|session| session.self_evaluate(question_id, correct))
    }

    /// Submit the attempt.
    ///
    /// Stops the timer, reports the score to the completion handler, then
    /// writes one final completed snapshot once any in-flight write is done.
    /// No further writes follow.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Session` for an empty quiz or outside `Answering`.
    pub fn finish(&mut self) -> Result<Score, PlayerError> {
        let (score, snapshot) = {
            let mut session = self.lock();
            let score = session.finish()?;
            (score, session.to_progress())
        };
        self.stop_ticker();
        self.debouncer.cancel();

        info!(
            quiz = %self.reconciler.quiz_id(),
            earned = score.earned,
            possible = score.possible,
            percentage = score.percentage,
            elapsed = snapshot.elapsed_seconds,
            "quiz finished"
        );
        if let Some(handler) = &self.on_complete {
            handler(score);
        }

        let debouncer = self.debouncer.clone();
        let reconciler = self.reconciler.clone();
        self.final_write = Some(self.runtime.spawn(async move {
            debouncer.settle().await;
            reconciler.persist(snapshot).await;
        }));
        Ok(score)
    }

    // ─── results & correction ─────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns `PlayerError::Session` outside `Results`.
    pub fn view_correction(&self) -> Result<(), PlayerError> {
        self.lock().view_correction()?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Session` outside `Correction`.
    pub fn back_to_results(&self) -> Result<(), PlayerError> {
        self.lock().back_to_results()?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Session` outside `Correction` or for an unknown question.
    pub fn toggle_explanation(&self, question_id: QuestionId) -> Result<bool, PlayerError> {
        Ok(self.lock().toggle_explanation(question_id)?)
    }

    /// Discard every stored copy and start over at the first question.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Session` in challenge mode or outside `Results`.
    pub async fn restart(&mut self) -> Result<(), PlayerError> {
        {
            let session = self.lock();
            if !session.mode().allows_restart() {
                return Err(SessionError::RestartDisallowed.into());
            }
            if session.phase() != Phase::Results {
                return Err(SessionError::WrongPhase {
                    expected: Phase::Results,
                    actual: session.phase(),
                }
                .into());
            }
        }

        self.drain_writes().await;
        self.reconciler.discard().await;
        self.lock().restart()?;
        self.start_ticker();
        info!(quiz = %self.reconciler.quiz_id(), "quiz restarted");
        Ok(())
    }

    /// Stop all timers and delete the stored progress. Safe to call twice.
    pub async fn exit(&mut self) {
        self.stop_ticker();
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.abort();
        }
        self.drain_writes().await;
        self.reconciler.discard().await;
        info!(quiz = %self.reconciler.quiz_id(), "quiz exited");
    }

    // ─── internals ────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, QuizSession> {
        lock_session(&self.session)
    }

    fn mutate(
        &self,
        f: impl FnOnce(&mut QuizSession) -> Result<(), SessionError>,
    ) -> Result<(), PlayerError> {
        let changed = {
            let mut session = self.lock();
            let before = session.revision();
            f(&mut session)?;
            session.revision() != before
        };
        if changed {
            self.debouncer.schedule();
        }
        Ok(())
    }

    async fn drain_writes(&mut self) {
        if let Some(final_write) = self.final_write.take() {
            let _ = final_write.await;
        }
        self.debouncer.settle().await;
    }

    fn start_ticker(&mut self) {
        self.stop_ticker();
        let session = Arc::clone(&self.session);
        let debouncer = self.debouncer.clone();
        let period = self.tick_interval;
        self.ticker = Some(self.runtime.spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if lock_session(&session).tick() {
                    debouncer.schedule();
                }
            }
        }));
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for QuizPlayer {
    fn drop(&mut self) {
        self.stop_ticker();
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.abort();
        }
        self.debouncer.cancel();
    }
}

fn lock_session(session: &Mutex<QuizSession>) -> MutexGuard<'_, QuizSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Snapshot the session at fire time; nothing is written once it left `Answering`.
fn persist_action(session: Arc<Mutex<QuizSession>>, reconciler: ProgressReconciler) -> DeferredAction {
    Arc::new(move || -> DeferredFuture {
        let snapshot = {
            let session = lock_session(&session);
            (session.phase() == Phase::Answering).then(|| session.to_progress())
        };
        let reconciler = reconciler.clone();
        Box::pin(async move {
            match snapshot {
                Some(progress) => reconciler.persist(progress).await,
                None => debug!(quiz = %reconciler.quiz_id(), "session submitted, write skipped"),
            }
        })
    })
}
