use std::sync::{Arc, Mutex};
use std::time::Duration;

use quiz_core::model::{
    AnswerInput, ChoiceOption, OptionId, PersistedProgress, ProgressSource, Question, QuestionId,
    QuizId, UserId,
};
use quiz_core::time::fixed_clock;
use quiz_core::{Phase, QuizMode, Score, SessionError};
use services::{
    AppConfig, AppServices, PlayerError, ProgressReconciler, QuizPlayer, Reachability,
    SyncSettings,
};
use storage::repository::{
    InMemoryRepository, LocalProgressCache, RemoteProgressStore, Storage,
};
use tokio::time::sleep;

const QUIZ: &str = "cardio-101";

fn questions() -> Vec<Question> {
    vec![
        Question::choice(
            1,
            "Which vessel leaves the left ventricle?",
            vec![
                ChoiceOption::new(5, "Aorta", true),
                ChoiceOption::new(6, "Pulmonary trunk", false),
            ],
        ),
        Question::choice(
            2,
            "Which are atrioventricular valves?",
            vec![
                ChoiceOption::new(7, "Mitral", true),
                ChoiceOption::new(8, "Tricuspid", true),
                ChoiceOption::new(9, "Aortic", false),
            ],
        ),
        Question::free_text(3, "Capital of France?", Some("Paris".into())),
    ]
}

/// Quiet timer so write counts only reflect user actions.
fn quiet() -> SyncSettings {
    SyncSettings::default().with_tick_interval(Duration::from_secs(3600))
}

struct Harness {
    local: InMemoryRepository,
    remote: InMemoryRepository,
    reachability: Reachability,
}

impl Harness {
    fn new(online: bool) -> Self {
        Self {
            local: InMemoryRepository::new(),
            remote: InMemoryRepository::new(),
            reachability: Reachability::new(online),
        }
    }

    fn reconciler(&self) -> ProgressReconciler {
        ProgressReconciler::new(
            UserId::new("student-1"),
            QuizId::new(QUIZ),
            Arc::new(self.local.clone()),
            Arc::new(self.remote.clone()),
            self.reachability.clone(),
            fixed_clock(),
        )
    }

    async fn open(&self, mode: QuizMode, settings: SyncSettings) -> QuizPlayer {
        QuizPlayer::open(self.reconciler(), mode, questions(), None, settings).await
    }

    async fn local_copy(&self) -> Option<PersistedProgress> {
        self.local.read_local(&QuizId::new(QUIZ)).await.unwrap()
    }

    async fn remote_copy(&self) -> Option<PersistedProgress> {
        self.remote
            .read_remote(&UserId::new("student-1"), &QuizId::new(QUIZ))
            .await
            .unwrap()
    }

    fn writes(&self) -> usize {
        self.local.progress_writes() + self.remote.progress_writes()
    }
}

fn unstamped(mut progress: PersistedProgress) -> PersistedProgress {
    progress.updated_at = None;
    progress
}

#[tokio::test(start_paused = true)]
async fn rapid_changes_collapse_into_one_write_of_the_latest_state() {
    let h = Harness::new(true);
    let player = h.open(QuizMode::Practice, quiet()).await;

    player
        .set_answer(QuestionId::new(1), AnswerInput::Choose(OptionId::new(6)))
        .unwrap();
    player
        .set_answer(QuestionId::new(1), AnswerInput::Choose(OptionId::new(5)))
        .unwrap();
    player.next().unwrap();
    player
        .set_answer(QuestionId::new(2), AnswerInput::Choose(OptionId::new(7)))
        .unwrap();
    player
        .set_answer(QuestionId::new(2), AnswerInput::Choose(OptionId::new(8)))
        .unwrap();

    sleep(Duration::from_millis(900)).await;
    assert_eq!(h.writes(), 0);

    sleep(Duration::from_millis(200)).await;
    // One debounced write: one local put plus one remote upsert.
    assert_eq!(h.writes(), 2);

    let expected = player.snapshot();
    assert_eq!(h.local_copy().await.map(unstamped), Some(expected.clone()));
    assert_eq!(h.remote_copy().await.map(unstamped), Some(expected));
}

#[tokio::test(start_paused = true)]
async fn no_op_actions_do_not_schedule_writes() {
    let h = Harness::new(true);
    let player = h.open(QuizMode::Practice, quiet()).await;

    player.previous().unwrap();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn fresh_quiz_scores_full_marks_and_reports_completion() {
    let h = Harness::new(true);
    let reported: Arc<Mutex<Vec<Score>>> = Arc::default();
    let sink = Arc::clone(&reported);
    let mut player = h
        .open(QuizMode::Challenge, quiet())
        .await
        .with_completion_handler(Arc::new(move |score| {
            sink.lock().unwrap().push(score);
        }));

    player
        .set_answer(QuestionId::new(1), AnswerInput::Choose(OptionId::new(5)))
        .unwrap();
    player
        .set_answer(QuestionId::new(2), AnswerInput::Choose(OptionId::new(7)))
        .unwrap();
    player
        .set_answer(QuestionId::new(2), AnswerInput::Choose(OptionId::new(8)))
        .unwrap();
    player
        .set_answer(QuestionId::new(3), AnswerInput::Text("Paris".into()))
        .unwrap();
    player.submit_free_text(QuestionId::new(3)).unwrap();
    player.self_evaluate(QuestionId::new(3), true).unwrap();
    assert_eq!(player.answered(), (3, 3));

    let score = player.finish().unwrap();
    assert_eq!(
        score,
        Score {
            earned: 3,
            possible: 3,
            percentage: 100
        }
    );
    assert_eq!(*reported.lock().unwrap(), vec![score]);
    assert_eq!(player.phase(), Phase::Results);

    sleep(Duration::from_millis(10)).await;
    let stored = h.remote_copy().await.unwrap();
    assert!(stored.completed);
    assert_eq!(stored.status(), "completed");
    assert!(h.local_copy().await.unwrap().completed);

    let err = player.restart().await.unwrap_err();
    assert!(matches!(
        err,
        PlayerError::Session(SessionError::RestartDisallowed)
    ));
}

#[tokio::test(start_paused = true)]
async fn partial_multi_select_earns_nothing() {
    let h = Harness::new(true);
    let mut player = h.open(QuizMode::Practice, quiet()).await;
    player
        .set_answer(QuestionId::new(2), AnswerInput::Choose(OptionId::new(7)))
        .unwrap();
    let score = player.finish().unwrap();
    assert_eq!(score.earned, 0);
    assert_eq!(score.possible, 3);
}

#[tokio::test(start_paused = true)]
async fn nothing_is_written_after_submission() {
    let h = Harness::new(true);
    let mut player = h.open(QuizMode::Practice, quiet()).await;
    player
        .set_answer(QuestionId::new(1), AnswerInput::Choose(OptionId::new(5)))
        .unwrap();
    player.finish().unwrap();
    sleep(Duration::from_secs(5)).await;
    let after_finish = h.writes();
    assert_eq!(after_finish, 2);

    player.view_correction().unwrap();
    assert!(player.toggle_explanation(QuestionId::new(1)).unwrap());
    player.back_to_results().unwrap();
    assert!(player.next().is_err());
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.writes(), after_finish);
}

#[tokio::test(start_paused = true)]
async fn offline_progress_survives_a_restart() {
    let h = Harness::new(false);
    let before = {
        let player = h.open(QuizMode::Practice, quiet()).await;
        player
            .set_answer(QuestionId::new(1), AnswerInput::Choose(OptionId::new(5)))
            .unwrap();
        player.next().unwrap();
        sleep(Duration::from_millis(1100)).await;
        player.snapshot()
    };
    assert!(h.remote_copy().await.is_none());

    let resumed = h.open(QuizMode::Practice, quiet()).await;
    assert_eq!(resumed.source(), ProgressSource::Local);
    let after = resumed.snapshot();
    assert_eq!(after.current_index, 1);
    assert_eq!(after.current_index, before.current_index);
    assert_eq!(after.answers, before.answers);
}

#[tokio::test(start_paused = true)]
async fn reconnect_pushes_offline_progress() {
    let h = Harness::new(false);
    let player = h.open(QuizMode::Practice, quiet()).await;
    player.next().unwrap();
    sleep(Duration::from_millis(1100)).await;
    assert!(h.remote_copy().await.is_none());

    h.reachability.set_online(true);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(h.remote_copy().await.map(|p| p.current_index), Some(1));
    drop(player);
}

#[tokio::test(start_paused = true)]
async fn restart_discards_every_stored_copy() {
    let h = Harness::new(true);
    let mut player = h.open(QuizMode::Practice, quiet()).await;
    player
        .set_answer(QuestionId::new(1), AnswerInput::Choose(OptionId::new(5)))
        .unwrap();
    player.next().unwrap();
    player.finish().unwrap();

    player.restart().await.unwrap();
    assert!(h.local_copy().await.is_none());
    assert!(h.remote_copy().await.is_none());
    assert_eq!(player.phase(), Phase::Answering);
    assert_eq!(player.snapshot(), PersistedProgress::empty());

    let (source, progress) = h.reconciler().load(None).await;
    assert_eq!(source, ProgressSource::Fresh);
    assert_eq!(progress.current_index, 0);
    assert!(progress.answers.is_empty());
}

#[tokio::test(start_paused = true)]
async fn exit_twice_leaves_nothing_behind() {
    let h = Harness::new(true);
    let mut player = h.open(QuizMode::Practice, quiet()).await;
    player.next().unwrap();
    sleep(Duration::from_millis(1100)).await;
    assert!(h.local_copy().await.is_some());

    player.next().unwrap();
    player.exit().await;
    player.exit().await;
    sleep(Duration::from_secs(2)).await;

    assert!(h.local_copy().await.is_none());
    assert!(h.remote_copy().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn timer_runs_only_while_answering() {
    let h = Harness::new(true);
    let settings = SyncSettings::default().with_tick_interval(Duration::from_secs(1));
    let mut player = h.open(QuizMode::Practice, settings).await;

    sleep(Duration::from_millis(3500)).await;
    assert_eq!(player.elapsed_label(), "0:03");

    player.finish().unwrap();
    sleep(Duration::from_secs(10)).await;
    assert_eq!(player.elapsed_label(), "0:03");
    assert_eq!(h.local_copy().await.map(|p| p.elapsed_seconds), Some(3));
}

#[tokio::test(start_paused = true)]
async fn remote_state_is_applied_before_first_input() {
    let h = Harness::new(true);
    let mut stored = PersistedProgress::empty().stamped(quiz_core::time::fixed_now());
    stored.current_index = 2;
    stored.elapsed_seconds = 61;
    h.remote
        .upsert_remote(&UserId::new("student-1"), &QuizId::new(QUIZ), &stored)
        .await
        .unwrap();

    let player = h.open(QuizMode::Practice, quiet()).await;
    assert_eq!(player.source(), ProgressSource::Remote);
    assert_eq!(player.inspect(|s| s.current_index()), 2);
    assert_eq!(player.elapsed_label(), "1:01");
    player.previous().unwrap();
    assert_eq!(player.inspect(|s| s.current_index()), 1);
}

#[tokio::test(start_paused = true)]
async fn completed_snapshot_reopens_in_results_with_timer_stopped() {
    let h = Harness::new(true);
    let mut completed = PersistedProgress::empty();
    completed.completed = true;
    completed.elapsed_seconds = 42;

    let player = QuizPlayer::open(
        h.reconciler(),
        QuizMode::Playlist,
        questions(),
        Some(completed),
        SyncSettings::default(),
    )
    .await;
    assert_eq!(player.source(), ProgressSource::Provided);
    assert_eq!(player.phase(), Phase::Results);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(player.elapsed_label(), "0:42");
    assert_eq!(h.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_quiz_offers_only_exit() {
    let h = Harness::new(true);
    let mut player = QuizPlayer::open(
        h.reconciler(),
        QuizMode::Practice,
        Vec::new(),
        None,
        SyncSettings::default(),
    )
    .await;

    sleep(Duration::from_secs(3)).await;
    assert_eq!(player.elapsed_label(), "0:00");
    assert!(matches!(
        player.finish(),
        Err(PlayerError::Session(SessionError::Empty))
    ));
    player.exit().await;
    assert_eq!(h.writes(), 0);
}

#[tokio::test(start_paused = true)]
async fn practice_completion_updates_user_stats() {
    let backend = InMemoryRepository::new();
    let local: Arc<dyn LocalProgressCache> = Arc::new(InMemoryRepository::new());
    let storage = Storage::with_local(local, backend);
    let config = AppConfig {
        db_url: "sqlite::memory:".into(),
        user_id: UserId::new("student-1"),
        remote: None,
        sync: quiet(),
    };
    let app = AppServices::with_storage(config, storage, Reachability::online(), fixed_clock());

    let mut player = app
        .open_quiz(QuizId::new(QUIZ), QuizMode::Practice, questions(), None)
        .await;
    player
        .set_answer(QuestionId::new(1), AnswerInput::Choose(OptionId::new(5)))
        .unwrap();
    player.finish().unwrap();
    sleep(Duration::from_millis(10)).await;

    let stats = app.stats().current().await.unwrap().unwrap();
    assert_eq!(stats.quizzes_completed, 1);
    assert_eq!(stats.total_points, 1);
    assert!((stats.average_score - 33.0).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn opened_quiz_marks_questions_already_in_a_playlist() {
    let backend = InMemoryRepository::new();
    let user = UserId::new("student-1");
    backend.save_question(&user, QuestionId::new(2)).unwrap();
    backend.save_question(&user, QuestionId::new(40)).unwrap();

    let local: Arc<dyn LocalProgressCache> = Arc::new(InMemoryRepository::new());
    let storage = Storage::with_local(local, backend.clone());
    let config = AppConfig {
        db_url: "sqlite::memory:".into(),
        user_id: user.clone(),
        remote: None,
        sync: quiet(),
    };
    let app = AppServices::with_storage(config, storage, Reachability::online(), fixed_clock());

    let mut player = app
        .open_quiz(QuizId::new(QUIZ), QuizMode::Playlist, questions(), None)
        .await;
    assert!(player.is_saved(QuestionId::new(2)));
    assert!(!player.is_saved(QuestionId::new(1)));
    assert!(!player.is_saved(QuestionId::new(40)));

    backend.save_question(&user, QuestionId::new(1)).unwrap();
    player.refresh_saved_questions(&app.saved_questions()).await;
    assert!(player.is_saved(QuestionId::new(1)));
    player.exit().await;
}
