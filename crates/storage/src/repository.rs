use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    Note, NoteId, PersistedProgress, QuestionId, QuizId, Report, UserId, UserStats,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::codec;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

//
// ─── PROGRESS CONTRACTS ────────────────────────────────────────────────────────
//

/// On-device durable cache, keyed by quiz only (the device implies the user).
#[async_trait]
pub trait LocalProgressCache: Send + Sync {
    /// Read the cached progress for a quiz.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` when the stored bytes do not decode,
    /// or other storage errors.
    async fn read_local(&self, quiz_id: &QuizId) -> Result<Option<PersistedProgress>, StorageError>;

    /// Replace the cached progress for a quiz.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the progress cannot be stored.
    async fn write_local(
        &self,
        quiz_id: &QuizId,
        progress: &PersistedProgress,
    ) -> Result<(), StorageError>;

    /// Remove the cached progress. Removing a missing entry is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the cache cannot be reached.
    async fn delete_local(&self, quiz_id: &QuizId) -> Result<(), StorageError>;
}

/// Backend copy of a user's progress, one row per (user, quiz).
#[async_trait]
pub trait RemoteProgressStore: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached or the row is malformed.
    async fn read_remote(
        &self,
        user_id: &UserId,
        quiz_id: &QuizId,
    ) -> Result<Option<PersistedProgress>, StorageError>;

    /// Insert or overwrite the row for (user, quiz). Repeating it is harmless.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend rejects the write.
    async fn upsert_remote(
        &self,
        user_id: &UserId,
        quiz_id: &QuizId,
        progress: &PersistedProgress,
    ) -> Result<(), StorageError>;

    /// Delete the row for (user, quiz). Deleting a missing row is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be reached.
    async fn delete_remote(&self, user_id: &UserId, quiz_id: &QuizId) -> Result<(), StorageError>;
}

//
// ─── ANNOTATION CONTRACTS ──────────────────────────────────────────────────────
//

#[async_trait]
pub trait NoteRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_note(
        &self,
        user_id: &UserId,
        question_id: QuestionId,
    ) -> Result<Option<Note>, StorageError>;

    /// Create the user's note on a question, or replace its content.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn upsert_note(
        &self,
        user_id: &UserId,
        question_id: QuestionId,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Note, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user has no such note.
    async fn delete_note(&self, user_id: &UserId, note_id: NoteId) -> Result<(), StorageError>;

    /// All notes of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn list_notes(&self, user_id: &UserId) -> Result<Vec<Note>, StorageError>;
}

#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// Append a report. Reports are never updated or deleted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn append_report(&self, user_id: &UserId, report: &Report) -> Result<(), StorageError>;
}

#[async_trait]
pub trait UserStatsRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn get_stats(&self, user_id: &UserId) -> Result<Option<UserStats>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn save_stats(&self, user_id: &UserId, stats: &UserStats) -> Result<(), StorageError>;
}

/// Questions a user has filed into one of their playlists.
#[async_trait]
pub trait SavedQuestionRepository: Send + Sync {
    /// The subset of `question_ids` present in any of the user's playlists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failures.
    async fn saved_question_ids(
        &self,
        user_id: &UserId,
        question_ids: &[QuestionId],
    ) -> Result<BTreeSet<QuestionId>, StorageError>;
}

//
// ─── IN-MEMORY ─────────────────────────────────────────────────────────────────
//

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Local entries are kept as encoded bytes so corrupted payloads can be
/// simulated with [`InMemoryRepository::put_raw_local`]. Toggling
/// [`InMemoryRepository::set_available`] makes every call fail with a
/// connection error.
#[derive(Clone)]
pub struct InMemoryRepository {
    local: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    remote: Arc<Mutex<HashMap<(UserId, QuizId), PersistedProgress>>>,
    notes: Arc<Mutex<HashMap<(UserId, QuestionId), Note>>>,
    reports: Arc<Mutex<Vec<(UserId, Report)>>>,
    stats: Arc<Mutex<HashMap<UserId, UserStats>>>,
    saved: Arc<Mutex<HashSet<(UserId, QuestionId)>>>,
    available: Arc<AtomicBool>,
    progress_writes: Arc<AtomicUsize>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            local: Arc::new(Mutex::new(HashMap::new())),
            remote: Arc::new(Mutex::new(HashMap::new())),
            notes: Arc::new(Mutex::new(HashMap::new())),
            reports: Arc::new(Mutex::new(Vec::new())),
            stats: Arc::new(Mutex::new(HashMap::new())),
            saved: Arc::new(Mutex::new(HashSet::new())),
            available: Arc::new(AtomicBool::new(true)),
            progress_writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful local writes plus remote upserts so far.
    #[must_use]
    pub fn progress_writes(&self) -> usize {
        self.progress_writes.load(Ordering::SeqCst)
    }

    /// Store arbitrary bytes under a quiz's local key.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn put_raw_local(&self, quiz_id: &QuizId, bytes: Vec<u8>) -> Result<(), StorageError> {
        let mut guard = self
            .local
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(quiz_id.local_cache_key(), bytes);
        Ok(())
    }

    /// All reports appended so far, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn reports(&self) -> Result<Vec<(UserId, Report)>, StorageError> {
        let guard = self
            .reports
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    /// File a question into the user's playlists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Connection` if the lock is poisoned.
    pub fn save_question(&self, user_id: &UserId, question_id: QuestionId) -> Result<(), StorageError> {
        let mut guard = self
            .saved
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((user_id.clone(), question_id));
        Ok(())
    }

    fn ensure_available(&self) -> Result<(), StorageError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Connection("backend unavailable".into()))
        }
    }
}

#[async_trait]
impl LocalProgressCache for InMemoryRepository {
    async fn read_local(&self, quiz_id: &QuizId) -> Result<Option<PersistedProgress>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .local
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .get(&quiz_id.local_cache_key())
            .map(|bytes| codec::decode(bytes))
            .transpose()
    }

    async fn write_local(
        &self,
        quiz_id: &QuizId,
        progress: &PersistedProgress,
    ) -> Result<(), StorageError> {
        self.ensure_available()?;
        let bytes = codec::encode(progress)?;
        let mut guard = self
            .local
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(quiz_id.local_cache_key(), bytes);
        self.progress_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_local(&self, quiz_id: &QuizId) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .local
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&quiz_id.local_cache_key());
        Ok(())
    }
}

#[async_trait]
impl RemoteProgressStore for InMemoryRepository {
    async fn read_remote(
        &self,
        user_id: &UserId,
        quiz_id: &QuizId,
    ) -> Result<Option<PersistedProgress>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .remote
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user_id.clone(), quiz_id.clone())).cloned())
    }

    async fn upsert_remote(
        &self,
        user_id: &UserId,
        quiz_id: &QuizId,
        progress: &PersistedProgress,
    ) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .remote
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((user_id.clone(), quiz_id.clone()), progress.clone());
        self.progress_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete_remote(&self, user_id: &UserId, quiz_id: &QuizId) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .remote
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&(user_id.clone(), quiz_id.clone()));
        Ok(())
    }
}

#[async_trait]
impl NoteRepository for InMemoryRepository {
    async fn get_note(
        &self,
        user_id: &UserId,
        question_id: QuestionId,
    ) -> Result<Option<Note>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .notes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user_id.clone(), question_id)).cloned())
    }

    async fn upsert_note(
        &self,
        user_id: &UserId,
        question_id: QuestionId,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Note, StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .notes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let note = guard
            .entry((user_id.clone(), question_id))
            .and_modify(|note| content.clone_into(&mut note.content))
            .or_insert_with(|| Note {
                id: NoteId::generate(),
                user_id: user_id.clone(),
                question_id,
                content: content.to_owned(),
                created_at: now,
            });
        Ok(note.clone())
    }

    async fn delete_note(&self, user_id: &UserId, note_id: NoteId) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .notes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let key = guard
            .iter()
            .find(|((owner, _), note)| owner == user_id && note.id == note_id)
            .map(|(key, _)| key.clone())
            .ok_or(StorageError::NotFound)?;
        guard.remove(&key);
        Ok(())
    }

    async fn list_notes(&self, user_id: &UserId) -> Result<Vec<Note>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .notes
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut notes: Vec<Note> = guard
            .iter()
            .filter(|((owner, _), _)| owner == user_id)
            .map(|(_, note)| note.clone())
            .collect();
        notes.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.question_id.cmp(&a.question_id))
        });
        Ok(notes)
    }
}

#[async_trait]
impl ReportRepository for InMemoryRepository {
    async fn append_report(&self, user_id: &UserId, report: &Report) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .reports
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.push((user_id.clone(), report.clone()));
        Ok(())
    }
}

#[async_trait]
impl UserStatsRepository for InMemoryRepository {
    async fn get_stats(&self, user_id: &UserId) -> Result<Option<UserStats>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .stats
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(user_id).cloned())
    }

    async fn save_stats(&self, user_id: &UserId, stats: &UserStats) -> Result<(), StorageError> {
        self.ensure_available()?;
        let mut guard = self
            .stats
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(user_id.clone(), stats.clone());
        Ok(())
    }
}

#[async_trait]
impl SavedQuestionRepository for InMemoryRepository {
    async fn saved_question_ids(
        &self,
        user_id: &UserId,
        question_ids: &[QuestionId],
    ) -> Result<BTreeSet<QuestionId>, StorageError> {
        self.ensure_available()?;
        let guard = self
            .saved
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(question_ids
            .iter()
            .copied()
            .filter(|id| guard.contains(&(user_id.clone(), *id)))
            .collect())
    }
}

/// Every contract served by the backend tier.
pub trait Backend:
    RemoteProgressStore + NoteRepository + ReportRepository + UserStatsRepository + SavedQuestionRepository
{
}

impl<T> Backend for T where
    T: RemoteProgressStore
        + NoteRepository
        + ReportRepository
        + UserStatsRepository
        + SavedQuestionRepository
{
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
///
/// `local` is the on-device tier; every other field talks to the backend.
#[derive(Clone)]
pub struct Storage {
    pub local: Arc<dyn LocalProgressCache>,
    pub remote: Arc<dyn RemoteProgressStore>,
    pub notes: Arc<dyn NoteRepository>,
    pub reports: Arc<dyn ReportRepository>,
    pub stats: Arc<dyn UserStatsRepository>,
    pub saved: Arc<dyn SavedQuestionRepository>,
}

impl Storage {
    /// Separate in-memory instances for the device and the backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_local(Arc::new(InMemoryRepository::new()), InMemoryRepository::new())
    }

    /// Pair an on-device cache with a backend implementing every remote contract.
    #[must_use]
    pub fn with_local<B>(local: Arc<dyn LocalProgressCache>, backend: B) -> Self
    where
        B: Backend + 'static,
    {
        let backend = Arc::new(backend);
        let remote: Arc<dyn RemoteProgressStore> = backend.clone();
        let notes: Arc<dyn NoteRepository> = backend.clone();
        let reports: Arc<dyn ReportRepository> = backend.clone();
        let stats: Arc<dyn UserStatsRepository> = backend.clone();
        let saved: Arc<dyn SavedQuestionRepository> = backend;
        Self {
            local,
            remote,
            notes,
            reports,
            stats,
            saved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quiz_core::model::{Answer, OptionId};
    use quiz_core::time::fixed_now;

    fn progress() -> PersistedProgress {
        let mut p = PersistedProgress::empty().stamped(fixed_now());
        p.current_index = 1;
        p.answers
            .insert(QuestionId::new(1), Answer::Single(OptionId::new(5)));
        p
    }

    #[tokio::test]
    async fn local_round_trips_and_deletes_idempotently() {
        let repo = InMemoryRepository::new();
        let quiz = QuizId::new("q1");
        assert!(repo.read_local(&quiz).await.unwrap().is_none());

        repo.write_local(&quiz, &progress()).await.unwrap();
        assert_eq!(repo.read_local(&quiz).await.unwrap(), Some(progress()));

        repo.delete_local(&quiz).await.unwrap();
        repo.delete_local(&quiz).await.unwrap();
        assert!(repo.read_local(&quiz).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_local_bytes_surface_as_serialization_error() {
        let repo = InMemoryRepository::new();
        let quiz = QuizId::new("q1");
        repo.put_raw_local(&quiz, b"{not json".to_vec()).unwrap();
        let err = repo.read_local(&quiz).await.unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[tokio::test]
    async fn remote_upsert_overwrites_by_user_and_quiz() {
        let repo = InMemoryRepository::new();
        let user = UserId::new("u1");
        let quiz = QuizId::new("q1");
        repo.upsert_remote(&user, &quiz, &PersistedProgress::empty())
            .await
            .unwrap();
        repo.upsert_remote(&user, &quiz, &progress()).await.unwrap();

        assert_eq!(repo.read_remote(&user, &quiz).await.unwrap(), Some(progress()));
        assert!(
            repo.read_remote(&UserId::new("u2"), &quiz)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(repo.progress_writes(), 2);
    }

    #[tokio::test]
    async fn unavailable_backend_fails_every_call() {
        let repo = InMemoryRepository::new();
        repo.set_available(false);
        let err = repo
            .read_remote(&UserId::new("u"), &QuizId::new("q"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Connection(_)));
    }

    #[tokio::test]
    async fn in_memory_storage_keeps_device_and_backend_apart() {
        let storage = Storage::in_memory();
        let user = UserId::new("u1");
        let quiz = QuizId::new("q1");
        storage.local.write_local(&quiz, &progress()).await.unwrap();

        assert!(storage.remote.read_remote(&user, &quiz).await.unwrap().is_none());
        assert!(storage.stats.get_stats(&user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn notes_are_unique_per_user_and_question() {
        let repo = InMemoryRepository::new();
        let user = UserId::new("u1");
        let first = repo
            .upsert_note(&user, QuestionId::new(3), "remember", fixed_now())
            .await
            .unwrap();
        let second = repo
            .upsert_note(&user, QuestionId::new(3), "", fixed_now())
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.content, "");
        assert_eq!(repo.list_notes(&user).await.unwrap().len(), 1);

        repo.delete_note(&user, second.id).await.unwrap();
        assert!(
            repo.get_note(&user, QuestionId::new(3))
                .await
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            repo.delete_note(&user, second.id).await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn saved_questions_are_filtered_to_the_asked_ids() {
        let repo = InMemoryRepository::new();
        let user = UserId::new("u1");
        repo.save_question(&user, QuestionId::new(2)).unwrap();
        repo.save_question(&user, QuestionId::new(9)).unwrap();
        repo.save_question(&UserId::new("u2"), QuestionId::new(1)).unwrap();

        let saved = repo
            .saved_question_ids(&user, &[QuestionId::new(1), QuestionId::new(2), QuestionId::new(3)])
            .await
            .unwrap();
        assert_eq!(saved.into_iter().collect::<Vec<_>>(), vec![QuestionId::new(2)]);
    }
}
