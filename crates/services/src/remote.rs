//! Hosted backend adapter speaking the PostgREST dialect (`/rest/v1/<table>`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quiz_core::model::{
    Note, NoteId, PersistedProgress, QuestionId, QuizId, Report, UserId, UserStats,
};
use std::collections::BTreeSet;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use storage::repository::{
    NoteRepository, RemoteProgressStore, ReportRepository, SavedQuestionRepository, StorageError,
    UserStatsRepository,
};
use url::Url;

use crate::config::RemoteConfig;

const PROGRESS_TABLE: &str = "quiz_progress";
const NOTES_TABLE: &str = "user_notes";
const REPORTS_TABLE: &str = "signalements";
const STATS_TABLE: &str = "user_stats";
const PLAYLIST_ITEMS_TABLE: &str = "playlist_questions";

const NOTE_KEY: &str = "user_id,question_id";

const UPSERT: &str = "resolution=merge-duplicates,return=minimal";
const UPSERT_RETURNING: &str = "resolution=merge-duplicates,return=representation";
const RETURN_ROWS: &str = "return=representation";

#[derive(Clone)]
pub struct RestBackend {
    client: Client,
    config: RemoteConfig,
}

impl RestBackend {
    #[must_use]
    pub fn new(config: RemoteConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn table_url(&self, table: &str, filters: &[(&str, String)]) -> Result<Url, StorageError> {
        table_url(&self.config.base_url, table, filters)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>, StorageError> {
        let response = self.request(Method::GET, url).send().await.map_err(connection)?;
        let response = check_status(response).await?;
        response.json().await.map_err(decoding)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        url: Url,
        prefer: &str,
        body: &B,
    ) -> Result<Response, StorageError> {
        let response = self
            .request(Method::POST, url)
            .header("Prefer", prefer)
            .json(body)
            .send()
            .await
            .map_err(connection)?;
        check_status(response).await
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{value}")
}

/// `in.(1,2,3)` filter over question ids.
fn in_list(ids: &[QuestionId]) -> String {
    let joined = ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

fn saved_questions_filters(
    user_id: &UserId,
    question_ids: &[QuestionId],
) -> Vec<(&'static str, String)> {
    vec![
        ("select", "question_id,playlists!inner(user_id)".into()),
        ("playlists.user_id", eq(user_id)),
        ("question_id", in_list(question_ids)),
    ]
}

fn table_url(base: &Url, table: &str, filters: &[(&str, String)]) -> Result<Url, StorageError> {
    let mut url = base
        .join(&format!("rest/v1/{table}"))
        .map_err(|err| StorageError::Connection(err.to_string()))?;
    if !filters.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in filters {
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

fn connection(err: reqwest::Error) -> StorageError {
    StorageError::Connection(err.to_string())
}

fn decoding(err: reqwest::Error) -> StorageError {
    if err.is_decode() {
        StorageError::Serialization(err.to_string())
    } else {
        StorageError::Connection(err.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::CONFLICT {
        return Err(StorageError::Conflict);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Connection(format!("HTTP {status}: {body}")))
}

//
// ─── ROWS ──────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Serialize)]
struct ProgressUpsert<'a> {
    user_id: &'a UserId,
    quiz_id: &'a QuizId,
    answers: &'a PersistedProgress,
    current_question_index: usize,
    status: &'static str,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ProgressRow {
    answers: PersistedProgress,
    updated_at: Option<DateTime<Utc>>,
}

impl ProgressRow {
    /// The row's own timestamp is authoritative over the one inside the blob.
    fn into_progress(self) -> PersistedProgress {
        let mut progress = self.answers;
        if self.updated_at.is_some() {
            progress.updated_at = self.updated_at;
        }
        progress
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NoteRow {
    id: NoteId,
    user_id: UserId,
    question_id: QuestionId,
    content: String,
    created_at: DateTime<Utc>,
}

impl From<NoteRow> for Note {
    fn from(row: NoteRow) -> Self {
        Note {
            id: row.id,
            user_id: row.user_id,
            question_id: row.question_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct NoteUpsert<'a> {
    user_id: &'a UserId,
    question_id: QuestionId,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ReportInsert<'a> {
    user_id: &'a UserId,
    quiz_id: &'a QuizId,
    question_id: QuestionId,
    kind: &'static str,
    description: &'a str,
    created_at: DateTime<Utc>,
}

impl<'a> ReportInsert<'a> {
    fn new(user_id: &'a UserId, report: &'a Report) -> Self {
        Self {
            user_id,
            quiz_id: report.quiz_id(),
            question_id: report.question_id(),
            kind: report.kind(),
            description: report.description(),
            created_at: report.submitted_at(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StatsRow {
    user_id: UserId,
    quizzes_completed: u32,
    total_points: u64,
    average_score: f64,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SavedQuestionRow {
    question_id: QuestionId,
}

impl From<StatsRow> for UserStats {
    fn from(row: StatsRow) -> Self {
        UserStats {
            quizzes_completed: row.quizzes_completed,
            total_points: row.total_points,
            average_score: row.average_score,
            updated_at: row.updated_at,
        }
    }
}

//
// ─── CONTRACTS ─────────────────────────────────────────────────────────────────
//

#[async_trait]
impl RemoteProgressStore for RestBackend {
    async fn read_remote(
        &self,
        user_id: &UserId,
        quiz_id: &QuizId,
    ) -> Result<Option<PersistedProgress>, StorageError> {
        let url = self.table_url(
            PROGRESS_TABLE,
            &[
                ("select", "answers,updated_at".into()),
                ("user_id", eq(user_id)),
                ("quiz_id", eq(quiz_id)),
                ("limit", "1".into()),
            ],
        )?;
        let rows: Vec<ProgressRow> = self.fetch_rows(url).await?;
        Ok(rows.into_iter().next().map(ProgressRow::into_progress))
    }

    async fn upsert_remote(
        &self,
        user_id: &UserId,
        quiz_id: &QuizId,
        progress: &PersistedProgress,
    ) -> Result<(), StorageError> {
        let url = self.table_url(PROGRESS_TABLE, &[("on_conflict", "user_id,quiz_id".into())])?;
        let body = ProgressUpsert {
            user_id,
            quiz_id,
            answers: progress,
            current_question_index: progress.current_index,
            status: progress.status(),
            updated_at: progress.updated_at,
        };
        self.post(url, UPSERT, &body).await?;
        Ok(())
    }

    async fn delete_remote(&self, user_id: &UserId, quiz_id: &QuizId) -> Result<(), StorageError> {
        let url = self.table_url(
            PROGRESS_TABLE,
            &[("user_id", eq(user_id)), ("quiz_id", eq(quiz_id))],
        )?;
        let response = self
            .request(Method::DELETE, url)
            .send()
            .await
            .map_err(connection)?;
        check_status(response).await?;
        Ok(())
    }
}

#[async_trait]
impl NoteRepository for RestBackend {
    async fn get_note(
        &self,
        user_id: &UserId,
        question_id: QuestionId,
    ) -> Result<Option<Note>, StorageError> {
        let url = self.table_url(
            NOTES_TABLE,
            &[
                ("user_id", eq(user_id)),
                ("question_id", eq(question_id)),
                ("limit", "1".into()),
            ],
        )?;
        let rows: Vec<NoteRow> = self.fetch_rows(url).await?;
        Ok(rows.into_iter().next().map(Note::from))
    }

    /// One round trip keyed on (user, question). The row defaults assign `id`
    /// and `created_at` on insert; an existing row keeps both.
    async fn upsert_note(
        &self,
        user_id: &UserId,
        question_id: QuestionId,
        content: &str,
        _now: DateTime<Utc>,
    ) -> Result<Note, StorageError> {
        let url = self.table_url(NOTES_TABLE, &[("on_conflict", NOTE_KEY.into())])?;
        let body = NoteUpsert {
            user_id,
            question_id,
            content,
        };
        let rows: Vec<NoteRow> = self
            .post(url, UPSERT_RETURNING, &body)
            .await?
            .json()
            .await
            .map_err(decoding)?;
        rows.into_iter()
            .next()
            .map(Note::from)
            .ok_or_else(|| StorageError::Serialization("note upsert returned no row".into()))
    }

    async fn delete_note(&self, user_id: &UserId, note_id: NoteId) -> Result<(), StorageError> {
        let url = self.table_url(
            NOTES_TABLE,
            &[("id", eq(note_id)), ("user_id", eq(user_id))],
        )?;
        let response = self
            .request(Method::DELETE, url)
            .header("Prefer", RETURN_ROWS)
            .send()
            .await
            .map_err(connection)?;
        let deleted: Vec<NoteRow> = check_status(response)
            .await?
            .json()
            .await
            .map_err(decoding)?;
        if deleted.is_empty() {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn list_notes(&self, user_id: &UserId) -> Result<Vec<Note>, StorageError> {
        let url = self.table_url(
            NOTES_TABLE,
            &[("user_id", eq(user_id)), ("order", "created_at.desc".into())],
        )?;
        let rows: Vec<NoteRow> = self.fetch_rows(url).await?;
        Ok(rows.into_iter().map(Note::from).collect())
    }
}

#[async_trait]
impl ReportRepository for RestBackend {
    async fn append_report(&self, user_id: &UserId, report: &Report) -> Result<(), StorageError> {
        let url = self.table_url(REPORTS_TABLE, &[])?;
        self.post(url, "return=minimal", &ReportInsert::new(user_id, report))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserStatsRepository for RestBackend {
    async fn get_stats(&self, user_id: &UserId) -> Result<Option<UserStats>, StorageError> {
        let url = self.table_url(STATS_TABLE, &[("user_id", eq(user_id)), ("limit", "1".into())])?;
        let rows: Vec<StatsRow> = self.fetch_rows(url).await?;
        Ok(rows.into_iter().next().map(UserStats::from))
    }

    async fn save_stats(&self, user_id: &UserId, stats: &UserStats) -> Result<(), StorageError> {
        let url = self.table_url(STATS_TABLE, &[("on_conflict", "user_id".into())])?;
        let row = StatsRow {
            user_id: user_id.clone(),
            quizzes_completed: stats.quizzes_completed,
            total_points: stats.total_points,
            average_score: stats.average_score,
            updated_at: stats.updated_at,
        };
        self.post(url, UPSERT, &row).await?;
        Ok(())
    }
}

#[async_trait]
impl SavedQuestionRepository for RestBackend {
    async fn saved_question_ids(
        &self,
        user_id: &UserId,
        question_ids: &[QuestionId],
    ) -> Result<BTreeSet<QuestionId>, StorageError> {
        if question_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let url = self.table_url(
            PLAYLIST_ITEMS_TABLE,
            &saved_questions_filters(user_id, question_ids),
        )?;
        let rows: Vec<SavedQuestionRow> = self.fetch_rows(url).await?;
        Ok(rows.into_iter().map(|row| row.question_id).collect())
    }
}
