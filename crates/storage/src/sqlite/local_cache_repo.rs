use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

use crate::codec;
use crate::repository::{LocalProgressCache, StorageError};
use quiz_core::model::{PersistedProgress, QuizId};

use super::SqliteRepository;

#[async_trait]
impl LocalProgressCache for SqliteRepository {
    async fn read_local(&self, quiz_id: &QuizId) -> Result<Option<PersistedProgress>, StorageError> {
        let row = sqlx::query("SELECT payload FROM local_progress WHERE key = ?1")
            .bind(quiz_id.local_cache_key())
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let payload: Vec<u8> = row
            .try_get("payload")
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        codec::decode(&payload).map(Some)
    }

    async fn write_local(
        &self,
        quiz_id: &QuizId,
        progress: &PersistedProgress,
    ) -> Result<(), StorageError> {
        let payload = codec::encode(progress)?;
        sqlx::query(
            r"
            INSERT INTO local_progress (key, payload, written_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                written_at = excluded.written_at
            ",
        )
        .bind(quiz_id.local_cache_key())
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Connection(err.to_string()))?;

        Ok(())
    }

    async fn delete_local(&self, quiz_id: &QuizId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM local_progress WHERE key = ?1")
            .bind(quiz_id.local_cache_key())
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Connection(err.to_string()))?;
        Ok(())
    }
}
