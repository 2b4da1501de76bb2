//! Byte encoding for cached progress.
//!
//! The cache stores the same JSON document the backend row carries, so a
//! payload copied between tiers decodes identically on both.

use quiz_core::model::PersistedProgress;

use crate::repository::StorageError;

/// # Errors
///
/// Returns `StorageError::Serialization` if the progress cannot be encoded.
pub fn encode(progress: &PersistedProgress) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(progress).map_err(|err| StorageError::Serialization(err.to_string()))
}

/// # Errors
///
/// Returns `StorageError::Serialization` if the bytes are not a progress document.
pub fn decode(bytes: &[u8]) -> Result<PersistedProgress, StorageError> {
    serde_json::from_slice(bytes).map_err(|err| StorageError::Serialization(err.to_string()))
}
