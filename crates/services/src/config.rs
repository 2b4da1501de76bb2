use std::env;
use std::time::Duration;

use quiz_core::model::UserId;
use url::Url;

/// Timing knobs for background persistence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    debounce: Duration,
    max_wait: Duration,
    tick_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(1000),
            max_wait: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Upper bound on how long a continuous stream of changes may postpone a write.
    /// Never shorter than the debounce delay.
    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        self.max_wait.max(self.debounce)
    }

    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}

/// Connection details for the hosted backend.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub base_url: Url,
    pub api_key: String,
}

impl RemoteConfig {
    /// # Errors
    ///
    /// Returns `url::ParseError` if `base_url` is not an absolute URL.
    pub fn new(base_url: &str, api_key: impl Into<String>) -> Result<Self, url::ParseError> {
        let mut base_url = Url::parse(base_url.trim())?;
        // `Url::join` drops the last segment unless the path ends with a slash.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            api_key: api_key.into(),
        })
    }

    /// Reads `QUIZ_REMOTE_URL` and `QUIZ_REMOTE_KEY`.
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if a key is set but the URL is not valid.
    pub fn from_env() -> Result<Option<Self>, url::ParseError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, url::ParseError> {
        let Some(api_key) = lookup("QUIZ_REMOTE_KEY").filter(|key| !key.trim().is_empty()) else {
            return Ok(None);
        };
        let Some(base_url) = lookup("QUIZ_REMOTE_URL").filter(|url| !url.trim().is_empty()) else {
            return Ok(None);
        };
        Self::new(&base_url, api_key.trim()).map(Some)
    }
}

pub const DEFAULT_DB_URL: &str = "sqlite:quiz-cache.sqlite3";
pub const DEFAULT_USER_ID: &str = "local";

/// Everything needed to assemble `AppServices`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub db_url: String,
    pub user_id: UserId,
    pub remote: Option<RemoteConfig>,
    pub sync: SyncSettings,
}

impl AppConfig {
    /// Reads `QUIZ_DB_URL`, `QUIZ_USER_ID` and the remote variables.
    ///
    /// # Errors
    ///
    /// Returns `url::ParseError` if the remote URL is invalid.
    pub fn from_env() -> Result<Self, url::ParseError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, url::ParseError> {
        let db_url = lookup("QUIZ_DB_URL")
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DB_URL.into());
        let user_id = lookup("QUIZ_USER_ID")
            .filter(|id| !id.trim().is_empty())
            .map_or_else(|| UserId::new(DEFAULT_USER_ID), |id| UserId::new(id.trim()));
        Ok(Self {
            db_url,
            user_id,
            remote: RemoteConfig::from_lookup(&lookup)?,
            sync: SyncSettings::default(),
        })
    }
}
