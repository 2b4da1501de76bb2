#![forbid(unsafe_code)]

pub mod annotations;
pub mod app_services;
pub mod config;
pub mod debounce;
pub mod error;
pub mod player;
pub mod reachability;
pub mod reconciler;
pub mod remote;
pub mod stats_service;

pub use quiz_core::Clock;

pub use annotations::{NoteService, ReportService, SavedQuestionService};
pub use app_services::AppServices;
pub use config::{AppConfig, RemoteConfig, SyncSettings};
pub use debounce::Debouncer;
pub use error::{AnnotationError, AppServicesError, PlayerError};
pub use player::{CompletionHandler, QuizPlayer};
pub use reachability::Reachability;
pub use reconciler::ProgressReconciler;
pub use remote::RestBackend;
pub use stats_service::UserStatsService;
