#![forbid(unsafe_code)]

pub mod model;
pub mod scoring;
pub mod session;
pub mod time;

pub use scoring::{Grade, Score};
pub use session::{Phase, QuizMode, QuizSession, SessionError};
pub use time::Clock;
