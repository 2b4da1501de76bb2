use std::fmt;
use std::path::PathBuf;

use quiz_core::model::{Question, QuizId, UserId};
use quiz_core::scoring::grade;
use quiz_core::time::format_elapsed;
use quiz_core::{QuizMode, QuizSession};
use services::{AppConfig, AppServices, Clock};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingQuizId { command: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
    InvalidUserId { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingQuizId { command } => write!(f, "{command} requires a quiz id"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  quiz-sync show   <quiz-id> [--db <sqlite_url>] [--user <id>]");
    eprintln!("  quiz-sync score  <quiz-id> --questions <file.json> [--db <sqlite_url>] [--user <id>]");
    eprintln!("  quiz-sync resync <quiz-id> [--db <sqlite_url>] [--user <id>]");
    eprintln!("  quiz-sync clear  <quiz-id> [--db <sqlite_url>] [--user <id>]");
    eprintln!("  quiz-sync notes  [--db <sqlite_url>] [--user <id>]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite:quiz-cache.sqlite3");
    eprintln!("  --user local");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  QUIZ_DB_URL, QUIZ_USER_ID, QUIZ_REMOTE_URL, QUIZ_REMOTE_KEY, QUIZ_LOG");
    eprintln!();
    eprintln!("Without QUIZ_REMOTE_URL and QUIZ_REMOTE_KEY only the progress cache in --db is kept;");
    eprintln!("notes, reports and stats live on the hosted backend, so resync and notes need it.");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Show,
    Score,
    Resync,
    Clear,
    Notes,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "show" => Some(Self::Show),
            "score" => Some(Self::Score),
            "resync" => Some(Self::Resync),
            "clear" => Some(Self::Clear),
            "notes" => Some(Self::Notes),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Score => "score",
            Self::Resync => "resync",
            Self::Clear => "clear",
            Self::Notes => "notes",
        }
    }

    fn needs_quiz(self) -> bool {
        !matches!(self, Self::Notes)
    }

    fn needs_remote(self) -> bool {
        matches!(self, Self::Resync | Self::Notes)
    }
}

struct Args {
    config: AppConfig,
    quiz_id: Option<QuizId>,
    questions: Option<PathBuf>,
}

impl Args {
    fn parse(
        cmd: Command,
        mut config: AppConfig,
        args: &mut impl Iterator<Item = String>,
    ) -> Result<Self, ArgsError> {
        config.db_url = normalize_sqlite_url(config.db_url);
        let mut quiz_id = None;
        let mut questions = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    config.db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(args, "--user")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidUserId { raw: value });
                    }
                    config.user_id = UserId::new(value.trim());
                }
                "--questions" => {
                    questions = Some(PathBuf::from(require_value(args, "--questions")?));
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                other if !other.starts_with("--") && quiz_id.is_none() && cmd.needs_quiz() => {
                    quiz_id = Some(QuizId::new(other));
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        if cmd.needs_quiz() && quiz_id.is_none() {
            return Err(ArgsError::MissingQuizId {
                command: cmd.name(),
            });
        }
        if cmd == Command::Score && questions.is_none() {
            return Err(ArgsError::MissingValue {
                flag: "--questions",
            });
        }

        Ok(Self {
            config,
            quiz_id,
            questions,
        })
    }

    fn quiz_id(&self) -> Result<QuizId, ArgsError> {
        self.quiz_id.clone().ok_or(ArgsError::MissingQuizId { command: "this command" })
    }
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("QUIZ_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_questions(path: &std::path::Path) -> Result<Vec<Question>, Box<dyn std::error::Error>> {
    let raw = std::fs::read(path)?;
    Ok(serde_json::from_slice(&raw)?)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();

    let cmd = match argv.first().map(String::as_str) {
        None | Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    let mut iter = argv.into_iter().skip(1);
    let parsed = Args::parse(cmd, AppConfig::from_env()?, &mut iter).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    // Open + migrate SQLite here so the services stay free of filesystem concerns.
    if cmd.needs_remote() && parsed.config.remote.is_none() {
        eprintln!(
            "{}: no remote configured (set QUIZ_REMOTE_URL and QUIZ_REMOTE_KEY)",
            cmd.name()
        );
        return Ok(());
    }

    prepare_sqlite_file(&parsed.config.db_url)?;
    let app = AppServices::new_sqlite(parsed.config.clone(), Clock::default_clock()).await?;

    match cmd {
        Command::Show => {
            let (source, progress) = app.reconciler(parsed.quiz_id()?).load(None).await;
            println!("source: {source:?}");
            println!("{}", serde_json::to_string_pretty(&progress)?);
        }
        Command::Score => {
            let quiz_id = parsed.quiz_id()?;
            let questions = match &parsed.questions {
                Some(path) => load_questions(path)?,
                None => Vec::new(),
            };
            let (_, progress) = app.reconciler(quiz_id.clone()).load(None).await;
            let (session, discarded) =
                QuizSession::restore(quiz_id, QuizMode::Practice, questions, progress);
            for id in &discarded {
                println!("discarded malformed answer for question {id}");
            }

            for (index, question) in session.questions().iter().enumerate() {
                let outcome = grade(
                    question,
                    session.answer(question.id),
                    session.self_evaluation(question.id),
                );
                println!(
                    "{:>3}. [{}] question {} -> {outcome:?}",
                    index + 1,
                    question.kind.label(),
                    question.id
                );
            }
            let score = session.score();
            println!(
                "score: {}/{} ({}%), answered {}/{}, elapsed {}, phase {}",
                score.earned,
                score.possible,
                score.percentage,
                session.answered_count(),
                session.questions().len(),
                format_elapsed(session.elapsed_seconds()),
                session.phase()
            );
        }
        Command::Resync => {
            let pushed = app
                .reconciler(parsed.quiz_id()?)
                .push_local_to_remote()
                .await;
            println!("{}", if pushed { "pushed" } else { "nothing pushed" });
        }
        Command::Clear => {
            let quiz_id = parsed.quiz_id()?;
            app.reconciler(quiz_id.clone()).discard().await;
            info!(quiz = %quiz_id, "cleared");
        }
        Command::Notes => {
            let notes = app.notes().list_notes().await?;
            if notes.is_empty() {
                println!("no notes");
            }
            for note in notes {
                println!(
                    "{}  question {}  {}",
                    note.created_at.format("%Y-%m-%d %H:%M"),
                    note.question_id,
                    note.content
                );
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use services::SyncSettings;

    fn base_config() -> AppConfig {
        AppConfig {
            db_url: "sqlite::memory:".into(),
            user_id: UserId::new("local"),
            remote: None,
            sync: SyncSettings::default(),
        }
    }

    fn parse(cmd: Command, args: &[&str]) -> Result<Args, ArgsError> {
        let mut iter = args.iter().map(|s| (*s).to_owned());
        Args::parse(cmd, base_config(), &mut iter)
    }

    #[test]
    fn flags_override_config() {
        let args = parse(Command::Show, &["cardio", "--user", "u-9", "--db", "sqlite::memory:"]).unwrap();
        assert_eq!(args.quiz_id.unwrap().as_str(), "cardio");
        assert_eq!(args.config.user_id.as_str(), "u-9");
        assert_eq!(args.config.db_url, "sqlite::memory:");
    }

    #[test]
    fn score_requires_questions_file() {
        assert!(matches!(
            parse(Command::Score, &["cardio"]),
            Err(ArgsError::MissingValue { flag: "--questions" })
        ));
        let args = parse(Command::Score, &["cardio", "--questions", "q.json"]).unwrap();
        assert_eq!(args.questions, Some(PathBuf::from("q.json")));
    }

    #[test]
    fn quiz_commands_require_an_id() {
        assert!(matches!(
            parse(Command::Clear, &[]),
            Err(ArgsError::MissingQuizId { command: "clear" })
        ));
        assert!(parse(Command::Notes, &[]).is_ok());
        assert!(matches!(
            parse(Command::Notes, &["stray"]),
            Err(ArgsError::UnknownArg(_))
        ));
    }

    #[test]
    fn backend_only_commands_are_flagged() {
        assert!(Command::Notes.needs_remote());
        assert!(Command::Resync.needs_remote());
        assert!(!Command::Show.needs_remote());
        assert!(!Command::Score.needs_remote());
        assert!(!Command::Clear.needs_remote());
    }

    #[test]
    fn relative_sqlite_paths_become_absolute() {
        let url = normalize_sqlite_url("sqlite:cache.sqlite3".into());
        assert!(url.starts_with("sqlite:///") || url.starts_with("sqlite://"));
        assert!(url.ends_with("cache.sqlite3"));
    }
}
