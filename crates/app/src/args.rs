use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use lesson_core::model::{AttemptId, LearnerId, QuestionId};

pub const DEFAULT_DB_URL: &str = "sqlite://lessons.sqlite3";

#[derive(Debug, PartialEq, Eq)]
pub enum ArgsError {
    MissingCommand,
    UnknownCommand(String),
    MissingValue { flag: &'static str },
    MissingPositional { command: &'static str, what: &'static str },
    UnknownArg(String),
    MissingModule,
    InvalidLearnerId { raw: String },
    InvalidLessonIndex { raw: String },
    InvalidPercent { raw: String },
    InvalidAnswers { raw: String },
    InvalidAttemptId { raw: String },
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingCommand => write!(f, "missing command"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingPositional { command, what } => {
                write!(f, "{command} requires <{what}>")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingModule => {
                write!(f, "no module definition given (use --module or LESSON_MODULE)")
            }
            ArgsError::InvalidLearnerId { raw } => write!(f, "invalid --learner value: {raw}"),
            ArgsError::InvalidLessonIndex { raw } => write!(f, "invalid --lesson value: {raw}"),
            ArgsError::InvalidPercent { raw } => write!(f, "invalid percent: {raw}"),
            ArgsError::InvalidAnswers { raw } => {
                write!(f, "invalid answers (expected question=option,...): {raw}")
            }
            ArgsError::InvalidAttemptId { raw } => write!(f, "invalid --attempt value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

/// What the learner is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Open,
    Watch { percent: u8 },
    Read,
    Resource,
    Quiz {
        answers: BTreeMap<QuestionId, usize>,
        attempt_id: Option<AttemptId>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Open => "open",
            Command::Watch { .. } => "watch",
            Command::Read => "read",
            Command::Resource => "resource",
            Command::Quiz { .. } => "quiz",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Args {
    pub command: Command,
    pub db_url: String,
    pub module_path: PathBuf,
    pub learner_id: LearnerId,
    pub lesson_index: usize,
}

/// Environment defaults, overridable by flags.
#[derive(Debug, Clone, Default)]
pub struct Env {
    pub db_url: Option<String>,
    pub module: Option<String>,
    pub learner_id: Option<String>,
}

impl Env {
    pub fn from_process() -> Self {
        Self {
            db_url: std::env::var("LESSON_DB_URL").ok(),
            module: std::env::var("LESSON_MODULE").ok(),
            learner_id: std::env::var("LESSON_LEARNER_ID").ok(),
        }
    }
}

pub fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  app <command> [--db <sqlite_url>] [--module <file.json>] [--learner <id>] [--lesson <index>]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                      module summary and per-lesson status");
    eprintln!("  open                        open a lesson (fails if locked)");
    eprintln!("  watch <percent>             report video progress");
    eprintln!("  read                        acknowledge reading a content lesson");
    eprintln!("  resource                    acknowledge a content lesson's resource");
    eprintln!("  quiz <q=opt,...> [--attempt <uuid>]");
    eprintln!("                              submit quiz answers");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db {DEFAULT_DB_URL}");
    eprintln!("  --learner 1");
    eprintln!("  --lesson 0");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  LESSON_DB_URL, LESSON_MODULE, LESSON_LEARNER_ID, RUST_LOG");
}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_learner(raw: String) -> Result<LearnerId, ArgsError> {
    raw.parse()
        .map_err(|_| ArgsError::InvalidLearnerId { raw })
}

fn parse_percent(raw: String) -> Result<u8, ArgsError> {
    raw.trim()
        .trim_end_matches('%')
        .parse()
        .map_err(|_| ArgsError::InvalidPercent { raw })
}

/// Parse `1=0,2=3` into question id → chosen option index.
pub fn parse_answers(raw: &str) -> Result<BTreeMap<QuestionId, usize>, ArgsError> {
    let invalid = || ArgsError::InvalidAnswers {
        raw: raw.to_string(),
    };
    let mut answers = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (question, option) = pair.split_once('=').ok_or_else(invalid)?;
        let question: QuestionId = question.parse().map_err(|_| invalid())?;
        let option: usize = option.trim().parse().map_err(|_| invalid())?;
        if answers.insert(question, option).is_some() {
            return Err(invalid());
        }
    }
    Ok(answers)
}

impl Args {
    pub fn parse(env: Env, argv: impl IntoIterator<Item = String>) -> Result<Self, ArgsError> {
        let mut args = argv.into_iter();
        let name = args.next().ok_or(ArgsError::MissingCommand)?;

        let mut db_url = env
            .db_url
            .map_or_else(|| DEFAULT_DB_URL.to_string(), normalize_sqlite_url);
        let mut module_path = env.module.map(PathBuf::from);
        let mut learner_id = match env.learner_id {
            Some(raw) => parse_learner(raw)?,
            None => LearnerId::new(1),
        };
        let mut lesson_index = 0;
        let mut attempt_id = None;
        let mut positional: Vec<String> = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--module" => module_path = Some(require_value(&mut args, "--module")?.into()),
                "--learner" => learner_id = parse_learner(require_value(&mut args, "--learner")?)?,
                "--lesson" => {
                    let value = require_value(&mut args, "--lesson")?;
                    lesson_index = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidLessonIndex { raw: value.clone() })?;
                }
                "--attempt" => {
                    let value = require_value(&mut args, "--attempt")?;
                    let parsed = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidAttemptId { raw: value.clone() })?;
                    attempt_id = Some(parsed);
                }
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let command = match name.as_str() {
            "status" => Command::Status,
            "open" => Command::Open,
            "read" => Command::Read,
            "resource" => Command::Resource,
            "watch" => {
                let raw = positional.next().ok_or(ArgsError::MissingPositional {
                    command: "watch",
                    what: "percent",
                })?;
                Command::Watch {
                    percent: parse_percent(raw)?,
                }
            }
            "quiz" => {
                let raw = positional.next().ok_or(ArgsError::MissingPositional {
                    command: "quiz",
                    what: "answers",
                })?;
                Command::Quiz {
                    answers: parse_answers(&raw)?,
                    attempt_id,
                }
            }
            _ => return Err(ArgsError::UnknownCommand(name)),
        };
        if let Some(extra) = positional.next() {
            return Err(ArgsError::UnknownArg(extra));
        }
        if attempt_id.is_some() && command.name() != "quiz" {
            return Err(ArgsError::UnknownArg("--attempt".into()));
        }

        Ok(Self {
            command,
            db_url,
            module_path: module_path.ok_or(ArgsError::MissingModule)?,
            learner_id,
            lesson_index,
        })
    }
}

pub fn normalize_sqlite_url(raw: String) -> String {
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
