mod args;

use serde_json::json;
use tracing_subscriber::EnvFilter;

use args::{Args, ArgsError, Command, Env, print_usage};
use lesson_core::model::ModuleId;
use lesson_core::progression::{ProgressSignal, QuizSubmission};
use services::{AppServices, Clock, ModuleCatalog, ProgressionService};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("services=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn execute(
    svc: &ProgressionService,
    parsed: &Args,
    module_id: ModuleId,
) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let learner = parsed.learner_id;
    let index = parsed.lesson_index;

    let signal = match &parsed.command {
        Command::Status => {
            let summary = svc.module_summary(learner, module_id).await?;
            let lessons = svc.lesson_overview(learner, module_id).await?;
            return Ok(json!({ "summary": summary, "lessons": lessons }));
        }
        Command::Open => {
            let access = svc.access_lesson(learner, module_id, index).await?;
            let can_take_quiz = svc.can_take_quiz(learner, module_id, index).await?;
            return Ok(json!({
                "lesson": access.lesson,
                "progress": access.progress,
                "can_take_quiz": can_take_quiz,
            }));
        }
        Command::Quiz {
            answers,
            attempt_id,
        } => {
            let mut submission = QuizSubmission::new(answers.clone());
            if let Some(id) = attempt_id {
                submission = submission.with_attempt_id(*id);
            }
            let outcome = svc.submit_quiz(learner, module_id, index, submission).await?;
            return Ok(serde_json::to_value(outcome)?);
        }
        Command::Watch { percent } => ProgressSignal::VideoWatched(*percent),
        Command::Read => ProgressSignal::ContentRead,
        Command::Resource => ProgressSignal::ResourceAcknowledged,
    };

    let outcome = svc.report_progress(learner, module_id, index, signal).await?;
    Ok(serde_json::to_value(outcome)?)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let argv: Vec<String> = std::env::args().skip(1).collect();
    if matches!(argv.first().map(String::as_str), Some("--help" | "-h")) {
        print_usage();
        return Ok(());
    }

    let parsed = Args::parse(Env::from_process(), argv)?;

    let raw = std::fs::read_to_string(&parsed.module_path)?;
    let mut catalog = ModuleCatalog::new();
    let module_id = catalog.register_json(&raw)?.id();

    // Storage setup stays in the binary; core and services never touch the filesystem.
    prepare_sqlite_file(&parsed.db_url)?;
    let app = AppServices::new_sqlite(&parsed.db_url, Clock::default(), catalog).await?;
    let svc = app.progression();

    let output = execute(&svc, &parsed, module_id).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
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
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    Ok(())
}

/// Argument mistakes get the usage text along with the message.
fn is_usage_error(err: &(dyn std::error::Error + 'static)) -> bool {
    err.is::<ArgsError>()
}

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("{err}");
        if is_usage_error(err.as_ref()) {
            print_usage();
        }
        std::process::exit(2);
    }
}
