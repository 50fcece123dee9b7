//! The `bandscore submit` command.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

use bandscore_core::model::{ModuleAnswerSet, ModuleKind};
use bandscore_core::orchestrator::SubmissionContext;

use crate::StoreArgs;

pub async fn execute(
    tests: PathBuf,
    attempt_id: Uuid,
    user: String,
    module: ModuleKind,
    answers: String,
    store: StoreArgs,
) -> Result<()> {
    let answers = parse_answers(module, &answers)?;
    let orchestrator = super::build_orchestrator(&tests, &store)?;
    let ctx = SubmissionContext::new(user, attempt_id);

    let outcome = orchestrator.submit_module(&ctx, module, answers).await?;

    match &outcome.result {
        Some(result) => super::print_result(result),
        None => {
            super::print_scores([&outcome.score]);
            match outcome.attempt.current_module() {
                Some(next) => println!("Next module: {next}"),
                None => match &outcome.attempt.failure_reason {
                    Some(reason) => println!("Attempt failed: {reason}"),
                    None => println!("Attempt {}", outcome.attempt.stage),
                },
            }
        }
    }
    Ok(())
}

/// Read answers for `module` from inline JSON or a JSON file.
///
/// Listening and reading take an object of question id → answer; writing
/// and speaking take an array of task or part responses.
fn parse_answers(module: ModuleKind, raw: &str) -> Result<ModuleAnswerSet> {
    let trimmed = raw.trim_start();
    let content = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        raw.to_string()
    } else {
        std::fs::read_to_string(Path::new(raw))
            .with_context(|| format!("failed to read answers file: {raw}"))?
    };

    let value: serde_json::Value =
        serde_json::from_str(&content).context("answers are not valid JSON")?;
    let tagged = serde_json::json!({ "module": module, "answers": value });
    serde_json::from_value(tagged)
        .with_context(|| format!("answers do not match the {module} answer format"))
}
