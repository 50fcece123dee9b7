pub mod init;
pub mod list_models;
pub mod rescore;
pub mod resume;
pub mod show;
pub mod start;
pub mod submit;
pub mod validate;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use bandscore_core::model::{
    FailureReason, ModuleKind, ModuleScore, OverallResult, TestAttempt,
};
use bandscore_core::orchestrator::{SessionObserver, SessionOrchestrator};
use bandscore_core::parser;
use bandscore_core::store::{AttemptRecord, JsonFileStore};
use bandscore_providers::{load_config_from, BandscoreConfig};

use crate::StoreArgs;

/// Console progress observer.
struct ConsoleObserver;

impl SessionObserver for ConsoleObserver {
    fn on_submitted(&self, attempt: &TestAttempt, module: ModuleKind) {
        eprintln!("  Evaluating: {} :: {module}", attempt.attempt_id);
    }

    fn on_scored(&self, _attempt: &TestAttempt, score: &ModuleScore) {
        if score.is_scored() {
            eprintln!("  Scored: {} band {:.1}", score.module, score.band);
        } else {
            eprintln!("  FAILED: {} could not be scored", score.module);
        }
    }

    fn on_completed(&self, _attempt: &TestAttempt, result: &OverallResult) {
        eprintln!("  Complete: overall band {:.1}", result.overall_band);
    }

    fn on_failed(&self, attempt: &TestAttempt, reason: &FailureReason) {
        eprintln!("  Attempt {} failed: {reason}", attempt.attempt_id);
    }
}

fn load_settings(args: &StoreArgs) -> Result<BandscoreConfig> {
    let mut config = load_config_from(args.config.as_deref())?;
    if let Some(dir) = &args.store {
        config.store_dir = dir.clone();
    }
    Ok(config)
}

pub(crate) fn open_store(args: &StoreArgs) -> Result<JsonFileStore> {
    Ok(JsonFileStore::new(load_settings(args)?.store_dir))
}

/// Wire up the orchestrator from config, test definitions and the file store.
pub(crate) fn build_orchestrator(tests: &Path, args: &StoreArgs) -> Result<SessionOrchestrator> {
    let config = load_settings(args)?;
    let definitions = parser::load_tests(tests)
        .with_context(|| format!("failed to load tests from {}", tests.display()))?;
    anyhow::ensure!(
        !definitions.is_empty(),
        "no test definitions found in {}",
        tests.display()
    );

    let store = Arc::new(JsonFileStore::new(config.store_dir.clone()));
    let orchestrator = SessionOrchestrator::new(
        store,
        config.evaluator_set()?,
        definitions,
        config.orchestrator_config(),
    )
    .with_observer(Arc::new(ConsoleObserver));
    Ok(orchestrator)
}

fn band_cell(score: &ModuleScore) -> Cell {
    if score.is_scored() {
        Cell::new(format!("{:.1}", score.band))
    } else {
        Cell::new("n/a")
    }
}

fn criteria_summary(score: &ModuleScore) -> String {
    if let Some(count) = score.correct_answers {
        return format!("{}/{} correct", count.correct, count.total);
    }
    score
        .criteria
        .iter()
        .map(|(name, value)| format!("{name} {value:.1}"))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn print_scores<'a>(scores: impl IntoIterator<Item = &'a ModuleScore>) {
    let mut table = Table::new();
    table.set_header(vec!["Module", "Band", "Status", "Details"]);
    for score in scores {
        let details = match &score.failure_detail {
            Some(detail) if !score.is_scored() => detail.clone(),
            _ => criteria_summary(score),
        };
        table.add_row(vec![
            Cell::new(score.module),
            band_cell(score),
            Cell::new(score.evaluation_status),
            Cell::new(details),
        ]);
    }
    println!("{table}");
}

pub(crate) fn print_result(result: &OverallResult) {
    print_scores(&result.module_scores);
    println!("Overall band: {:.1}", result.overall_band);
}

pub(crate) fn print_record(record: &AttemptRecord) {
    let attempt = &record.attempt;
    println!("Attempt {}", attempt.attempt_id);
    println!("  Test:   {} ({})", attempt.test_id, attempt.mode);
    println!("  User:   {}", attempt.user_id);
    println!("  Status: {} (stage: {})", attempt.status(), attempt.stage);
    if let Some(reason) = &attempt.failure_reason {
        println!("  Reason: {reason}");
    }

    match record.latest_result() {
        Some(result) => {
            println!();
            print_result(result);
        }
        None => {
            let scores = record.scores_in_order();
            if !scores.is_empty() {
                println!();
                print_scores(&scores);
            }
            if let Some(module) = attempt.current_module() {
                println!("Next module: {module}");
            }
        }
    }
}
