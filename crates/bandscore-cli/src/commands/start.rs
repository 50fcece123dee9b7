//! The `bandscore start` command.

use std::path::PathBuf;

use anyhow::Result;

use bandscore_core::model::{ModuleKind, TestMode};

use crate::StoreArgs;

pub async fn execute(
    tests: PathBuf,
    test_id: String,
    user: String,
    module: Option<ModuleKind>,
    store: StoreArgs,
) -> Result<()> {
    let orchestrator = super::build_orchestrator(&tests, &store)?;
    let mode = module.map(TestMode::Practice).unwrap_or(TestMode::FullTest);

    let attempt = orchestrator.start_attempt(&user, &test_id, mode).await?;

    println!("Attempt {} started ({mode})", attempt.attempt_id);
    let modules: Vec<String> = mode.required_modules().iter().map(|m| m.to_string()).collect();
    println!("Modules: {}", modules.join(" → "));
    if let Some(next) = attempt.current_module() {
        println!("Next module: {next}");
    }
    Ok(())
}
