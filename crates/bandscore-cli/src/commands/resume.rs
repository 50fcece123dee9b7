//! The `bandscore resume` command.

use std::path::PathBuf;

use anyhow::Result;
use uuid::Uuid;

use bandscore_core::orchestrator::SubmissionContext;

use crate::StoreArgs;

pub async fn execute(tests: PathBuf, attempt_id: Uuid, user: String, store: StoreArgs) -> Result<()> {
    let orchestrator = super::build_orchestrator(&tests, &store)?;
    let ctx = SubmissionContext::new(user, attempt_id);

    match orchestrator.resume(&ctx).await? {
        Some(result) => super::print_result(&result),
        None => {
            let record = orchestrator.get_attempt(attempt_id).await?;
            match record.attempt.current_module() {
                Some(next) => println!("Next module: {next}"),
                None => println!("Attempt {}", record.attempt.stage),
            }
        }
    }
    Ok(())
}
