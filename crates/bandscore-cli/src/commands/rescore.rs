//! The `bandscore rescore` command.

use std::path::PathBuf;

use anyhow::Result;
use uuid::Uuid;

use bandscore_core::orchestrator::SubmissionContext;

use crate::StoreArgs;

pub async fn execute(tests: PathBuf, attempt_id: Uuid, user: String, store: StoreArgs) -> Result<()> {
    let orchestrator = super::build_orchestrator(&tests, &store)?;
    let ctx = SubmissionContext::new(user, attempt_id);

    let result = orchestrator.rescore(&ctx).await?;
    super::print_result(&result);
    Ok(())
}
