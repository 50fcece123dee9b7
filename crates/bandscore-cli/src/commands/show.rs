//! The `bandscore show` command.

use anyhow::{Context, Result};
use uuid::Uuid;

use bandscore_core::report::LearnerReport;
use bandscore_core::store::ResultStore;

use crate::{OutputFormat, StoreArgs};

pub async fn execute(attempt_id: Uuid, format: OutputFormat, store: StoreArgs) -> Result<()> {
    let store = super::open_store(&store)?;
    let record = store
        .get_attempt(attempt_id)
        .await?
        .with_context(|| format!("attempt not found: {attempt_id}"))?;

    match format {
        OutputFormat::Table => super::print_record(&record),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&record)?),
        OutputFormat::Markdown => match record.latest_result() {
            Some(result) => print!("{}", LearnerReport::from_result(result).to_markdown()),
            None => anyhow::bail!(
                "attempt {attempt_id} has no result yet (status: {})",
                record.attempt.status()
            ),
        },
    }
    Ok(())
}
