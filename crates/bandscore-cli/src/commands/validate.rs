//! The `bandscore validate` command.

use std::path::PathBuf;

use anyhow::Result;

use bandscore_core::model::ModuleKind;
use bandscore_core::parser;

pub fn execute(tests_path: PathBuf) -> Result<()> {
    let tests = parser::load_tests(&tests_path)?;

    for test in &tests {
        let modules: Vec<String> = ModuleKind::ALL
            .iter()
            .filter(|m| test.offers(**m))
            .map(|m| m.to_string())
            .collect();
        println!("Test: {} [{}] ({})", test.name, test.id, modules.join(", "));
    }

    let warnings = parser::validate_catalog(&tests);
    for w in &warnings {
        println!("  [{}] WARNING: {}", w.test_id, w.message);
    }

    if tests.is_empty() {
        println!("No test definitions found.");
    } else if warnings.is_empty() {
        println!("All test definitions valid.");
    } else {
        println!("\n{} warning(s) found.", warnings.len());
    }

    Ok(())
}
