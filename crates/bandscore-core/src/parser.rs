//! TOML test definition parser.
//!
//! Loads test definitions (answer keys, writing tasks, speaking parts) from
//! TOML files and directories, and validates them.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{ObjectiveSection, SpeakingPart, TestDefinition, WritingTask};

/// Intermediate TOML structure for parsing test definition files.
#[derive(Debug, Deserialize)]
struct TomlTestFile {
    test: TomlTestHeader,
    #[serde(default)]
    listening: Option<TomlObjective>,
    #[serde(default)]
    reading: Option<TomlObjective>,
    #[serde(default)]
    writing: Option<TomlWriting>,
    #[serde(default)]
    speaking: Option<TomlSpeaking>,
}

#[derive(Debug, Deserialize)]
struct TomlTestHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TomlObjective {
    #[serde(default)]
    answers: BTreeMap<String, TomlAccepted>,
}

/// A key entry is either one accepted answer or a list of variants.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlAccepted {
    One(String),
    Many(Vec<String>),
}

impl TomlAccepted {
    fn into_variants(self) -> Vec<String> {
        match self {
            TomlAccepted::One(answer) => vec![answer],
            TomlAccepted::Many(answers) => answers,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TomlWriting {
    #[serde(default)]
    tasks: Vec<TomlWritingTask>,
}

#[derive(Debug, Deserialize)]
struct TomlWritingTask {
    id: String,
    prompt: String,
    #[serde(default)]
    min_words: u32,
}

#[derive(Debug, Deserialize)]
struct TomlSpeaking {
    #[serde(default)]
    parts: Vec<TomlSpeakingPart>,
}

#[derive(Debug, Deserialize)]
struct TomlSpeakingPart {
    id: String,
    prompt: String,
}

/// Parse a single TOML file into a `TestDefinition`.
pub fn parse_test_definition(path: &Path) -> Result<TestDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read test definition: {}", path.display()))?;

    parse_test_definition_str(&content, path)
}

/// Parse a TOML string into a `TestDefinition` (useful for testing).
pub fn parse_test_definition_str(content: &str, source_path: &Path) -> Result<TestDefinition> {
    let parsed: TomlTestFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let objective = |section: Option<TomlObjective>| {
        section.map(|s| ObjectiveSection {
            answers: s
                .answers
                .into_iter()
                .map(|(question, accepted)| (question, accepted.into_variants()))
                .collect(),
        })
    };

    Ok(TestDefinition {
        id: parsed.test.id,
        name: parsed.test.name,
        description: parsed.test.description,
        listening: objective(parsed.listening),
        reading: objective(parsed.reading),
        writing_tasks: parsed
            .writing
            .map(|w| w.tasks)
            .unwrap_or_default()
            .into_iter()
            .map(|t| WritingTask {
                id: t.id,
                prompt: t.prompt,
                min_words: t.min_words,
            })
            .collect(),
        speaking_parts: parsed
            .speaking
            .map(|s| s.parts)
            .unwrap_or_default()
            .into_iter()
            .map(|p| SpeakingPart {
                id: p.id,
                prompt: p.prompt,
            })
            .collect(),
    })
}

/// Recursively load all `.toml` test definitions from a directory.
pub fn load_test_directory(dir: &Path) -> Result<Vec<TestDefinition>> {
    let mut tests = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            tests.extend(load_test_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_test_definition(&path) {
                Ok(test) => tests.push(test),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(tests)
}

/// Load one file or every file under a directory.
pub fn load_tests(path: &Path) -> Result<Vec<TestDefinition>> {
    if path.is_dir() {
        load_test_directory(path)
    } else {
        Ok(vec![parse_test_definition(path)?])
    }
}

/// A warning from test definition validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The test ID.
    pub test_id: String,
    /// Warning message.
    pub message: String,
}

/// Validate a test definition for common issues.
pub fn validate_test_definition(test: &TestDefinition) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let mut warn = |message: String| {
        warnings.push(ValidationWarning {
            test_id: test.id.clone(),
            message,
        })
    };

    if test.listening.is_none()
        && test.reading.is_none()
        && test.writing_tasks.is_empty()
        && test.speaking_parts.is_empty()
    {
        warn("test defines no modules".into());
    }

    for (name, section) in [("listening", &test.listening), ("reading", &test.reading)] {
        let Some(section) = section else { continue };
        if section.answers.is_empty() {
            warn(format!("{name} answer key is empty"));
        }
        for (question, accepted) in &section.answers {
            if accepted.iter().all(|a| a.trim().is_empty()) {
                warn(format!("{name} question {question} has no accepted answer"));
            }
        }
    }

    let mut seen = HashSet::new();
    for task in &test.writing_tasks {
        if !seen.insert(&task.id) {
            warn(format!("duplicate writing task ID: {}", task.id));
        }
        if task.prompt.trim().is_empty() {
            warn(format!("writing task {} has an empty prompt", task.id));
        }
    }

    let mut seen = HashSet::new();
    for part in &test.speaking_parts {
        if !seen.insert(&part.id) {
            warn(format!("duplicate speaking part ID: {}", part.id));
        }
        if part.prompt.trim().is_empty() {
            warn(format!("speaking part {} has an empty prompt", part.id));
        }
    }

    warnings
}

/// Warnings that span several definitions, such as reused test IDs.
pub fn validate_catalog(tests: &[TestDefinition]) -> Vec<ValidationWarning> {
    let mut warnings: Vec<ValidationWarning> =
        tests.iter().flat_map(validate_test_definition).collect();
    let mut seen = HashSet::new();
    for test in tests {
        if !seen.insert(&test.id) {
            warnings.push(ValidationWarning {
                test_id: test.id.clone(),
                message: format!("duplicate test ID: {}", test.id),
            });
        }
    }
    warnings
}
