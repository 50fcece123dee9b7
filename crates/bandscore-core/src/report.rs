//! Learner-facing view of an overall result, with JSON export.
//!
//! Operator-only details (failure reasons from providers, retry counts) are
//! left out; an unscored module shows only its note.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{CorrectCount, EvaluationStatus, ModuleKind, OverallResult};

/// What a learner sees for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerReport {
    pub result_id: Uuid,
    pub attempt_id: Uuid,
    pub overall_band: f64,
    pub modules: Vec<ModuleSummary>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSummary {
    pub module: ModuleKind,
    /// `None` when the module could not be scored.
    pub band: Option<f64>,
    pub status: EvaluationStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub criteria: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<CorrectCount>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl LearnerReport {
    pub fn from_result(result: &OverallResult) -> Self {
        let modules = result
            .module_scores
            .iter()
            .map(|score| {
                let feedback = result.feedback.iter().find(|f| f.module == score.module);
                ModuleSummary {
                    module: score.module,
                    band: score.is_scored().then_some(score.band),
                    status: score.evaluation_status,
                    criteria: score.criteria.clone(),
                    correct_answers: score.correct_answers,
                    strengths: feedback.map(|f| f.strengths.clone()).unwrap_or_default(),
                    improvements: feedback.map(|f| f.improvements.clone()).unwrap_or_default(),
                    note: feedback.and_then(|f| f.note.clone()),
                }
            })
            .collect();

        Self {
            result_id: result.id,
            attempt_id: result.attempt_id,
            overall_band: result.overall_band,
            modules,
            created_at: result.created_at,
        }
    }

    /// Whether any module is missing from the overall band.
    pub fn is_partial(&self) -> bool {
        self.modules.iter().any(|m| m.band.is_none())
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: LearnerReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }

    /// Render as Markdown.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Overall band: {:.1}\n\n", self.overall_band));
        if self.is_partial() {
            out.push_str("_Some modules could not be scored; this is a partial result._\n\n");
        }

        for module in &self.modules {
            let band = module
                .band
                .map(|b| format!("{b:.1}"))
                .unwrap_or_else(|| "n/a".to_string());
            out.push_str(&format!(
                "## {} ({band})\n",
                capitalize(&module.module.to_string())
            ));

            if let Some(note) = &module.note {
                out.push_str(&format!("\n{note}\n"));
            }
            if let Some(count) = module.correct_answers {
                out.push_str(&format!("\n{} of {} correct\n", count.correct, count.total));
            }
            if !module.criteria.is_empty() {
                out.push('\n');
                for (name, score) in &module.criteria {
                    out.push_str(&format!("- {}: {score:.1}\n", name.replace('_', " ")));
                }
            }
            for (heading, items) in [
                ("Strengths", &module.strengths),
                ("To improve", &module.improvements),
            ] {
                if items.is_empty() {
                    continue;
                }
                out.push_str(&format!("\n**{heading}**\n"));
                for item in items {
                    out.push_str(&format!("- {item}\n"));
                }
            }
            out.push('\n');
        }
        out
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, UNSCORED_NOTE};
    use crate::model::{Feedback, ModuleScore};

    fn partial_result() -> OverallResult {
        let listening = ModuleScore {
            band: 7.0,
            evaluation_status: EvaluationStatus::Ok,
            correct_answers: Some(CorrectCount {
                correct: 30,
                total: 40,
            }),
            feedback: Feedback {
                strengths: vec!["30 of 40 answers correct".into()],
                improvements: vec![],
            },
            failure_detail: None,
            ..ModuleScore::failed(ModuleKind::Listening, "")
        };
        let reading = ModuleScore::failed(ModuleKind::Reading, "upstream overloaded");
        aggregate(Uuid::new_v4(), &[listening, reading])
    }

    #[test]
    fn hides_operator_details() {
        let report = LearnerReport::from_result(&partial_result());
        assert!(report.is_partial());
        assert_eq!(report.overall_band, 7.0);

        let reading = &report.modules[1];
        assert_eq!(reading.band, None);
        assert_eq!(reading.note.as_deref(), Some(UNSCORED_NOTE));

        let json = serde_json::to_string(&report).unwrap();
        assert!(!json.contains("overloaded"));
    }

    #[test]
    fn markdown_lists_every_module() {
        let markdown = LearnerReport::from_result(&partial_result()).to_markdown();
        assert!(markdown.starts_with("# Overall band: 7.0"));
        assert!(markdown.contains("## Listening (7.0)"));
        assert!(markdown.contains("## Reading (n/a)"));
        assert!(markdown.contains("partial result"));
        assert!(markdown.contains("30 of 40 correct"));
    }

    #[test]
    fn json_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("result.json");
        let report = LearnerReport::from_result(&partial_result());
        report.save_json(&path).unwrap();
        assert_eq!(LearnerReport::load_json(&path).unwrap(), report);
    }
}
