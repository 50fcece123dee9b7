//! Deterministic grading for listening and reading.

use async_trait::async_trait;
use chrono::Utc;

use crate::band::{ConversionTable, ACADEMIC_READING, LISTENING};
use crate::evaluator::ModuleEvaluator;
use crate::model::{
    CorrectCount, EvaluationStatus, Feedback, ModuleAnswerSet, ModuleKind, ModuleScore,
    ObjectiveAnswers, ObjectiveSection, TestDefinition,
};

/// How many wrong question ids are listed in the feedback.
const MAX_LISTED_MISSES: usize = 10;

/// Grades answers against the test's key and converts the raw count to a band.
#[derive(Debug, Clone)]
pub struct ObjectiveEvaluator {
    module: ModuleKind,
    table: ConversionTable,
}

impl ObjectiveEvaluator {
    pub fn listening() -> Self {
        Self {
            module: ModuleKind::Listening,
            table: LISTENING,
        }
    }

    pub fn reading() -> Self {
        Self {
            module: ModuleKind::Reading,
            table: ACADEMIC_READING,
        }
    }
}

#[async_trait]
impl ModuleEvaluator for ObjectiveEvaluator {
    fn module(&self) -> ModuleKind {
        self.module
    }

    async fn evaluate(&self, test: &TestDefinition, answers: &ModuleAnswerSet) -> ModuleScore {
        let submitted = match answers {
            ModuleAnswerSet::Listening(map) if self.module == ModuleKind::Listening => map,
            ModuleAnswerSet::Reading(map) if self.module == ModuleKind::Reading => map,
            other => {
                return ModuleScore::failed(
                    self.module,
                    format!("{} evaluator received {} answers", self.module, other.module()),
                )
            }
        };
        let Some(section) = test.objective_section(self.module) else {
            return ModuleScore::failed(
                self.module,
                format!("test {} has no {} answer key", test.id, self.module),
            );
        };
        if section.question_count() == 0 {
            return ModuleScore::failed(self.module, "answer key is empty");
        }

        let graded = grade(section, submitted);
        let band = self.table.band_for_scaled(graded.count.correct, graded.count.total);
        tracing::debug!(
            module = %self.module,
            correct = graded.count.correct,
            total = graded.count.total,
            band,
            "graded objective module"
        );

        let mut feedback = Feedback {
            strengths: vec![format!(
                "{} of {} answers correct",
                graded.count.correct, graded.count.total
            )],
            improvements: Vec::new(),
        };
        if !graded.missed.is_empty() {
            let listed: Vec<&str> = graded
                .missed
                .iter()
                .take(MAX_LISTED_MISSES)
                .map(String::as_str)
                .collect();
            let more = graded.missed.len().saturating_sub(MAX_LISTED_MISSES);
            let suffix = if more > 0 {
                format!(" and {more} more")
            } else {
                String::new()
            };
            feedback
                .improvements
                .push(format!("Review questions {}{suffix}", listed.join(", ")));
        }

        ModuleScore {
            module: self.module,
            band,
            criteria: Default::default(),
            evidence: Default::default(),
            feedback,
            correct_answers: Some(graded.count),
            transcript: None,
            evaluated_at: Utc::now(),
            evaluation_status: EvaluationStatus::Ok,
            failure_detail: None,
        }
    }
}

/// Result of grading one answer set.
#[derive(Debug, Clone, PartialEq)]
pub struct Graded {
    pub count: CorrectCount,
    /// Question ids answered wrongly or left blank, in key order.
    pub missed: Vec<String>,
}

/// Compare each keyed question with the submitted answer. Answers to
/// questions that are not in the key are ignored.
pub fn grade(section: &ObjectiveSection, submitted: &ObjectiveAnswers) -> Graded {
    let mut correct = 0u32;
    let mut missed = Vec::new();

    for (question, accepted) in &section.answers {
        let is_correct = submitted
            .get(question)
            .map(|answer| matches_key(answer, accepted))
            .unwrap_or(false);
        if is_correct {
            correct += 1;
        } else {
            missed.push(question.clone());
        }
    }

    Graded {
        count: CorrectCount {
            correct,
            total: section.question_count() as u32,
        },
        missed,
    }
}

/// `true` if `answer` matches any accepted variant after normalization.
/// A key entry may itself list alternatives separated by `|`.
pub fn matches_key(answer: &str, accepted: &[String]) -> bool {
    let answer = normalize_answer(answer);
    if answer.is_empty() {
        return false;
    }
    accepted
        .iter()
        .flat_map(|entry| entry.split('|'))
        .any(|variant| normalize_answer(variant) == answer)
}

/// Lowercase, collapse inner whitespace, and strip surrounding punctuation.
pub fn normalize_answer(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c: char| {
        c.is_whitespace() || matches!(c, '.' | ',' | ';' | ':' | '!' | '?' | '"' | '\'')
    });
    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
