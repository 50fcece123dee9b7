//! Writing assessment delegated to a natural-language evaluation provider.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::band::mean_band;
use crate::evaluator::{call_with_retry, EvaluatorConfig, ModuleEvaluator};
use crate::extract::{parse_assessment, WRITING_CRITERIA};
use crate::model::{
    EvaluationStatus, ModuleAnswerSet, ModuleKind, ModuleScore, TestDefinition, WritingResponse,
};
use crate::traits::{GenerateRequest, LlmProvider};

pub const WRITING_SYSTEM_PROMPT: &str = "You are a certified IELTS writing examiner. \
Assess the candidate's responses strictly against the public band descriptors. \
Reply with a short commentary followed by a JSON object wrapped in <assessment> and </assessment>.";

const WRITING_INSTRUCTIONS: &str = r#"Score the candidate on each criterion from 0 to 9 in steps of 0.5:
task_achievement, coherence_cohesion, lexical_resource, grammatical_accuracy.
For every criterion quote one or two short examples from the candidate's text.
Return exactly this shape between the markers:
<assessment>
{"criteria": {"task_achievement": {"score": 0.0, "examples": []},
              "coherence_cohesion": {"score": 0.0, "examples": []},
              "lexical_resource": {"score": 0.0, "examples": []},
              "grammatical_accuracy": {"score": 0.0, "examples": []}},
 "strengths": [], "improvements": []}
</assessment>"#;

/// Sends every task prompt and response in one request and averages the four
/// criterion scores into the module band.
pub struct WritingEvaluator {
    provider: Arc<dyn LlmProvider>,
    config: EvaluatorConfig,
}

impl WritingEvaluator {
    pub fn new(provider: Arc<dyn LlmProvider>, config: EvaluatorConfig) -> Self {
        Self { provider, config }
    }
}

#[async_trait]
impl ModuleEvaluator for WritingEvaluator {
    fn module(&self) -> ModuleKind {
        ModuleKind::Writing
    }

    #[tracing::instrument(skip_all, fields(test = %test.id, provider = self.provider.name()))]
    async fn evaluate(&self, test: &TestDefinition, answers: &ModuleAnswerSet) -> ModuleScore {
        let ModuleAnswerSet::Writing(responses) = answers else {
            return ModuleScore::failed(
                ModuleKind::Writing,
                format!("writing evaluator received {} answers", answers.module()),
            );
        };

        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: build_writing_prompt(test, responses),
            system_prompt: Some(WRITING_SYSTEM_PROMPT.to_string()),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = match call_with_retry("writing assessment", &self.config, || {
            self.provider.generate(&request)
        })
        .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("writing assessment unavailable: {e}");
                return ModuleScore::failed(ModuleKind::Writing, format!("provider: {e}"));
            }
        };

        let parsed = match parse_assessment(&response.content, WRITING_CRITERIA) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("unusable writing assessment: {e}");
                return ModuleScore::failed(ModuleKind::Writing, format!("assessment: {e}"));
            }
        };

        let bands: Vec<f64> = parsed.criteria.values().copied().collect();
        let band = mean_band(&bands).unwrap_or_default();
        let status = if parsed.feedback.is_empty() && parsed.evidence.is_empty() {
            EvaluationStatus::Partial
        } else {
            EvaluationStatus::Ok
        };

        let mut feedback = parsed.feedback;
        feedback.improvements.extend(word_count_notes(test, responses));

        ModuleScore {
            module: ModuleKind::Writing,
            band,
            criteria: parsed.criteria,
            evidence: parsed.evidence,
            feedback,
            correct_answers: None,
            transcript: None,
            evaluated_at: Utc::now(),
            evaluation_status: status,
            failure_detail: None,
        }
    }
}

/// The subject text sent to the provider: every task prompt with the
/// candidate's response and its word count, followed by the scoring instructions.
pub fn build_writing_prompt(test: &TestDefinition, responses: &[WritingResponse]) -> String {
    let mut prompt = String::new();
    for (index, task) in test.writing_tasks.iter().enumerate() {
        let Some(response) = responses.iter().find(|r| r.task_id == task.id) else {
            continue;
        };
        prompt.push_str(&format!(
            "## Task {} ({})\nPrompt:\n{}\n\nMinimum words: {}\nCandidate response ({} words):\n{}\n\n",
            index + 1,
            task.id,
            task.prompt.trim(),
            task.min_words,
            response.effective_word_count(),
            response.text.trim(),
        ));
    }
    prompt.push_str(WRITING_INSTRUCTIONS);
    prompt
}

fn word_count_notes(test: &TestDefinition, responses: &[WritingResponse]) -> Vec<String> {
    test.writing_tasks
        .iter()
        .filter_map(|task| {
            let response = responses.iter().find(|r| r.task_id == task.id)?;
            let words = response.effective_word_count();
            (task.min_words > 0 && words < task.min_words).then(|| {
                format!(
                    "{} is under the {}-word minimum ({} words)",
                    task.id, task.min_words, words
                )
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::model::WritingResponse;
    use crate::testing::{
        fast_config, sample_test, writing_answers, Reply, ScriptedProvider, GOOD_WRITING_REPLY,
    };

    fn evaluator(provider: ScriptedProvider) -> (Arc<ScriptedProvider>, WritingEvaluator) {
        let provider = Arc::new(provider);
        let evaluator = WritingEvaluator::new(provider.clone(), fast_config());
        (provider, evaluator)
    }

    #[tokio::test]
    async fn band_is_mean_of_four_criteria() {
        let (provider, evaluator) = evaluator(ScriptedProvider::replying(GOOD_WRITING_REPLY));
        let score = evaluator.evaluate(&sample_test(), &writing_answers()).await;

        // (6.5 + 7.0 + 6.5 + 6.0) / 4 = 6.5
        assert_eq!(score.evaluation_status, EvaluationStatus::Ok);
        assert_eq!(score.band, 6.5);
        assert_eq!(score.criteria.len(), 4);
        assert_eq!(score.evidence["task_achievement"], vec!["both views discussed"]);
        assert_eq!(provider.calls(), 1);

        let prompt = provider.last_prompt().unwrap();
        assert!(prompt.contains("Summarise the chart."));
        assert!(prompt.contains("cities should grow upwards"));
        assert!(prompt.contains("(270 words)"));
        assert!(prompt.contains("## Task 2 (task2)\nPrompt:\n"));
    }

    #[tokio::test]
    async fn quarter_mean_rounds_up_to_half_band() {
        let reply = r#"<assessment>{"task_achievement": 6, "coherence_cohesion": 6,
            "lexical_resource": 6.5, "grammatical_accuracy": 6.5,
            "strengths": ["ok"]}</assessment>"#;
        let (_, evaluator) = evaluator(ScriptedProvider::replying(reply));
        let score = evaluator.evaluate(&sample_test(), &writing_answers()).await;
        assert_eq!(score.band, 6.5);
    }

    #[tokio::test]
    async fn reply_without_block_is_failed_not_a_panic() {
        let (_, evaluator) = evaluator(ScriptedProvider::replying(
            "Overall this is a band 7 essay with good structure.",
        ));
        let score = evaluator.evaluate(&sample_test(), &writing_answers()).await;
        assert_eq!(score.evaluation_status, EvaluationStatus::Failed);
        assert_eq!(score.band, 0.0);
        assert!(score.failure_detail.unwrap().contains("no delimited block"));
    }

    #[tokio::test]
    async fn missing_criterion_is_failed() {
        let reply = r#"<assessment>{"task_achievement": 6, "coherence_cohesion": 6,
            "lexical_resource": 6}</assessment>"#;
        let (_, evaluator) = evaluator(ScriptedProvider::replying(reply));
        let score = evaluator.evaluate(&sample_test(), &writing_answers()).await;
        assert_eq!(score.evaluation_status, EvaluationStatus::Failed);
    }

    #[tokio::test]
    async fn provider_outage_is_failed() {
        let (_, evaluator) = evaluator(ScriptedProvider::new(Reply::Fail(
            ProviderError::ApiError {
                status: 503,
                message: "overloaded".into(),
            },
        )));
        let score = evaluator.evaluate(&sample_test(), &writing_answers()).await;
        assert_eq!(score.evaluation_status, EvaluationStatus::Failed);
        assert!(score.failure_detail.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn slow_provider_times_out_as_failed() {
        let (_, evaluator) = evaluator(ScriptedProvider::new(Reply::Hang));
        let score = evaluator.evaluate(&sample_test(), &writing_answers()).await;
        assert_eq!(score.evaluation_status, EvaluationStatus::Failed);
        assert!(score.failure_detail.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn scores_without_feedback_are_partial() {
        let reply = r#"<assessment>{"task_achievement": 7, "coherence_cohesion": 7,
            "lexical_resource": 7, "grammatical_accuracy": 7}</assessment>"#;
        let (_, evaluator) = evaluator(ScriptedProvider::replying(reply));
        let score = evaluator.evaluate(&sample_test(), &writing_answers()).await;
        assert_eq!(score.evaluation_status, EvaluationStatus::Partial);
        assert_eq!(score.band, 7.0);
    }

    #[tokio::test]
    async fn short_responses_get_a_word_count_note() {
        let answers = ModuleAnswerSet::Writing(vec![
            WritingResponse {
                task_id: "task1".into(),
                text: "Too short.".into(),
                word_count: 0,
            },
            WritingResponse {
                task_id: "task2".into(),
                text: "Long enough".into(),
                word_count: 300,
            },
        ]);
        let (_, evaluator) = evaluator(ScriptedProvider::replying(GOOD_WRITING_REPLY));
        let score = evaluator.evaluate(&sample_test(), &answers).await;
        assert!(score
            .feedback
            .improvements
            .iter()
            .any(|note| note.contains("task1 is under the 150-word minimum (2 words)")));
    }
}
