//! The module evaluator capability and what the concrete evaluators share:
//! provider-call retries with timeouts, submission checks, and the evaluator
//! set the orchestrator picks from.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ProviderError, SubmitError};
use crate::model::{ModuleAnswerSet, ModuleKind, ModuleScore, TestDefinition};
use crate::objective::ObjectiveEvaluator;
use crate::speaking::SpeakingEvaluator;
use crate::traits::{LlmProvider, Transcriber};
use crate::writing::WritingEvaluator;

/// Turns one module's raw answers into a normalized score.
///
/// Implementations never fail: provider outages, timeouts, and malformed
/// replies come back as a score with `EvaluationStatus::Failed`.
#[async_trait]
pub trait ModuleEvaluator: Send + Sync {
    /// The module this evaluator handles.
    fn module(&self) -> ModuleKind;

    async fn evaluate(&self, test: &TestDefinition, answers: &ModuleAnswerSet) -> ModuleScore;
}

/// Settings shared by the provider-backed evaluators.
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Model used for natural-language assessment.
    pub model: String,
    /// Model used for speech-to-text.
    pub transcription_model: String,
    /// Language hint passed to the transcriber.
    pub language: Option<String>,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Upper bound on a single provider call.
    pub call_timeout: Duration,
    /// Retries on transient provider errors.
    pub max_retries: u32,
    /// Initial delay between retries; doubles each time.
    pub retry_delay: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".to_string(),
            transcription_model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            max_tokens: 2048,
            temperature: 0.0,
            call_timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// One evaluator per module, chosen once when the set is built.
#[derive(Clone, Default)]
pub struct EvaluatorSet {
    evaluators: HashMap<ModuleKind, Arc<dyn ModuleEvaluator>>,
}

impl EvaluatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `evaluator` for the module it reports, replacing any previous one.
    pub fn with(mut self, evaluator: Arc<dyn ModuleEvaluator>) -> Self {
        self.evaluators.insert(evaluator.module(), evaluator);
        self
    }

    /// Deterministic listening and reading graders only.
    pub fn objective_only() -> Self {
        Self::new()
            .with(Arc::new(ObjectiveEvaluator::listening()))
            .with(Arc::new(ObjectiveEvaluator::reading()))
    }

    /// All four modules: key-based grading, delegated writing assessment,
    /// and transcribe-then-assess speaking.
    pub fn standard(
        provider: Arc<dyn LlmProvider>,
        transcriber: Arc<dyn Transcriber>,
        config: EvaluatorConfig,
    ) -> Self {
        Self::objective_only()
            .with(Arc::new(WritingEvaluator::new(
                Arc::clone(&provider),
                config.clone(),
            )))
            .with(Arc::new(SpeakingEvaluator::new(provider, transcriber, config)))
    }

    pub fn get(&self, module: ModuleKind) -> Option<Arc<dyn ModuleEvaluator>> {
        self.evaluators.get(&module).cloned()
    }

    pub fn supports(&self, module: ModuleKind) -> bool {
        self.evaluators.contains_key(&module)
    }
}

/// Run a provider call under the configured timeout, retrying transient
/// failures with exponential backoff.
pub(crate) async fn call_with_retry<T, F, Fut>(
    label: &str,
    config: &EvaluatorConfig,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut last_error = None;
    let mut retry_delay = config.retry_delay;

    for retry in 0..=config.max_retries {
        if retry > 0 {
            tokio::time::sleep(retry_delay).await;
            retry_delay = (retry_delay * 2).min(Duration::from_secs(60));
        }

        let err = match tokio::time::timeout(config.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => ProviderError::classify(e),
            Err(_) => ProviderError::Timeout(config.call_timeout.as_secs()),
        };

        if err.is_permanent() {
            tracing::warn!("{label}: permanent provider error: {err}");
            return Err(err);
        }
        // Use provider's retry-after hint if available
        if let Some(ms) = err.retry_after_ms() {
            retry_delay = Duration::from_millis(ms);
        }
        tracing::warn!("{label}: attempt {} failed: {err}", retry + 1);
        last_error = Some(err);
    }

    Err(last_error.unwrap_or_else(|| ProviderError::NetworkError("no attempt made".into())))
}

/// Reject submissions with missing required fields before any evaluation.
pub fn check_answers(test: &TestDefinition, answers: &ModuleAnswerSet) -> Result<(), SubmitError> {
    let module = answers.module();
    let missing = |detail: String| SubmitError::MissingAnswers { module, detail };

    match answers {
        ModuleAnswerSet::Listening(map) | ModuleAnswerSet::Reading(map) => {
            if map.is_empty() {
                return Err(missing("no answers submitted".into()));
            }
        }
        ModuleAnswerSet::Writing(responses) => {
            for task in &test.writing_tasks {
                let matching: Vec<_> = responses.iter().filter(|r| r.task_id == task.id).collect();
                match matching.as_slice() {
                    [] => return Err(missing(format!("no response for task {}", task.id))),
                    [response] if response.text.trim().is_empty() => {
                        return Err(missing(format!("response for task {} is empty", task.id)))
                    }
                    [_] => {}
                    _ => return Err(missing(format!("duplicate responses for task {}", task.id))),
                }
            }
        }
        ModuleAnswerSet::Speaking(responses) => {
            for part in &test.speaking_parts {
                let Some(response) = responses.iter().find(|r| r.part_id == part.id) else {
                    return Err(missing(format!("no recording for part {}", part.id)));
                };
                if response.audio_reference.trim().is_empty() {
                    return Err(missing(format!("part {} has no audio reference", part.id)));
                }
                if !(response.duration_seconds.is_finite() && response.duration_seconds > 0.0) {
                    return Err(missing(format!("part {} has no recorded duration", part.id)));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SpeakingResponse, WritingResponse};
    use crate::testing::sample_test;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> EvaluatorConfig {
        EvaluatorConfig {
            call_timeout: Duration::from_millis(50),
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry("test", &fast_config(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(anyhow::Error::from(ProviderError::NetworkError("reset".into())))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = call_with_retry("test", &fast_config(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(anyhow::Error::from(ProviderError::AuthenticationFailed(
                    "bad key".into(),
                )))
            }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::AuthenticationFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let config = EvaluatorConfig {
            max_retries: 0,
            ..fast_config()
        };
        let result: Result<(), _> = call_with_retry("test", &config, || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), anyhow::Error>(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[test]
    fn objective_answers_must_not_be_empty() {
        let test = sample_test();
        let err = check_answers(&test, &ModuleAnswerSet::Listening(BTreeMap::new())).unwrap_err();
        assert_eq!(err.code(), "missing_fields");
    }

    #[test]
    fn writing_needs_every_task() {
        let test = sample_test();
        let answers = ModuleAnswerSet::Writing(vec![WritingResponse {
            task_id: "task1".into(),
            text: "Some text".into(),
            word_count: 2,
        }]);
        let err = check_answers(&test, &answers).unwrap_err();
        assert!(err.to_string().contains("task2"));

        let answers = ModuleAnswerSet::Writing(vec![
            WritingResponse {
                task_id: "task1".into(),
                text: "Some text".into(),
                word_count: 2,
            },
            WritingResponse {
                task_id: "task2".into(),
                text: "   ".into(),
                word_count: 0,
            },
        ]);
        assert!(check_answers(&test, &answers).is_err());
    }

    #[test]
    fn speaking_needs_audio_and_duration() {
        let test = sample_test();
        let answers = ModuleAnswerSet::Speaking(vec![SpeakingResponse {
            part_id: "part1".into(),
            audio_reference: "audio/part1.wav".into(),
            duration_seconds: 0.0,
        }]);
        let err = check_answers(&test, &answers).unwrap_err();
        assert!(err.to_string().contains("duration"));
    }

    #[test]
    fn evaluator_set_selects_by_module() {
        let set = EvaluatorSet::objective_only();
        assert!(set.supports(ModuleKind::Listening));
        assert!(set.supports(ModuleKind::Reading));
        assert!(!set.supports(ModuleKind::Writing));
        assert_eq!(
            set.get(ModuleKind::Reading).map(|e| e.module()),
            Some(ModuleKind::Reading)
        );
    }
}
