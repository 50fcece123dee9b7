//! Mock providers for testing and offline runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use bandscore_core::traits::{
    GenerateRequest, GenerateResponse, LlmProvider, ModelInfo, TokenUsage, Transcriber,
    Transcript, TranscriptionRequest,
};

use crate::ProviderError;

/// An assessment that satisfies both the writing and speaking parsers.
pub const DEFAULT_ASSESSMENT: &str = r#"<assessment>
{"task_achievement": 6.5, "coherence_cohesion": 7, "lexical_resource": 6.5,
 "grammatical_accuracy": 6, "fluency": 6.5, "grammar": 6, "pronunciation": 7,
 "overall": 6.5, "strengths": ["relevant ideas"], "improvements": ["wider vocabulary"]}
</assessment>"#;

/// A mock LLM provider for exercising the evaluation pipeline without API calls.
///
/// Replies are chosen by prompt substring, falling back to a default. Queued
/// failures are returned first, one per call.
pub struct MockProvider {
    /// Map of prompt substring → reply.
    responses: HashMap<String, String>,
    default_response: String,
    failures: Mutex<VecDeque<ProviderError>>,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockProvider {
    /// Create a new mock provider with the given prompt→reply mappings.
    pub fn new(responses: HashMap<String, String>) -> Self {
        Self {
            responses,
            default_response: DEFAULT_ASSESSMENT.to_string(),
            failures: Mutex::new(VecDeque::new()),
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Create a mock that always returns the same reply.
    pub fn with_fixed_response(response: &str) -> Self {
        Self {
            default_response: response.to_string(),
            ..Self::new(HashMap::new())
        }
    }

    /// Fail the next call with `error` before any reply is served.
    pub fn fail_next(self, error: ProviderError) -> Self {
        lock(&self.failures).push_back(error);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_request(&self) -> Option<GenerateRequest> {
        lock(&self.last_request).clone()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new(HashMap::new())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *lock(&self.last_request) = Some(request.clone());

        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error.into());
        }

        let content = self
            .responses
            .iter()
            .find(|(key, _)| request.prompt.contains(key.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_response.clone());

        let prompt_tokens = (request.prompt.len() / 4) as u32; // Rough estimate
        let completion_tokens = (content.len() / 4) as u32;

        Ok(GenerateResponse {
            content,
            model: request.model.clone(),
            token_usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                estimated_cost_usd: 0.0,
            },
            latency_ms: 1,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".into(),
            name: "Mock Model".into(),
            provider: "mock".into(),
            max_context: 100_000,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
        }]
    }
}

/// A transcriber that returns canned text without reading any audio.
pub struct MockTranscriber {
    transcript: String,
    failures: Mutex<VecDeque<ProviderError>>,
    call_count: AtomicU32,
}

impl MockTranscriber {
    pub fn new(transcript: &str) -> Self {
        Self {
            transcript: transcript.to_string(),
            failures: Mutex::new(VecDeque::new()),
            call_count: AtomicU32::new(0),
        }
    }

    pub fn fail_next(self, error: ProviderError) -> Self {
        lock(&self.failures).push_back(error);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new("I would like to talk about a book I read last summer.")
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transcribe(&self, request: &TranscriptionRequest) -> anyhow::Result<Transcript> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error.into());
        }
        Ok(Transcript {
            text: self.transcript.clone(),
            language: request.language.clone(),
            latency_ms: 1,
        })
    }
}
