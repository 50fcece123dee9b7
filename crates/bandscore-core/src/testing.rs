//! Shared fixtures for unit tests in this crate.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::evaluator::EvaluatorConfig;
use crate::model::{
    ModuleAnswerSet, ObjectiveSection, SpeakingPart, SpeakingResponse, TestDefinition,
    WritingResponse, WritingTask,
};
use crate::traits::{
    GenerateRequest, GenerateResponse, LlmProvider, ModelInfo, TokenUsage, Transcriber,
    Transcript, TranscriptionRequest,
};

pub(crate) const GOOD_WRITING_REPLY: &str = r#"<assessment>
{"task_achievement": {"score": 6.5, "examples": ["both views discussed"]},
 "coherence_cohesion": 7, "lexical_resource": 6.5, "grammatical_accuracy": 6,
 "strengths": ["clear position"], "improvements": ["more complex sentences"]}
</assessment>"#;

pub(crate) const GOOD_SPEAKING_REPLY: &str = r#"<assessment>
{"fluency": 6.5, "lexical_resource": 6, "grammar": 6, "pronunciation": 7,
 "overall": 6.0, "strengths": ["natural pace"], "improvements": ["fewer fillers"]}
</assessment>"#;

pub(crate) fn fast_config() -> EvaluatorConfig {
    EvaluatorConfig {
        call_timeout: Duration::from_millis(200),
        max_retries: 0,
        retry_delay: Duration::from_millis(1),
        ..Default::default()
    }
}

fn key(pairs: &[(&str, &str)]) -> ObjectiveSection {
    ObjectiveSection {
        answers: pairs
            .iter()
            .map(|(q, a)| (q.to_string(), a.split('|').map(str::to_string).collect()))
            .collect(),
    }
}

pub(crate) fn sample_test() -> TestDefinition {
    TestDefinition {
        id: "academic-1".into(),
        name: "Academic Practice 1".into(),
        description: String::new(),
        listening: Some(key(&[
            ("q1", "library"),
            ("q2", "tuesday"),
            ("q3", "colour|color"),
            ("q4", "42"),
        ])),
        reading: Some(key(&[
            ("q1", "true"),
            ("q2", "false"),
            ("q3", "not given"),
            ("q4", "photosynthesis"),
        ])),
        writing_tasks: vec![
            WritingTask {
                id: "task1".into(),
                prompt: "Summarise the chart.".into(),
                min_words: 150,
            },
            WritingTask {
                id: "task2".into(),
                prompt: "Discuss both views and give your opinion.".into(),
                min_words: 250,
            },
        ],
        speaking_parts: vec![
            SpeakingPart {
                id: "part1".into(),
                prompt: "Tell me about your hometown.".into(),
            },
            SpeakingPart {
                id: "part2".into(),
                prompt: "Describe a book you enjoyed.".into(),
            },
        ],
    }
}

pub(crate) fn objective_answers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(q, a)| (q.to_string(), a.to_string()))
        .collect()
}

pub(crate) fn listening_answers() -> ModuleAnswerSet {
    ModuleAnswerSet::Listening(objective_answers(&[
        ("q1", "Library"),
        ("q2", "tuesday"),
        ("q3", "color"),
        ("q4", "41"),
    ]))
}

pub(crate) fn reading_answers() -> ModuleAnswerSet {
    ModuleAnswerSet::Reading(objective_answers(&[
        ("q1", "TRUE"),
        ("q2", "false"),
        ("q3", "not given"),
        ("q4", "photosynthesis"),
    ]))
}

pub(crate) fn writing_answers() -> ModuleAnswerSet {
    ModuleAnswerSet::Writing(vec![
        WritingResponse {
            task_id: "task1".into(),
            text: "The chart shows a steady rise.".into(),
            word_count: 160,
        },
        WritingResponse {
            task_id: "task2".into(),
            text: "Some people believe that cities should grow upwards.".into(),
            word_count: 270,
        },
    ])
}

pub(crate) fn speaking_answers() -> ModuleAnswerSet {
    ModuleAnswerSet::Speaking(vec![
        SpeakingResponse {
            part_id: "part1".into(),
            audio_reference: "audio/part1.wav".into(),
            duration_seconds: 45.0,
        },
        SpeakingResponse {
            part_id: "part2".into(),
            audio_reference: "audio/part2.wav".into(),
            duration_seconds: 110.0,
        },
    ])
}

/// What a scripted collaborator does on one call.
#[derive(Clone)]
pub(crate) enum Reply {
    Text(String),
    Fail(ProviderError),
    /// Reply with the text after a delay.
    After(Duration, String),
    Hang,
}

/// LLM provider that plays back queued replies, then repeats a default one.
pub(crate) struct ScriptedProvider {
    queue: Mutex<VecDeque<Reply>>,
    default: Reply,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub(crate) fn new(default: Reply) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default,
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn replying(text: &str) -> Self {
        Self::new(Reply::Text(text.to_string()))
    }

    pub(crate) fn then(self, reply: Reply) -> Self {
        self.queue.lock().unwrap().push_back(reply);
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

async fn play(reply: Reply) -> anyhow::Result<String> {
    match reply {
        Reply::Text(text) => Ok(text),
        Reply::Fail(err) => Err(err.into()),
        Reply::After(delay, text) => {
            tokio::time::sleep(delay).await;
            Ok(text)
        }
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let reply = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        let content = play(reply).await?;
        Ok(GenerateResponse {
            content,
            model: request.model.clone(),
            token_usage: TokenUsage::default(),
            latency_ms: 1,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        Vec::new()
    }
}

/// Transcriber that returns `"transcript of <reference>"` unless scripted otherwise.
pub(crate) struct ScriptedTranscriber {
    failure: Option<Reply>,
    calls: AtomicU32,
}

impl ScriptedTranscriber {
    pub(crate) fn working() -> Self {
        Self {
            failure: None,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn broken(reply: Reply) -> Self {
        Self {
            failure: Some(reply),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn transcribe(&self, request: &TranscriptionRequest) -> anyhow::Result<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .failure
            .clone()
            .unwrap_or_else(|| Reply::Text(format!("transcript of {}", request.audio_reference)));
        let text = play(reply).await?;
        Ok(Transcript {
            text,
            language: request.language.clone(),
            latency_ms: 1,
        })
    }
}
