//! Speaking assessment: transcribe every part, then assess the transcripts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::band::{mean_band, round_band};
use crate::evaluator::{call_with_retry, EvaluatorConfig, ModuleEvaluator};
use crate::extract::{parse_assessment, SPEAKING_CRITERIA};
use crate::model::{
    EvaluationStatus, ModuleAnswerSet, ModuleKind, ModuleScore, SpeakingResponse, TestDefinition,
};
use crate::traits::{GenerateRequest, LlmProvider, Transcriber, TranscriptionRequest};

pub const SPEAKING_SYSTEM_PROMPT: &str = "You are a certified IELTS speaking examiner. \
You receive automatic transcripts of a candidate's answers. \
Reply with a short commentary followed by a JSON object wrapped in <assessment> and </assessment>.";

const SPEAKING_INSTRUCTIONS: &str = r#"Score the candidate from 0 to 9 in steps of 0.5 on:
fluency, lexical_resource, grammar, pronunciation.
Pronunciation must be inferred from the transcript only (hesitations, self-corrections, misrecognised words).
Also give one holistic overall band, and list strengths and improvements.
Return exactly this shape between the markers:
<assessment>
{"fluency": 0.0, "lexical_resource": 0.0, "grammar": 0.0, "pronunciation": 0.0,
 "overall": 0.0, "strengths": [], "improvements": []}
</assessment>"#;

/// A transcribed speaking part.
#[derive(Debug, Clone)]
pub struct PartTranscript {
    pub part_id: String,
    pub text: String,
    pub duration_seconds: f64,
}

/// Two-stage pipeline. Stage one transcribes each part in order; any
/// transcription failure fails the module without calling the assessor.
/// Stage two assesses all transcripts in one request and takes the
/// provider's holistic band as the module band.
pub struct SpeakingEvaluator {
    provider: Arc<dyn LlmProvider>,
    transcriber: Arc<dyn Transcriber>,
    config: EvaluatorConfig,
}

impl SpeakingEvaluator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        transcriber: Arc<dyn Transcriber>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            provider,
            transcriber,
            config,
        }
    }

    async fn transcribe_all(
        &self,
        responses: &[SpeakingResponse],
    ) -> Result<Vec<PartTranscript>, String> {
        let mut transcripts = Vec::with_capacity(responses.len());
        for response in responses {
            let request = TranscriptionRequest {
                model: self.config.transcription_model.clone(),
                audio_reference: response.audio_reference.clone(),
                language: self.config.language.clone(),
            };
            let transcript = call_with_retry("transcription", &self.config, || {
                self.transcriber.transcribe(&request)
            })
            .await
            .map_err(|e| format!("transcription of {}: {e}", response.part_id))?;

            if transcript.text.trim().is_empty() {
                return Err(format!("transcription of {} is empty", response.part_id));
            }
            transcripts.push(PartTranscript {
                part_id: response.part_id.clone(),
                text: transcript.text.trim().to_string(),
                duration_seconds: response.duration_seconds,
            });
        }
        Ok(transcripts)
    }
}

#[async_trait]
impl ModuleEvaluator for SpeakingEvaluator {
    fn module(&self) -> ModuleKind {
        ModuleKind::Speaking
    }

    #[tracing::instrument(skip_all, fields(test = %test.id, transcriber = self.transcriber.name()))]
    async fn evaluate(&self, test: &TestDefinition, answers: &ModuleAnswerSet) -> ModuleScore {
        let ModuleAnswerSet::Speaking(responses) = answers else {
            return ModuleScore::failed(
                ModuleKind::Speaking,
                format!("speaking evaluator received {} answers", answers.module()),
            );
        };

        let transcripts = match self.transcribe_all(responses).await {
            Ok(transcripts) => transcripts,
            Err(detail) => {
                tracing::warn!("speaking module not assessed: {detail}");
                return ModuleScore::failed(ModuleKind::Speaking, detail);
            }
        };
        let joined = join_transcripts(&transcripts);

        let request = GenerateRequest {
            model: self.config.model.clone(),
            prompt: build_speaking_prompt(test, &transcripts),
            system_prompt: Some(SPEAKING_SYSTEM_PROMPT.to_string()),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };
        let response = match call_with_retry("speaking assessment", &self.config, || {
            self.provider.generate(&request)
        })
        .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("speaking assessment unavailable: {e}");
                let mut score = ModuleScore::failed(ModuleKind::Speaking, format!("provider: {e}"));
                score.transcript = Some(joined);
                return score;
            }
        };

        let parsed = match parse_assessment(&response.content, SPEAKING_CRITERIA) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("unusable speaking assessment: {e}");
                let mut score =
                    ModuleScore::failed(ModuleKind::Speaking, format!("assessment: {e}"));
                score.transcript = Some(joined);
                return score;
            }
        };

        // The provider's holistic figure wins; the criterion mean is only a
        // fallback when it is missing.
        let (band, status) = match parsed.overall {
            Some(overall) => (round_band(overall), EvaluationStatus::Ok),
            None => {
                let bands: Vec<f64> = parsed.criteria.values().copied().collect();
                (
                    mean_band(&bands).unwrap_or_default(),
                    EvaluationStatus::Partial,
                )
            }
        };

        ModuleScore {
            module: ModuleKind::Speaking,
            band,
            criteria: parsed.criteria,
            evidence: parsed.evidence,
            feedback: parsed.feedback,
            correct_answers: None,
            transcript: Some(joined),
            evaluated_at: Utc::now(),
            evaluation_status: status,
            failure_detail: None,
        }
    }
}

/// The subject text sent to the provider: each part's question and transcript.
pub fn build_speaking_prompt(test: &TestDefinition, transcripts: &[PartTranscript]) -> String {
    let mut prompt = String::new();
    for transcript in transcripts {
        let question = test
            .speaking_parts
            .iter()
            .find(|p| p.id == transcript.part_id)
            .map(|p| p.prompt.trim())
            .unwrap_or("(question not available)");
        prompt.push_str(&format!(
            "## {}\nExaminer: {}\nCandidate ({:.0}s): {}\n\n",
            transcript.part_id, question, transcript.duration_seconds, transcript.text,
        ));
    }
    prompt.push_str(SPEAKING_INSTRUCTIONS);
    prompt
}

fn join_transcripts(transcripts: &[PartTranscript]) -> String {
    transcripts
        .iter()
        .map(|t| format!("[{}] {}", t.part_id, t.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}
