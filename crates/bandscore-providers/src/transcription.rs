//! OpenAI audio transcription (Whisper) adapter.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, instrument};

use bandscore_core::traits::{Transcriber, Transcript, TranscriptionRequest};

use crate::http::{build_client, check_status, parse_error, send_error, DEFAULT_TIMEOUT_SECS};
use crate::openai::DEFAULT_BASE_URL;
use crate::ProviderError;

/// Speech-to-text through `/v1/audio/transcriptions`.
///
/// Recordings are referenced either by local path or by `http(s)` URL; URLs
/// are fetched first and uploaded as multipart form data.
pub struct OpenAiTranscriber {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiTranscriber {
    pub fn new(api_key: &str, base_url: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: build_client(DEFAULT_TIMEOUT_SECS)?,
        })
    }

    async fn load_audio(&self, reference: &str) -> Result<Vec<u8>, ProviderError> {
        if reference.starts_with("http://") || reference.starts_with("https://") {
            let response = self
                .client
                .get(reference)
                .send()
                .await
                .map_err(|e| send_error(e, DEFAULT_TIMEOUT_SECS))?;
            if !response.status().is_success() {
                return Err(ProviderError::AudioUnavailable(format!(
                    "{reference} returned HTTP {}",
                    response.status().as_u16()
                )));
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
            return Ok(bytes.to_vec());
        }

        tokio::fs::read(reference)
            .await
            .map_err(|e| ProviderError::AudioUnavailable(format!("{reference}: {e}")))
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
}

fn file_name(reference: &str) -> String {
    let trimmed = reference.split(['?', '#']).next().unwrap_or(reference);
    Path::new(trimmed)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("audio.wav")
        .to_string()
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, request), fields(model = %request.model, audio = %request.audio_reference))]
    async fn transcribe(&self, request: &TranscriptionRequest) -> anyhow::Result<Transcript> {
        let start = Instant::now();

        let audio = self.load_audio(&request.audio_reference).await?;
        debug!(bytes = audio.len(), "uploading recording");

        let mut form = Form::new()
            .text("model", request.model.clone())
            .text("response_format", "json")
            .part(
                "file",
                Part::bytes(audio).file_name(file_name(&request.audio_reference)),
            );
        if let Some(language) = &request.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| send_error(e, DEFAULT_TIMEOUT_SECS))?;
        let response = check_status(response, &request.model).await?;

        let body: TranscriptionResponse = response.json().await.map_err(parse_error)?;

        Ok(Transcript {
            text: body.text.trim().to_string(),
            language: body.language.or_else(|| request.language.clone()),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
