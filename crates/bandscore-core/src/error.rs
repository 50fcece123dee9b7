//! Error types shared across the scoring pipeline.
//!
//! `ProviderError` is defined here rather than in `bandscore-providers` so the
//! evaluators can downcast and classify provider failures for retry decisions
//! without string matching.

use thiserror::Error;
use uuid::Uuid;

use crate::model::{AttemptStatus, ModuleKind};

/// Errors that can occur when talking to an evaluation or transcription provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The API returned a 429 rate limit response.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Authentication failed (invalid API key).
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The requested model was not found.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The API returned an error response.
    #[error("API error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    /// The request timed out.
    #[error("request timed out after {0}s")]
    Timeout(u64),

    /// A network error occurred.
    #[error("network error: {0}")]
    NetworkError(String),

    /// The audio referenced by a speaking answer could not be read.
    #[error("audio unavailable: {0}")]
    AudioUnavailable(String),
}

impl ProviderError {
    /// Returns `true` if this error is permanent and should not be retried.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ProviderError::AuthenticationFailed(_)
                | ProviderError::ModelNotFound(_)
                | ProviderError::AudioUnavailable(_)
        )
    }

    /// Returns the retry-after delay in milliseconds, if applicable.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Classify an arbitrary provider failure. Errors that did not originate
    /// as a `ProviderError` are treated as network failures.
    pub fn classify(err: anyhow::Error) -> Self {
        match err.downcast::<ProviderError>() {
            Ok(provider_err) => provider_err,
            Err(other) => ProviderError::NetworkError(format!("{other:#}")),
        }
    }
}

/// Errors raised by a `ResultStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("attempt {0} not found")]
    NotFound(Uuid),

    #[error("attempt {0} already exists")]
    AlreadyExists(Uuid),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to (de)serialize attempt record: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure (connection lost, write rejected, ...).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Rejections and fatal failures at the submission boundary.
///
/// Provider failures never appear here: they are folded into a failed
/// `ModuleScore` so the attempt always reaches a terminal per-module state.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("attempt {0} not found")]
    AttemptNotFound(Uuid),

    #[error("attempt {0} belongs to another user")]
    NotOwner(Uuid),

    #[error("unknown test: {0}")]
    UnknownTest(String),

    #[error("test {test_id} has no {module} module")]
    ModuleNotOffered { test_id: String, module: ModuleKind },

    #[error(
        "out of sequence: expected {}, got {submitted}",
        expected.map_or_else(|| "no further modules".to_string(), |m| m.to_string())
    )]
    OutOfSequence {
        expected: Option<ModuleKind>,
        submitted: ModuleKind,
    },

    #[error("answers for {answers} submitted as {module}")]
    AnswerShapeMismatch {
        module: ModuleKind,
        answers: ModuleKind,
    },

    #[error("missing answers for {module}: {detail}")]
    MissingAnswers { module: ModuleKind, detail: String },

    #[error("attempt is {0} and accepts no further submissions")]
    AttemptClosed(AttemptStatus),

    #[error("attempt {0} expired")]
    AttemptExpired(Uuid),

    #[error("attempt is {0}; only completed attempts can be re-scored")]
    NotCompleted(AttemptStatus),

    #[error("submission for {0} was superseded by a newer one")]
    Superseded(ModuleKind),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Stable machine-readable code returned across the submission boundary.
    pub fn code(&self) -> &'static str {
        match self {
            SubmitError::AttemptNotFound(_) => "attempt_not_found",
            SubmitError::NotOwner(_) => "not_owner",
            SubmitError::UnknownTest(_) => "unknown_test",
            SubmitError::ModuleNotOffered { .. } => "module_not_offered",
            SubmitError::OutOfSequence { .. } => "out_of_sequence",
            SubmitError::AnswerShapeMismatch { .. } => "answer_shape_mismatch",
            SubmitError::MissingAnswers { .. } => "missing_fields",
            SubmitError::AttemptClosed(_) => "attempt_closed",
            SubmitError::AttemptExpired(_) => "attempt_expired",
            SubmitError::NotCompleted(_) => "not_completed",
            SubmitError::Superseded(_) => "superseded",
            SubmitError::Persistence(_) => "persistence_failure",
            SubmitError::Internal(_) => "internal_error",
        }
    }

    /// Caller errors are rejected before any state changes.
    pub fn is_caller_error(&self) -> bool {
        !matches!(
            self,
            SubmitError::Persistence(_) | SubmitError::Internal(_) | SubmitError::Superseded(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_downcasts_provider_errors() {
        let err: anyhow::Error = ProviderError::RateLimited {
            retry_after_ms: 2000,
        }
        .into();
        let classified = ProviderError::classify(err);
        assert_eq!(classified.retry_after_ms(), Some(2000));
        assert!(!classified.is_permanent());
    }

    #[test]
    fn classify_wraps_foreign_errors_as_network() {
        let classified = ProviderError::classify(anyhow::anyhow!("connection reset"));
        assert!(matches!(classified, ProviderError::NetworkError(ref m) if m.contains("reset")));
    }

    #[test]
    fn permanent_errors() {
        assert!(ProviderError::AuthenticationFailed("bad key".into()).is_permanent());
        assert!(ProviderError::ModelNotFound("x".into()).is_permanent());
        assert!(!ProviderError::Timeout(30).is_permanent());
    }

    #[test]
    fn submit_error_codes() {
        let err = SubmitError::OutOfSequence {
            expected: Some(ModuleKind::Reading),
            submitted: ModuleKind::Writing,
        };
        assert_eq!(err.code(), "out_of_sequence");
        assert!(err.is_caller_error());
        assert_eq!(
            err.to_string(),
            "out of sequence: expected reading, got writing"
        );

        let err = SubmitError::Persistence(StoreError::Backend("down".into()));
        assert_eq!(err.code(), "persistence_failure");
        assert!(!err.is_caller_error());
    }
}
