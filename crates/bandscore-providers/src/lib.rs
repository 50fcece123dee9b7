//! bandscore-providers: Assessment and transcription provider integrations.
//!
//! Implements `LlmProvider` for Anthropic and OpenAI, `Transcriber` for the
//! OpenAI audio API, and the configuration that wires them into evaluators.

pub mod anthropic;
pub mod config;
mod http;
pub mod mock;
pub mod openai;
pub mod transcription;

pub use bandscore_core::error::ProviderError;
pub use config::{
    create_provider, create_transcriber, load_config, load_config_from, BandscoreConfig,
    ProviderConfig,
};
