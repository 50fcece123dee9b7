//! Configuration loading and provider factory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use bandscore_core::evaluator::{EvaluatorConfig, EvaluatorSet};
use bandscore_core::orchestrator::{CompletionPolicy, OrchestratorConfig};
use bandscore_core::traits::{LlmProvider, Transcriber};

use crate::anthropic::AnthropicProvider;
use crate::mock::{MockProvider, MockTranscriber};
use crate::openai::OpenAiProvider;
use crate::transcription::OpenAiTranscriber;

/// Configuration for a single provider.
///
/// Note: Custom Debug impl masks API keys to prevent accidental exposure in logs.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    OpenAI {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        org_id: Option<String>,
    },
    Anthropic {
        api_key: String,
        #[serde(default)]
        base_url: Option<String>,
    },
    /// Offline stand-in that returns a fixed assessment and transcript.
    Mock {
        #[serde(default)]
        reply: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::OpenAI {
                api_key: _,
                base_url,
                org_id,
            } => f
                .debug_struct("OpenAI")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .field("org_id", org_id)
                .finish(),
            ProviderConfig::Anthropic {
                api_key: _,
                base_url,
            } => f
                .debug_struct("Anthropic")
                .field("api_key", &"***")
                .field("base_url", base_url)
                .finish(),
            ProviderConfig::Mock { reply, transcript } => f
                .debug_struct("Mock")
                .field("reply", reply)
                .field("transcript", transcript)
                .finish(),
        }
    }
}

/// Top-level bandscore configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandscoreConfig {
    /// Provider configurations keyed by name.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    /// Provider used to assess writing and speaking.
    #[serde(default = "default_evaluation_provider")]
    pub evaluation_provider: String,
    #[serde(default = "default_evaluation_model")]
    pub evaluation_model: String,
    /// Provider used for speech-to-text.
    #[serde(default = "default_transcription_provider")]
    pub transcription_provider: String,
    #[serde(default = "default_transcription_model")]
    pub transcription_model: String,
    /// Language hint for transcription.
    #[serde(default = "default_language")]
    pub language: Option<String>,
    /// Sampling temperature (0.0 for repeatable assessments).
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Upper bound on one provider call.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Max retries on transient provider errors.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Upper bound on one module's evaluation.
    #[serde(default = "default_module_deadline")]
    pub module_deadline_secs: u64,
    #[serde(default)]
    pub completion_policy: CompletionPolicy,
    #[serde(default = "default_max_evaluation_attempts")]
    pub max_evaluation_attempts: u32,
    /// Idle hours before an in-progress attempt expires; 0 disables expiry.
    #[serde(default = "default_attempt_ttl")]
    pub attempt_ttl_hours: u64,
    /// Directory holding one JSON record per attempt.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

fn default_evaluation_provider() -> String {
    "anthropic".to_string()
}
fn default_evaluation_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_transcription_provider() -> String {
    "openai".to_string()
}
fn default_transcription_model() -> String {
    "whisper-1".to_string()
}
fn default_language() -> Option<String> {
    Some("en".to_string())
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_call_timeout() -> u64 {
    60
}
fn default_retries() -> u32 {
    2
}
fn default_retry_delay() -> u64 {
    1000
}
fn default_module_deadline() -> u64 {
    300
}
fn default_max_evaluation_attempts() -> u32 {
    3
}
fn default_attempt_ttl() -> u64 {
    168
}
fn default_store_dir() -> PathBuf {
    PathBuf::from("./bandscore-data")
}

impl Default for BandscoreConfig {
    fn default() -> Self {
        Self {
            providers: HashMap::new(),
            evaluation_provider: default_evaluation_provider(),
            evaluation_model: default_evaluation_model(),
            transcription_provider: default_transcription_provider(),
            transcription_model: default_transcription_model(),
            language: default_language(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            call_timeout_secs: default_call_timeout(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
            module_deadline_secs: default_module_deadline(),
            completion_policy: CompletionPolicy::default(),
            max_evaluation_attempts: default_max_evaluation_attempts(),
            attempt_ttl_hours: default_attempt_ttl(),
            store_dir: default_store_dir(),
        }
    }
}

impl BandscoreConfig {
    pub fn evaluator_config(&self) -> EvaluatorConfig {
        EvaluatorConfig {
            model: self.evaluation_model.clone(),
            transcription_model: self.transcription_model.clone(),
            language: self.language.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            completion_policy: self.completion_policy,
            max_evaluation_attempts: self.max_evaluation_attempts,
            module_deadline: Duration::from_secs(self.module_deadline_secs),
            attempt_ttl: (self.attempt_ttl_hours > 0)
                .then(|| Duration::from_secs(self.attempt_ttl_hours * 3600)),
        }
    }

    /// Build the evaluators for every module.
    ///
    /// When either collaborator is not configured, only listening and
    /// reading get evaluators; writing and speaking submissions then come
    /// back as failed scores.
    pub fn evaluator_set(&self) -> Result<EvaluatorSet> {
        let provider = self.providers.get(&self.evaluation_provider);
        let transcriber = self.providers.get(&self.transcription_provider);
        match (provider, transcriber) {
            (Some(provider), Some(transcriber)) => Ok(EvaluatorSet::standard(
                create_provider(&self.evaluation_provider, provider)?,
                create_transcriber(&self.transcription_provider, transcriber)?,
                self.evaluator_config(),
            )),
            _ => {
                warn!(
                    evaluation = %self.evaluation_provider,
                    transcription = %self.transcription_provider,
                    "provider not configured; only listening and reading will be scored"
                );
                Ok(EvaluatorSet::objective_only())
            }
        }
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_provider_config(config: &ProviderConfig) -> ProviderConfig {
    let resolve = |value: &Option<String>| value.as_deref().map(resolve_env_vars);
    match config {
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => ProviderConfig::OpenAI {
            api_key: resolve_env_vars(api_key),
            base_url: resolve(base_url),
            org_id: resolve(org_id),
        },
        ProviderConfig::Anthropic { api_key, base_url } => ProviderConfig::Anthropic {
            api_key: resolve_env_vars(api_key),
            base_url: resolve(base_url),
        },
        ProviderConfig::Mock { .. } => config.clone(),
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `bandscore.toml` in the current directory
/// 2. `~/.config/bandscore/config.toml`
///
/// Environment variable overrides: `BANDSCORE_OPENAI_KEY`, `BANDSCORE_ANTHROPIC_KEY`.
pub fn load_config() -> Result<BandscoreConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<BandscoreConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("bandscore.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => BandscoreConfig::default(),
    };

    if let Ok(key) = std::env::var("BANDSCORE_ANTHROPIC_KEY") {
        let entry = config
            .providers
            .entry("anthropic".into())
            .or_insert(ProviderConfig::Anthropic {
                api_key: String::new(),
                base_url: None,
            });
        if let ProviderConfig::Anthropic { api_key, .. } = entry {
            *api_key = key;
        }
    }

    if let Ok(key) = std::env::var("BANDSCORE_OPENAI_KEY") {
        let entry = config
            .providers
            .entry("openai".into())
            .or_insert(ProviderConfig::OpenAI {
                api_key: String::new(),
                base_url: None,
                org_id: None,
            });
        if let ProviderConfig::OpenAI { api_key, .. } = entry {
            *api_key = key;
        }
    }

    Ok(config)
}

/// Parse a config document and resolve `${VAR}` references in provider tables.
pub fn parse_config(content: &str) -> Result<BandscoreConfig> {
    let mut config: BandscoreConfig = toml::from_str(content)?;
    config.providers = config
        .providers
        .iter()
        .map(|(k, v)| (k.clone(), resolve_provider_config(v)))
        .collect();
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("bandscore"))
}

/// Create an assessment provider from its configuration.
pub fn create_provider(name: &str, config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config {
        ProviderConfig::Anthropic { api_key, base_url } => {
            Arc::new(AnthropicProvider::new(api_key, base_url.clone())?)
        }
        ProviderConfig::OpenAI {
            api_key,
            base_url,
            org_id,
        } => Arc::new(OpenAiProvider::new(
            api_key,
            base_url.clone(),
            org_id.clone(),
        )?),
        ProviderConfig::Mock { reply, .. } => match reply {
            Some(reply) => Arc::new(MockProvider::with_fixed_response(reply)),
            None => Arc::new(MockProvider::default()),
        },
    };
    tracing::debug!(provider = name, "created assessment provider");
    Ok(provider)
}

/// Create a speech-to-text backend from its configuration.
pub fn create_transcriber(name: &str, config: &ProviderConfig) -> Result<Arc<dyn Transcriber>> {
    match config {
        ProviderConfig::OpenAI {
            api_key, base_url, ..
        } => Ok(Arc::new(OpenAiTranscriber::new(api_key, base_url.clone())?)),
        ProviderConfig::Mock { transcript, .. } => Ok(match transcript {
            Some(text) => Arc::new(MockTranscriber::new(text)),
            None => Arc::new(MockTranscriber::default()),
        }),
        ProviderConfig::Anthropic { .. } => {
            anyhow::bail!("provider '{name}' (anthropic) does not offer transcription")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("_BANDSCORE_TEST_VAR", "hello");
        assert_eq!(resolve_env_vars("${_BANDSCORE_TEST_VAR}"), "hello");
        assert_eq!(
            resolve_env_vars("prefix_${_BANDSCORE_TEST_VAR}_suffix"),
            "prefix_hello_suffix"
        );
        assert_eq!(resolve_env_vars("${UNTERMINATED"), "${UNTERMINATED");
        std::env::remove_var("_BANDSCORE_TEST_VAR");
    }

    #[test]
    fn default_config() {
        let config = BandscoreConfig::default();
        assert_eq!(config.evaluation_provider, "anthropic");
        assert_eq!(config.transcription_model, "whisper-1");
        assert_eq!(config.max_retries, 2);

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.completion_policy, CompletionPolicy::RequireAllScored);
        assert_eq!(orchestrator.attempt_ttl, Some(Duration::from_secs(168 * 3600)));
    }

    #[test]
    fn parse_provider_config() {
        let toml_str = r#"
evaluation_provider = "openai"
evaluation_model = "gpt-4.1"
completion_policy = "allow-partial"
attempt_ttl_hours = 0
call_timeout_secs = 30

[providers.anthropic]
type = "anthropic"
api_key = "sk-test"

[providers.openai]
type = "openai"
api_key = "sk-openai"

[providers.offline]
type = "mock"
"#;
        let config = parse_config(toml_str).unwrap();
        assert_eq!(config.providers.len(), 3);
        assert!(matches!(
            config.providers.get("anthropic"),
            Some(ProviderConfig::Anthropic { .. })
        ));
        assert_eq!(config.completion_policy, CompletionPolicy::AllowPartial);
        assert_eq!(config.orchestrator_config().attempt_ttl, None);
        let evaluator = config.evaluator_config();
        assert_eq!(evaluator.model, "gpt-4.1");
        assert_eq!(evaluator.call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn debug_masks_keys() {
        let config = ProviderConfig::Anthropic {
            api_key: "sk-secret".into(),
            base_url: None,
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn anthropic_cannot_transcribe() {
        let config = ProviderConfig::Anthropic {
            api_key: "k".into(),
            base_url: None,
        };
        assert!(create_transcriber("anthropic", &config).is_err());
        assert!(create_provider("anthropic", &config).is_ok());
    }

    #[test]
    fn evaluator_set_falls_back_to_objective_modules() {
        use bandscore_core::model::ModuleKind;

        let config = BandscoreConfig::default();
        let set = config.evaluator_set().unwrap();
        assert!(set.supports(ModuleKind::Reading));
        assert!(!set.supports(ModuleKind::Writing));

        let config = parse_config(
            r#"
evaluation_provider = "offline"
transcription_provider = "offline"

[providers.offline]
type = "mock"
"#,
        )
        .unwrap();
        let set = config.evaluator_set().unwrap();
        assert!(set.supports(ModuleKind::Writing));
        assert!(set.supports(ModuleKind::Speaking));
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let err = load_config_from(Some(Path::new("/no/such/bandscore.toml"))).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
