//! Service configuration.
//!
//! `ServiceConfig::default()` is a complete, working configuration. Every
//! field can be overridden through `TONECRAFT_*` environment variables via
//! `ServiceConfig::from_env()`.

use std::net::SocketAddr;

use serde::Serialize;
use thiserror::Error;

use crate::pipeline::llm::types::ReasoningEffort;
use crate::pipeline::segment::SegmenterConfig;
use crate::pipeline::validation::ValidationConfig;

/// Application-level constants
pub const APP_NAME: &str = "Tonecraft";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "TONECRAFT_";

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,tonecraft=debug,tower_http=info"
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Logical model names per pipeline stage. The dispatcher routes each name
/// to a backend by prefix.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRoster {
    /// Final rewrite (streamed to the client).
    pub generation: String,
    /// Structure labeler primary.
    pub labeler: String,
    /// Independent second opinion for the all-safe recovery path.
    pub labeler_fallback: String,
    /// Situation analyzer.
    pub analysis: String,
    /// Over-length segment refiner.
    pub refiner: String,
    /// Identity booster.
    pub identity: String,
}

impl Default for ModelRoster {
    fn default() -> Self {
        Self {
            generation: "gpt-4o".into(),
            labeler: "gpt-4o-mini".into(),
            labeler_fallback: "gemini-2.0-flash".into(),
            analysis: "gpt-4o-mini".into(),
            refiner: "gpt-4o-mini".into(),
            identity: "gpt-4o-mini".into(),
        }
    }
}

/// Credentials and endpoints for the model backends.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_base_url: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub ollama_base_url: String,
    /// Network timeout applied to every model call.
    pub request_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            anthropic_api_key: None,
            anthropic_base_url: "https://api.anthropic.com/v1".into(),
            gemini_api_key: None,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            ollama_base_url: "http://localhost:11434".into(),
            request_timeout_secs: 60,
        }
    }
}

/// Sampling parameters for the final generation and its repair retry.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: u32,
    pub reasoning_effort: ReasoningEffort,
    /// Temperature for the single repair retry. Always lower than `temperature`.
    pub retry_temperature: f32,
    pub retry_reasoning_effort: ReasoningEffort,
    /// Token ceiling for auxiliary calls (labeler, analyzer, refiner, booster).
    pub auxiliary_max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            reasoning_effort: ReasoningEffort::Low,
            retry_temperature: 0.3,
            retry_reasoning_effort: ReasoningEffort::High,
            auxiliary_max_tokens: 1024,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub bind_addr: SocketAddr,
    /// Requests longer than this (in characters) are rejected up front.
    pub max_input_chars: usize,
    pub models: ModelRoster,
    pub backends: BackendSettings,
    pub generation: GenerationSettings,
    pub segmenter: SegmenterConfig,
    /// Segments longer than this (in characters) are sent to the refiner.
    pub refiner_threshold_chars: usize,
    pub identity_booster_enabled: bool,
    /// Masked text shorter than this never triggers the identity booster.
    pub identity_min_chars: usize,
    pub validation: ValidationConfig,
    /// Supplementary knowledge blocks passed to the prompt assembler.
    pub rag_max_blocks: usize,
    /// Capacity of the streaming event channel.
    pub stream_buffer: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            max_input_chars: 3000,
            models: ModelRoster::default(),
            backends: BackendSettings::default(),
            generation: GenerationSettings::default(),
            segmenter: SegmenterConfig::default(),
            refiner_threshold_chars: 160,
            identity_booster_enabled: true,
            identity_min_chars: 20,
            validation: ValidationConfig::default(),
            rag_max_blocks: 3,
            stream_buffer: 64,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Environment overrides
// ═══════════════════════════════════════════════════════════

impl ServiceConfig {
    /// Load defaults, then apply `TONECRAFT_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(v) = get("BIND_ADDR") {
            config.bind_addr = parse_value("BIND_ADDR", &v)?;
        }
        if let Some(v) = get("MAX_INPUT_CHARS") {
            config.max_input_chars = parse_value("MAX_INPUT_CHARS", &v)?;
        }

        let models = &mut config.models;
        for (name, slot) in [
            ("MODEL_GENERATION", &mut models.generation),
            ("MODEL_LABELER", &mut models.labeler),
            ("MODEL_LABELER_FALLBACK", &mut models.labeler_fallback),
            ("MODEL_ANALYSIS", &mut models.analysis),
            ("MODEL_REFINER", &mut models.refiner),
            ("MODEL_IDENTITY", &mut models.identity),
        ] {
            if let Some(v) = get(name) {
                *slot = v;
            }
        }

        let backends = &mut config.backends;
        backends.openai_api_key = get("OPENAI_API_KEY").or(lookup("OPENAI_API_KEY"));
        backends.anthropic_api_key = get("ANTHROPIC_API_KEY").or(lookup("ANTHROPIC_API_KEY"));
        backends.gemini_api_key = get("GEMINI_API_KEY").or(lookup("GEMINI_API_KEY"));
        for (name, slot) in [
            ("OPENAI_BASE_URL", &mut backends.openai_base_url),
            ("ANTHROPIC_BASE_URL", &mut backends.anthropic_base_url),
            ("GEMINI_BASE_URL", &mut backends.gemini_base_url),
            ("OLLAMA_BASE_URL", &mut backends.ollama_base_url),
        ] {
            if let Some(v) = get(name) {
                *slot = v.trim_end_matches('/').to_string();
            }
        }
        if let Some(v) = get("REQUEST_TIMEOUT_SECS") {
            backends.request_timeout_secs = parse_value("REQUEST_TIMEOUT_SECS", &v)?;
        }

        if let Some(v) = get("TEMPERATURE") {
            config.generation.temperature = parse_value("TEMPERATURE", &v)?;
        }
        if let Some(v) = get("RETRY_TEMPERATURE") {
            config.generation.retry_temperature = parse_value("RETRY_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("MAX_TOKENS") {
            config.generation.max_tokens = parse_value("MAX_TOKENS", &v)?;
        }
        if config.generation.retry_temperature > config.generation.temperature {
            config.generation.retry_temperature = config.generation.temperature;
        }

        if let Some(v) = get("SEGMENT_MAX_CHARS") {
            config.segmenter.max_unit_chars = parse_value("SEGMENT_MAX_CHARS", &v)?;
        }
        if let Some(v) = get("REFINER_THRESHOLD_CHARS") {
            config.refiner_threshold_chars = parse_value("REFINER_THRESHOLD_CHARS", &v)?;
        }
        if let Some(v) = get("IDENTITY_BOOSTER") {
            config.identity_booster_enabled = parse_bool("IDENTITY_BOOSTER", &v)?;
        }
        if let Some(v) = get("REDACTION_MIN_CHARS") {
            config.validation.redaction_min_chars = parse_value("REDACTION_MIN_CHARS", &v)?;
        }
        if let Some(v) = get("RAG_MAX_BLOCKS") {
            config.rag_max_blocks = parse_value("RAG_MAX_BLOCKS", &v)?;
        }

        Ok(config)
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{key}"),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{key}"),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_name_is_tonecraft() {
        assert_eq!(APP_NAME, "Tonecraft");
    }

    #[test]
    fn defaults_without_environment() {
        let config = ServiceConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.max_input_chars, 3000);
        assert_eq!(config.segmenter.max_unit_chars, 250);
        assert!(config.identity_booster_enabled);
        assert!(config.backends.openai_api_key.is_none());
        assert!(config.generation.retry_temperature < config.generation.temperature);
    }

    #[test]
    fn overrides_models_and_limits() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("TONECRAFT_MODEL_GENERATION", "claude-sonnet-4"),
            ("TONECRAFT_MAX_INPUT_CHARS", "1200"),
            ("TONECRAFT_IDENTITY_BOOSTER", "off"),
            ("TONECRAFT_OLLAMA_BASE_URL", "http://gpu-box:11434/"),
        ]))
        .unwrap();
        assert_eq!(config.models.generation, "claude-sonnet-4");
        assert_eq!(config.max_input_chars, 1200);
        assert!(!config.identity_booster_enabled);
        assert_eq!(config.backends.ollama_base_url, "http://gpu-box:11434");
    }

    #[test]
    fn falls_back_to_vendor_key_names() {
        let config =
            ServiceConfig::from_lookup(lookup_from(&[("OPENAI_API_KEY", "sk-test")])).unwrap();
        assert_eq!(config.backends.openai_api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn rejects_unparseable_numbers() {
        let err = ServiceConfig::from_lookup(lookup_from(&[("TONECRAFT_MAX_TOKENS", "lots")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "TONECRAFT_MAX_TOKENS".into(),
                value: "lots".into(),
            }
        );
    }

    #[test]
    fn retry_temperature_never_exceeds_base() {
        let config = ServiceConfig::from_lookup(lookup_from(&[
            ("TONECRAFT_TEMPERATURE", "0.2"),
            ("TONECRAFT_RETRY_TEMPERATURE", "0.9"),
        ]))
        .unwrap();
        assert!((config.generation.retry_temperature - 0.2).abs() < f32::EPSILON);
    }
}
