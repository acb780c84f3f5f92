// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("failed to parse config {0}: {1}")]
    Parse(String, #[source] serde_yaml::Error),
    #[error("unknown model config: {0}")]
    UnknownModel(String),
    #[error("no model configured; add one under `models:` in the config file")]
    NoModel,
}

/// Wire protocol a model config speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Anthropic,
    /// OpenAI Chat Completions and compatible endpoints (incl. OpenRouter).
    OpenAi,
    /// OpenAI Responses.
    Responses,
    /// GitHub Copilot OAuth proxy (dispatches to Anthropic or Responses
    /// payloads by model family).
    Copilot,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Responses => write!(f, "responses"),
            Self::Copilot => write!(f, "copilot"),
        }
    }
}

/// Extended-thinking / reasoning knobs, passed through to the adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ThinkingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Anthropic thinking budget in tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
    /// Responses/Chat reasoning effort (`"low"`, `"medium"`, `"high"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Responses reasoning summary mode (`"auto"`, `"detailed"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_summary: Option<String>,
}

fn default_true() -> bool {
    true
}

/// One named model entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub protocol: Protocol,
    /// Model id sent on the wire.
    pub model_id: String,
    /// API key, or `env:VAR_NAME` to resolve from the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
    /// Provider hint: run a turn's tool calls concurrently.  Off for model
    /// families known to misbehave with parallel calls.
    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

impl ModelConfig {
    /// Resolve the API key, expanding `env:VAR` indirections and `~`.
    pub fn resolve_api_key(&self) -> Option<String> {
        let raw = self.api_key.as_deref()?;
        if let Some(var) = raw.strip_prefix("env:") {
            return std::env::var(var).ok();
        }
        Some(shellexpand::tilde(raw).to_string())
    }
}

fn default_bash_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name of the model entry the main agent uses.
    #[serde(default)]
    pub main_model: Option<String>,
    #[serde(default)]
    pub models: HashMap<String, ModelConfig>,
    /// Per-sub-agent model overrides (`Task`, `Oracle`, ...); sub-agents
    /// without an override inherit the main model.
    #[serde(default)]
    pub sub_agent_models: HashMap<String, String>,
    #[serde(default = "default_bash_timeout")]
    pub bash_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            main_model: None,
            models: HashMap::new(),
            sub_agent_models: HashMap::new(),
            bash_timeout_secs: default_bash_timeout(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        serde_yaml::from_str(&text)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e))
    }

    /// Load from the default path, or fall back to an empty config when the
    /// file does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// The model entry for the main agent.
    pub fn main_model(&self) -> Result<(&str, &ModelConfig), ConfigError> {
        if let Some(name) = &self.main_model {
            let model = self
                .models
                .get(name)
                .ok_or_else(|| ConfigError::UnknownModel(name.clone()))?;
            return Ok((name.as_str(), model));
        }
        // Single configured model works without an explicit selection.
        let mut iter = self.models.iter();
        match (iter.next(), iter.next()) {
            (Some((name, model)), None) => Ok((name.as_str(), model)),
            _ => Err(ConfigError::NoModel),
        }
    }

    /// The model entry a sub-agent type should use, falling back to main.
    pub fn sub_agent_model(&self, sub_agent_type: &str) -> Result<(&str, &ModelConfig), ConfigError> {
        if let Some(name) = self.sub_agent_models.get(sub_agent_type) {
            let model = self
                .models
                .get(name)
                .ok_or_else(|| ConfigError::UnknownModel(name.clone()))?;
            return Ok((name.as_str(), model));
        }
        self.main_model()
    }
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tandem")
        .join("config.yaml")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
main_model: sonnet
models:
  sonnet:
    protocol: anthropic
    model_id: claude-sonnet-4-5
    api_key: env:ANTHROPIC_API_KEY
    context_limit: 200000
    thinking:
      enabled: true
      budget_tokens: 4096
  router:
    protocol: open_ai
    model_id: anthropic/claude-sonnet-4-5
    base_url: https://openrouter.ai/api/v1
sub_agent_models:
  Oracle: router
bash_timeout_secs: 30
"#;

    #[test]
    fn parses_sample_config() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.bash_timeout_secs, 30);
        let (name, model) = cfg.main_model().unwrap();
        assert_eq!(name, "sonnet");
        assert_eq!(model.protocol, Protocol::Anthropic);
        assert_eq!(model.context_limit, Some(200_000));
        assert!(model.thinking.as_ref().unwrap().enabled);
        assert!(model.parallel_tool_calls, "defaults to true");
    }

    #[test]
    fn sub_agent_override_and_fallback() {
        let cfg: Config = serde_yaml::from_str(SAMPLE).unwrap();
        let (name, model) = cfg.sub_agent_model("Oracle").unwrap();
        assert_eq!(name, "router");
        assert_eq!(model.protocol, Protocol::OpenAi);
        let (name, _) = cfg.sub_agent_model("Explore").unwrap();
        assert_eq!(name, "sonnet", "falls back to main model");
    }

    #[test]
    fn unknown_main_model_is_an_error() {
        let cfg: Config = serde_yaml::from_str("main_model: nope\nmodels: {}\n").unwrap();
        assert!(matches!(cfg.main_model(), Err(ConfigError::UnknownModel(_))));
    }

    #[test]
    fn single_model_needs_no_selection() {
        let yaml = r#"
models:
  only:
    protocol: responses
    model_id: gpt-5
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let (name, _) = cfg.main_model().unwrap();
        assert_eq!(name, "only");
    }

    #[test]
    fn empty_config_has_no_model() {
        let cfg = Config::default();
        assert!(matches!(cfg.main_model(), Err(ConfigError::NoModel)));
    }

    #[test]
    fn api_key_env_indirection() {
        std::env::set_var("TANDEM_TEST_KEY_XYZ", "sk-123");
        let model = ModelConfig {
            protocol: Protocol::Anthropic,
            model_id: "m".into(),
            api_key: Some("env:TANDEM_TEST_KEY_XYZ".into()),
            base_url: None,
            context_limit: None,
            max_tokens: None,
            temperature: None,
            thinking: None,
            parallel_tool_calls: true,
        };
        assert_eq!(model.resolve_api_key().as_deref(), Some("sk-123"));
        std::env::remove_var("TANDEM_TEST_KEY_XYZ");
    }

    #[test]
    fn config_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = Config::load(&path).unwrap();
        assert!(cfg.models.contains_key("router"));
    }
}
