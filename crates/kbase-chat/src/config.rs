//! LLM configuration (`llm-config.json`) and provider selection.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{LLMProvider, ProviderTarget};
use kbase_core::{Error, Result};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:3b";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Stored LLM configuration. Fields absent from the file fall back to env vars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// `"ollama"`, `"openai"` or `"auto"` (OpenAI when a key is present).
    #[serde(default = "default_preferred")]
    pub preferred_provider: String,
    #[serde(default)]
    pub ollama_base_url: Option<String>,
    #[serde(default)]
    pub ollama_model: Option<String>,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub openai_base_url: Option<String>,
    #[serde(default)]
    pub openai_model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

fn default_preferred() -> String {
    "auto".into()
}
fn default_temperature() -> f64 {
    0.1
}
fn default_max_tokens() -> usize {
    1024
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            preferred_provider: default_preferred(),
            ollama_base_url: None,
            ollama_model: None,
            openai_api_key: None,
            openai_base_url: None,
            openai_model: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl LLMConfig {
    /// Load config from file, falling back to env vars and defaults.
    pub fn load(config_path: &Path) -> Self {
        let mut config = match std::fs::read_to_string(config_path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring malformed {}: {}", config_path.display(), e);
                LLMConfig::default()
            }),
            Err(_) => LLMConfig::default(),
        };

        fill_from_env(&mut config.ollama_base_url, "OLLAMA_BASE_URL");
        fill_from_env(&mut config.ollama_model, "LLM_MODEL_NAME");
        fill_from_env(&mut config.openai_api_key, "OPENAI_API_KEY");
        fill_from_env(&mut config.openai_base_url, "OPENAI_BASE_URL");
        fill_from_env(&mut config.openai_model, "OPENAI_MODEL");
        if let Ok(p) = std::env::var("LLM_PROVIDER") {
            if config.preferred_provider == "auto" {
                config.preferred_provider = p;
            }
        }
        config
    }

    /// Resolve which provider, endpoint and model to use.
    pub fn resolve_provider(&self) -> Result<ProviderTarget> {
        let ollama = || ProviderTarget {
            provider: LLMProvider::Ollama,
            base_url: self
                .ollama_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.into()),
            model: self
                .ollama_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.into()),
            api_key: None,
        };
        let openai = |key: &String| ProviderTarget {
            provider: LLMProvider::OpenAI,
            base_url: self
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.into()),
            model: self
                .openai_model
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.into()),
            api_key: Some(key.clone()),
        };

        let target = match self.preferred_provider.as_str() {
            "ollama" => ollama(),
            "openai" => match &self.openai_api_key {
                Some(key) => openai(key),
                None => return Err(Error::Config("openai selected but no API key set".into())),
            },
            "auto" => match &self.openai_api_key {
                Some(key) => openai(key),
                None => ollama(),
            },
            other => return Err(Error::Config(format!("unknown LLM provider '{}'", other))),
        };
        info!("LLM provider: {} ({} at {})", target.provider, target.model, target.base_url);
        Ok(target)
    }
}

fn fill_from_env(slot: &mut Option<String>, key: &str) {
    if slot.is_none() {
        *slot = std::env::var(key).ok().filter(|v| !v.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_values_and_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("llm-config.json");
        std::fs::write(
            &path,
            r#"{"preferred_provider": "ollama", "ollama_base_url": "http://gpu-box:11434", "ollama_model": "qwen2.5:7b"}"#,
        )
        .unwrap();

        let config = LLMConfig::load(&path);
        assert_eq!(config.max_tokens, 1024);
        let target = config.resolve_provider().unwrap();
        assert_eq!(target.provider, LLMProvider::Ollama);
        assert_eq!(target.base_url, "http://gpu-box:11434");
        assert_eq!(target.model, "qwen2.5:7b");
        assert!(target.api_key.is_none());
    }

    #[test]
    fn test_openai_requires_key() {
        let config = LLMConfig {
            preferred_provider: "openai".into(),
            ..Default::default()
        };
        assert!(matches!(config.resolve_provider(), Err(Error::Config(_))));

        let config = LLMConfig {
            preferred_provider: "auto".into(),
            openai_api_key: Some("sk-test".into()),
            ..Default::default()
        };
        let target = config.resolve_provider().unwrap();
        assert_eq!(target.provider, LLMProvider::OpenAI);
        assert_eq!(target.base_url, DEFAULT_OPENAI_URL);
    }

    #[test]
    fn test_unknown_provider() {
        let config = LLMConfig {
            preferred_provider: "carrier-pigeon".into(),
            ..Default::default()
        };
        assert!(config.resolve_provider().is_err());
    }
}
