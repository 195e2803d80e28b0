use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::Result;

/// File picked up from the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "ollama-coder.toml";

pub const DEFAULT_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "qwen3:8b";

/// Agent configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model server connection
    pub ollama: OllamaConfig,

    /// Conversation loop settings
    pub agent: AgentConfig,

    /// Transcript persistence
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Context window requested per chat call. Leave unset when the model was
    /// registered from a Modelfile that already raises `num_ctx`.
    #[serde(default)]
    pub num_ctx: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default = "default_preview_chars")]
    pub tool_output_preview_chars: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_max_tool_rounds() -> usize {
    25
}

fn default_preview_chars() -> usize {
    2000
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            model: default_model(),
            timeout_secs: default_timeout(),
            num_ctx: None,
            temperature: None,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tool_rounds: default_max_tool_rounds(),
            tool_output_preview_chars: default_preview_chars(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let mut config: Config = toml::from_str(&content)?;
        config.ollama.host = normalize_host(&config.ollama.host);
        info!(path = %path.as_ref().display(), model = %config.ollama.model, "configuration loaded");
        Ok(config)
    }

    /// Resolve the configuration file: an explicit path must exist, otherwise
    /// `ollama-coder.toml` in `dir` is used if present, otherwise defaults.
    pub fn load(explicit: Option<&Path>, dir: &Path) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let candidate = dir.join(DEFAULT_CONFIG_FILE);
                if candidate.is_file() {
                    Self::from_file(candidate)
                } else {
                    debug!("no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Apply `OLLAMA_HOST` and `OLLAMA_CODER_MODEL` overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var("OLLAMA_HOST").ok().as_deref(),
            std::env::var("OLLAMA_CODER_MODEL").ok().as_deref(),
        );
    }

    /// Override host and model, ignoring empty values
    pub fn apply_overrides(&mut self, host: Option<&str>, model: Option<&str>) {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.ollama.host = normalize_host(host);
        }
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            self.ollama.model = model.trim().to_string();
        }
    }

    /// Anchor a relative session path at the project directory
    pub fn resolve_paths(&mut self, dir: &Path) {
        if let Some(path) = self.session.path.as_mut() {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }
}

/// `127.0.0.1:11434` -> `http://127.0.0.1:11434`, trailing slash removed.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}
