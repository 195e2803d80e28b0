use crate::modelfile::ModelfileError;

/// Errors surfaced by the agent runtime and the Ollama client.
///
/// Tool failures are not represented here: they are reported back to the
/// model as tool results so the conversation can continue.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Ollama API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Ollama server not running at {0}. Start it with: ollama serve")]
    ServerNotRunning(String),
    #[error("model '{0}' not found. Pull it with: ollama pull {0}")]
    ModelNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
    #[error("invalid Modelfile: {0}")]
    Modelfile(#[from] ModelfileError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
