use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::OllamaConfig;
use crate::error::{AgentError, Result};
use crate::modelfile::{Modelfile, ModelfileError, ModelfileMessage};
use crate::tools::ToolDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One chat message in Ollama's `/api/chat` shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: Some(name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_name: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            function: FunctionCall {
                name: name.into(),
                arguments,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Expected to be an object; validated before dispatch.
    #[serde(default)]
    pub arguments: Value,
}

/// Non-streaming `/api/chat` response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: String,
    pub message: Message,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    #[serde(default)]
    pub eval_count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Debug, Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_ctx: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct CreateRequest<'a> {
    model: &'a str,
    from: &'a str,
    #[serde(skip_serializing_if = "Map::is_empty")]
    parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    license: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    messages: Vec<ModelfileMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// Entry from `/api/tags`
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

/// Inference backend the agent loop talks to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<ChatResponse>;
}

/// Client for a local Ollama server
pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    num_ctx: Option<u32>,
    temperature: Option<f32>,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.host.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            num_ctx: config.num_ctx,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List locally available models
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                debug!(error = %e, "tags request failed");
                AgentError::ServerNotRunning(self.base_url.clone())
            })?;

        let body = check_status(response).await?;
        let tags: TagsResponse = serde_json::from_str(&body)?;
        Ok(tags.models)
    }

    /// Confirm the server is reachable. Returns whether the configured model
    /// is among the pulled models.
    pub async fn check_connection(&self) -> Result<bool> {
        let models = self.list_models().await?;
        let found = models.iter().any(|m| model_matches(&m.name, &self.model));
        info!(models = models.len(), model = %self.model, found, "connected to Ollama");
        Ok(found)
    }

    /// Register a model variant from a Modelfile. Adapters need a blob
    /// upload and are refused before any request is sent.
    pub async fn create_model(&self, name: &str, modelfile: &Modelfile) -> Result<String> {
        if modelfile.adapter.is_some() {
            return Err(ModelfileError::UnsupportedAdapter.into());
        }
        let url = format!("{}/api/create", self.base_url);
        let request = CreateRequest {
            model: name,
            from: &modelfile.from,
            parameters: modelfile.parameters_json(),
            system: modelfile.system.as_deref(),
            template: modelfile.template.as_deref(),
            license: modelfile.license.as_deref(),
            messages: modelfile.messages.clone(),
            stream: false,
        };

        info!(model = %name, from = %modelfile.from, num_ctx = ?modelfile.num_ctx(), "creating model");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, &self.base_url))?;
        let body = check_status(response).await?;
        let created: CreateResponse = serde_json::from_str(&body)?;
        Ok(created.status)
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<ChatResponse> {
        let url = format!("{}/api/chat", self.base_url);
        let options = if self.num_ctx.is_some() || self.temperature.is_some() {
            Some(ChatOptions {
                num_ctx: self.num_ctx,
                temperature: self.temperature,
            })
        } else {
            None
        };
        let request = ChatRequest {
            model: &self.model,
            messages,
            tools: tools
                .iter()
                .map(|t| WireTool {
                    kind: "function",
                    function: t,
                })
                .collect(),
            stream: false,
            options,
        };

        debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, &self.base_url))?;

        let body = match check_status(response).await {
            Err(AgentError::Api { status: 404, message }) if message.contains("not found") => {
                return Err(AgentError::ModelNotFound(self.model.clone()))
            }
            other => other?,
        };

        let chat: ChatResponse = serde_json::from_str(&body)?;
        debug!(
            prompt_tokens = ?chat.prompt_eval_count,
            completion_tokens = ?chat.eval_count,
            tool_calls = chat.message.tool_calls.len(),
            "chat response received"
        );
        Ok(chat)
    }
}

/// `qwen3` matches `qwen3:latest`; tagged names must match exactly.
fn model_matches(available: &str, wanted: &str) -> bool {
    available == wanted || (!wanted.contains(':') && available == format!("{}:latest", wanted))
}

fn transport_error(e: reqwest::Error, base_url: &str) -> AgentError {
    if e.is_connect() {
        AgentError::ServerNotRunning(base_url.to_string())
    } else {
        AgentError::Http(e)
    }
}

async fn check_status(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error)
        .unwrap_or_else(|| {
            if body.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            } else {
                body.clone()
            }
        });
    Err(AgentError::Api {
        status: status.as_u16(),
        message,
    })
}
