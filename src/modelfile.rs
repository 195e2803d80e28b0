//! Modelfile support.
//!
//! A Modelfile describes a model variant to register with the Ollama server:
//! a base model plus parameter overrides, most commonly a larger `num_ctx` so
//! the agent can keep whole source files in its context.
//!
//! ```text
//! FROM qwen3:8b
//! PARAMETER num_ctx 32768
//! SYSTEM """
//! You are a careful coding assistant.
//! """
//! ```

use serde::Serialize;
use serde_json::{Map, Value};

pub const DEFAULT_CONTEXT_LENGTH: u32 = 32768;

/// Parameters the server always expects as a list.
const LIST_PARAMETERS: &[&str] = &["stop"];

const MESSAGE_ROLES: &[&str] = &["system", "user", "assistant"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelfileError {
    #[error("line {line}: unknown instruction '{instruction}'")]
    UnknownInstruction { line: usize, instruction: String },
    #[error("line {line}: {instruction} requires a value")]
    MissingValue { line: usize, instruction: String },
    #[error("line {line}: unterminated \"\"\" block")]
    Unterminated { line: usize },
    #[error("line {line}: invalid MESSAGE role '{role}'")]
    InvalidRole { line: usize, role: String },
    #[error("missing FROM instruction")]
    MissingFrom,
    #[error("{field} value cannot be written as Modelfile text")]
    Unrepresentable { field: String },
    #[error("ADAPTER is not supported; register the adapter with `ollama create` instead")]
    UnsupportedAdapter,
}

/// Seed conversation entry (`MESSAGE <role> <content>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelfileMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modelfile {
    pub from: String,
    /// In file order; keys may repeat (`stop`).
    pub parameters: Vec<(String, String)>,
    pub system: Option<String>,
    pub template: Option<String>,
    pub adapter: Option<String>,
    pub license: Option<String>,
    pub messages: Vec<ModelfileMessage>,
}

impl Modelfile {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            parameters: Vec::new(),
            system: None,
            template: None,
            adapter: None,
            license: None,
            messages: Vec::new(),
        }
    }

    /// A base model with its context window raised to `num_ctx` tokens.
    pub fn for_context_length(from: impl Into<String>, num_ctx: u32) -> Self {
        let mut modelfile = Self::new(from);
        modelfile.set_parameter("num_ctx", num_ctx.to_string());
        modelfile
    }

    pub fn parse(text: &str) -> Result<Self, ModelfileError> {
        let mut from = None;
        let mut modelfile = Self::new(String::new());
        let mut lines = text.lines().enumerate();

        while let Some((idx, raw)) = lines.next() {
            let line = idx + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (instruction, rest) = split_word(trimmed);
            let upper = instruction.to_ascii_uppercase();
            let missing = || ModelfileError::MissingValue {
                line,
                instruction: upper.clone(),
            };

            match upper.as_str() {
                "PARAMETER" | "MESSAGE" => {
                    let (key, tail) = split_word(rest);
                    if key.is_empty() {
                        return Err(missing());
                    }
                    let value = read_value(tail, line, &mut lines)?;
                    if upper == "PARAMETER" {
                        if value.is_empty() {
                            return Err(missing());
                        }
                        modelfile.parameters.push((key.to_string(), value));
                    } else {
                        let role = key.to_ascii_lowercase();
                        if !MESSAGE_ROLES.contains(&role.as_str()) {
                            return Err(ModelfileError::InvalidRole {
                                line,
                                role: key.to_string(),
                            });
                        }
                        modelfile.messages.push(ModelfileMessage {
                            role,
                            content: value,
                        });
                    }
                }
                "FROM" | "SYSTEM" | "TEMPLATE" | "ADAPTER" | "LICENSE" => {
                    let value = read_value(rest, line, &mut lines)?;
                    if value.is_empty() && upper != "SYSTEM" {
                        return Err(missing());
                    }
                    match upper.as_str() {
                        "FROM" => from = Some(value),
                        "SYSTEM" => modelfile.system = Some(value),
                        "TEMPLATE" => modelfile.template = Some(value),
                        "ADAPTER" => modelfile.adapter = Some(value),
                        _ => modelfile.license = Some(value),
                    }
                }
                _ => {
                    return Err(ModelfileError::UnknownInstruction {
                        line,
                        instruction: instruction.to_string(),
                    })
                }
            }
        }

        modelfile.from = from.ok_or(ModelfileError::MissingFrom)?;
        Ok(modelfile)
    }

    /// Last `num_ctx` value, if it parses.
    pub fn num_ctx(&self) -> Option<u32> {
        self.parameters
            .iter()
            .rev()
            .find(|(k, _)| k == "num_ctx")
            .and_then(|(_, v)| v.parse().ok())
    }

    /// Replace every existing value for `key` with a single `value`.
    pub fn set_parameter(&mut self, key: &str, value: impl Into<String>) {
        self.parameters.retain(|(k, _)| k != key);
        self.parameters.push((key.to_string(), value.into()));
    }

    /// Parameters as typed JSON for `/api/create`. Repeated keys and list
    /// parameters become arrays.
    pub fn parameters_json(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (key, raw) in &self.parameters {
            let is_list = LIST_PARAMETERS.contains(&key.as_str());
            let value = if is_list {
                Value::String(raw.clone())
            } else {
                typed_value(raw)
            };
            match map.get_mut(key) {
                Some(Value::Array(items)) => items.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
                None if is_list => {
                    map.insert(key.clone(), Value::Array(vec![value]));
                }
                None => {
                    map.insert(key.clone(), value);
                }
            }
        }
        map
    }

    /// Render back to Modelfile text. Fails for values that no quoting form
    /// can carry, such as text containing `"""`.
    pub fn render(&self) -> Result<String, ModelfileError> {
        let mut out = format!("FROM {}\n", self.from);
        if let Some(adapter) = &self.adapter {
            out.push_str(&format!("ADAPTER {}\n", quote("ADAPTER", adapter)?));
        }
        for (key, value) in &self.parameters {
            out.push_str(&format!("PARAMETER {} {}\n", key, quote(key, value)?));
        }
        if let Some(template) = &self.template {
            out.push_str(&format!("TEMPLATE {}\n", quote("TEMPLATE", template)?));
        }
        if let Some(system) = &self.system {
            out.push_str(&format!("SYSTEM {}\n", quote("SYSTEM", system)?));
        }
        if let Some(license) = &self.license {
            out.push_str(&format!("LICENSE {}\n", quote("LICENSE", license)?));
        }
        for message in &self.messages {
            out.push_str(&format!(
                "MESSAGE {} {}\n",
                message.role,
                quote("MESSAGE", &message.content)?
            ));
        }
        Ok(out)
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

/// Read a possibly `"""`-delimited value, consuming continuation lines.
fn read_value<'a, I>(rest: &str, line: usize, lines: &mut I) -> Result<String, ModelfileError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    let rest = rest.trim_end();
    let Some(after) = rest.strip_prefix("\"\"\"") else {
        return Ok(unquote(rest).to_string());
    };

    if let Some(end) = after.find("\"\"\"") {
        return Ok(after[..end].to_string());
    }

    let mut buf = after.to_string();
    for (_, next) in lines.by_ref() {
        buf.push('\n');
        if let Some(end) = next.find("\"\"\"") {
            buf.push_str(&next[..end]);
            return Ok(buf.trim_matches('\n').to_string());
        }
        buf.push_str(next);
    }
    Err(ModelfileError::Unterminated { line })
}

fn unquote(s: &str) -> &str {
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

fn quote(field: &str, value: &str) -> Result<String, ModelfileError> {
    let bare_ok = !value.is_empty()
        && !value.contains('\n')
        && value.trim() == value
        && !value.starts_with('"');
    if bare_ok {
        return Ok(value.to_string());
    }
    // inside """...""" the first closing delimiter wins
    if value.contains("\"\"\"") || value.ends_with('"') {
        return Err(ModelfileError::Unrepresentable {
            field: field.to_string(),
        });
    }
    Ok(format!("\"\"\"{}\"\"\"", value))
}

fn typed_value(raw: &str) -> Value {
    if let Ok(int) = raw.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = raw.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
