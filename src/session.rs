//! JSONL tree session store for conversation transcripts.
//!
//! Sessions are stored as append-only JSONL files where each entry has an `id` and
//! optional `parent_id`, forming an implicit tree. Resuming a session walks the
//! `parent_id` chain from the most recent entry back to the root, so a resumed
//! conversation that diverges from an earlier one simply becomes a new branch.
//!
//! Format:
//! ```jsonl
//! {"id":"a1","parent_id":null,"role":"user","content":"list the files","ts":1700000000}
//! {"id":"a2","parent_id":"a1","role":"assistant","content":"","ts":1700000001,"metadata":{"tool_calls":[...]}}
//! {"id":"a3","parent_id":"a2","role":"tool","content":"[\"src/\"]","ts":1700000001,"metadata":{"tool_name":"list_files"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::llm::{Message, Role, ToolCall};

/// A single entry in the JSONL session tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub role: String,
    pub content: String,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SessionEntry {
    pub fn from_message(message: &Message, parent_id: Option<String>) -> Self {
        let mut metadata = serde_json::Map::new();
        if !message.tool_calls.is_empty() {
            metadata.insert("tool_calls".into(), json!(message.tool_calls));
        }
        if let Some(name) = &message.tool_name {
            metadata.insert("tool_name".into(), json!(name));
        }

        Self {
            id: SessionStore::new_id(),
            parent_id,
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            ts: chrono::Utc::now().timestamp(),
            metadata: if metadata.is_empty() {
                None
            } else {
                Some(serde_json::Value::Object(metadata))
            },
        }
    }

    /// Rebuild the chat message. Entries with an unknown role yield `None`.
    pub fn to_message(&self) -> Option<Message> {
        let role = Role::parse(&self.role)?;
        let meta = self.metadata.as_ref();
        let tool_calls = meta
            .and_then(|m| m.get("tool_calls"))
            .and_then(|v| serde_json::from_value::<Vec<ToolCall>>(v.clone()).ok())
            .unwrap_or_default();
        let tool_name = meta
            .and_then(|m| m.get("tool_name"))
            .and_then(|v| v.as_str())
            .map(String::from);

        Some(Message {
            role,
            content: self.content.clone(),
            tool_calls,
            tool_name,
        })
    }
}

/// Transcript file. Entries are only ever appended.
pub struct SessionStore {
    path: PathBuf,
}

fn invalid_data(e: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

impl SessionStore {
    /// The file is created lazily on first append.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Write one entry as a JSON line, creating parent directories as needed.
    pub fn append(&self, entry: &SessionEntry) -> io::Result<()> {
        if let Some(dir) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string(entry).map_err(invalid_data)?;
        let mut out = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(out, "{}", json)
    }

    /// All entries in file order. A missing file is an empty session.
    pub fn load_all(&self) -> io::Result<Vec<SessionEntry>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionEntry = serde_json::from_str(line.trim()).map_err(invalid_data)?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Entries from the root down to `leaf_id`, following `parent_id` links.
    /// A dangling parent ends the walk.
    pub fn load_branch(&self, leaf_id: &str) -> io::Result<Vec<SessionEntry>> {
        let entries = self.load_all()?;
        let by_id: HashMap<&str, &SessionEntry> =
            entries.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut chain: Vec<SessionEntry> =
            std::iter::successors(by_id.get(leaf_id).copied(), |e| {
                e.parent_id.as_deref().and_then(|p| by_id.get(p).copied())
            })
            .take(entries.len())
            .cloned()
            .collect();
        chain.reverse();
        Ok(chain)
    }

    /// ID of the most recently appended entry.
    pub fn latest_leaf(&self) -> io::Result<Option<String>> {
        Ok(self.load_all()?.pop().map(|e| e.id))
    }
}

/// Mirrors the live conversation into a [`SessionStore`].
pub struct SessionRecorder {
    store: SessionStore,
    last_id: Option<String>,
}

impl SessionRecorder {
    /// Start a fresh branch at the root of the file.
    pub fn new(store: SessionStore) -> Self {
        Self {
            store,
            last_id: None,
        }
    }

    /// Continue the latest branch. Returns the recorder and the messages of
    /// that branch in chronological order.
    pub fn resume(store: SessionStore) -> io::Result<(Self, Vec<Message>)> {
        let Some(leaf) = store.latest_leaf()? else {
            return Ok((Self::new(store), Vec::new()));
        };

        let branch = store.load_branch(&leaf)?;
        let messages: Vec<Message> = branch
            .iter()
            .filter_map(|entry| {
                let message = entry.to_message();
                if message.is_none() {
                    warn!(id = %entry.id, role = %entry.role, "skipping session entry with unknown role");
                }
                message
            })
            .collect();
        debug!(path = %store.path().display(), messages = messages.len(), "session resumed");

        Ok((
            Self {
                store,
                last_id: Some(leaf),
            },
            messages,
        ))
    }

    pub fn record(&mut self, message: &Message) -> io::Result<()> {
        let entry = SessionEntry::from_message(message, self.last_id.clone());
        self.store.append(&entry)?;
        self.last_id = Some(entry.id);
        Ok(())
    }
}
