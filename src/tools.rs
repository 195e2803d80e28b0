//! Project tools exposed to the model for function calling
//!
//! Provides tools for:
//! - Reading files
//! - Listing directories
//! - Editing or creating files
//!
//! Every path is resolved against the workspace root and rejected if it
//! escapes it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

/// Tool execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<Value>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            output: Value::Null,
            error: Some(msg.into()),
        }
    }

    /// Content of the tool message sent back to the model: string output as
    /// is, other output as JSON, failures as `{"error": ...}`.
    pub fn to_content(&self) -> String {
        match (&self.error, &self.output) {
            (Some(error), _) => serde_json::json!({ "error": error }).to_string(),
            (None, Value::String(text)) => text.clone(),
            (None, other) => other.to_string(),
        }
    }
}

impl From<ToolError> for ToolResult {
    fn from(e: ToolError) -> Self {
        ToolResult::err(e.to_string())
    }
}

/// Tool definition for LLM function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Access to path '{0}' is not allowed. Only paths within the current working directory are permitted.")]
    PathNotAllowed(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("File not found or is not a regular file: {0}")]
    NotAFile(String),
    #[error("Path not found: {0}")]
    NotFound(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("'old_str' not found in file {0}.")]
    OldStrNotFound(String),
    #[error("File is not valid UTF-8 text: {0}")]
    NotText(String),
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ToolError {
    fn io(context: &'static str, path: &str, source: io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_string(),
            source,
        }
    }
}

/// Project directory every tool is confined to
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            root: root.as_ref().canonicalize()?,
        })
    }

    pub fn current_dir() -> io::Result<Self> {
        Self::new(std::env::current_dir()?)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` to an absolute path inside the workspace.
    ///
    /// `.` and `..` are folded lexically, then the longest existing ancestor
    /// is canonicalized so symlinks pointing outside the root are caught.
    /// The containment check is per path component.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let candidate = Path::new(raw);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let resolved = canonicalize_existing(&normalize(&joined))
            .map_err(|e| ToolError::io("Error resolving path", raw, e))?;

        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            warn!(path = %raw, "path outside workspace rejected");
            Err(ToolError::PathNotAllowed(raw.to_string()))
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

const MAX_LINK_HOPS: usize = 40;

/// Canonicalize the longest prefix of `path` that exists and re-attach the
/// rest. Dangling symlinks are followed to where they would create a file.
fn canonicalize_existing(path: &Path) -> io::Result<PathBuf> {
    let mut current = path.to_path_buf();
    'hops: for _ in 0..MAX_LINK_HOPS {
        let mut existing = current.as_path();
        let mut tail = Vec::new();
        loop {
            match fs::symlink_metadata(existing) {
                Ok(meta) if meta.file_type().is_symlink() && !existing.exists() => {
                    let target = fs::read_link(existing)?;
                    let base = match existing.parent() {
                        Some(parent) => parent.canonicalize()?,
                        None => PathBuf::from("/"),
                    };
                    let mut next = normalize(&base.join(target));
                    for part in tail.iter().rev() {
                        next.push(part);
                    }
                    current = next;
                    continue 'hops;
                }
                Ok(_) => {
                    let mut resolved = existing.canonicalize()?;
                    for part in tail.iter().rev() {
                        resolved.push(part);
                    }
                    return Ok(resolved);
                }
                Err(_) => match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        tail.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Ok(current.clone()),
                },
            }
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        "too many levels of symbolic links",
    ))
}

/// File tools for a coding agent
pub struct CodingTools {
    workspace: Workspace,
}

impl CodingTools {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Get all available tool definitions for LLM function calling
    pub fn get_tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "read_file".to_string(),
                description: "Read the contents of a given relative file path. Use this when you want to see what's inside a file. Do not use this with directory names.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The relative path of a file in the working directory."
                        }
                    },
                    "required": ["path"]
                }),
            },
            ToolDefinition {
                name: "list_files".to_string(),
                description: "List files and directories at a given path. If no path is provided, lists files in the current directory. Returns a JSON string array.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "Optional relative path to list files from. Defaults to current directory if not provided."
                        }
                    },
                    "required": []
                }),
            },
            ToolDefinition {
                name: "edit_file".to_string(),
                description: "Make edits to a text file. Replaces 'old_str' with 'new_str' in the given file. 'old_str' and 'new_str' MUST be different from each other. If the file specified with path doesn't exist AND 'old_str' is empty, it will be created with 'new_str' as content. If 'old_str' is provided, it must exist in the file. If 'old_str' is empty and file exists, 'new_str' will be appended to the end of the file.".to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "path": {
                            "type": "string",
                            "description": "The path to the file."
                        },
                        "old_str": {
                            "type": "string",
                            "description": "Text to search for. If creating a new file, this should be empty. If provided, it must exist in the file."
                        },
                        "new_str": {
                            "type": "string",
                            "description": "Text to replace old_str with, or the content for a new file."
                        }
                    },
                    "required": ["path", "new_str"]
                }),
            },
        ]
    }

    /// Execute a tool by name with the arguments the model supplied
    pub fn execute(&self, name: &str, arguments: &Value) -> ToolResult {
        let params = match as_object(arguments) {
            Some(params) => params,
            None => {
                warn!(tool = %name, "tool arguments are not an object");
                return ToolResult::err(format!(
                    "Tool arguments for '{}' are not in the expected dictionary format. Received arguments: {}",
                    name, arguments
                ));
            }
        };

        info!(tool = %name, "executing tool");
        let str_param = |key: &str| params.get(key).and_then(|v| v.as_str());

        let result = match name {
            "read_file" => match str_param("path") {
                Some(path) if !path.is_empty() => self.read_file(path),
                _ => Err(ToolError::InvalidInput("Path is required.".into())),
            },
            "list_files" => self.list_files(str_param("path").unwrap_or(".")),
            "edit_file" => match (str_param("path"), str_param("new_str")) {
                (Some(path), Some(new_str)) => {
                    self.edit_file(path, str_param("old_str"), new_str)
                }
                _ => Err(ToolError::InvalidInput(
                    "Invalid input: 'path' and 'new_str' are required.".into(),
                )),
            },
            _ => return ToolResult::err(format!("Tool '{}' not found by agent.", name)),
        };

        result.unwrap_or_else(ToolResult::from)
    }

    // ========== File Tools ==========

    /// Read a UTF-8 file and return its raw content
    pub fn read_file(&self, path: &str) -> Result<ToolResult, ToolError> {
        let resolved = self.workspace.resolve(path)?;
        if !resolved.is_file() {
            return Err(ToolError::NotAFile(path.to_string()));
        }

        let bytes = fs::read(&resolved).map_err(|e| ToolError::io("Error reading file", path, e))?;
        let content = String::from_utf8(bytes).map_err(|_| ToolError::NotText(path.to_string()))?;
        Ok(ToolResult::ok(content))
    }

    /// List entries of a directory, directories suffixed with `/`
    pub fn list_files(&self, path: &str) -> Result<ToolResult, ToolError> {
        let resolved = self.workspace.resolve(path)?;
        if !resolved.exists() {
            return Err(ToolError::NotFound(path.to_string()));
        }
        if !resolved.is_dir() {
            return Err(ToolError::NotADirectory(path.to_string()));
        }

        let read_dir =
            fs::read_dir(&resolved).map_err(|e| ToolError::io("Error listing files in", path, e))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| ToolError::io("Error listing files in", path, e))?;
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();

        Ok(ToolResult::ok(serde_json::to_string(&entries).unwrap_or_default()))
    }

    /// Replace every occurrence of `old_str`, append when `old_str` is empty,
    /// or create the file when it does not exist yet.
    pub fn edit_file(
        &self,
        path: &str,
        old_str: Option<&str>,
        new_str: &str,
    ) -> Result<ToolResult, ToolError> {
        if old_str == Some(new_str) {
            return Err(ToolError::InvalidInput(
                "Invalid input: 'old_str' and 'new_str' must be different if 'old_str' is provided."
                    .into(),
            ));
        }

        let resolved = self.workspace.resolve(path)?;
        let old_str = old_str.unwrap_or("");

        if !resolved.exists() {
            if !old_str.is_empty() {
                return Err(ToolError::InvalidInput(format!(
                    "File not found: {}, and 'old_str' was provided, so not creating a new file.",
                    path
                )));
            }
            return self.create_file(&resolved, path, new_str);
        }
        if !resolved.is_file() {
            return Err(ToolError::InvalidInput(format!(
                "Path exists but is not a file: {}",
                path
            )));
        }

        let original =
            fs::read_to_string(&resolved).map_err(|e| ToolError::io("Error editing file", path, e))?;
        let modified = if old_str.is_empty() {
            format!("{}{}", original, new_str)
        } else {
            if !original.contains(old_str) {
                return Err(ToolError::OldStrNotFound(path.to_string()));
            }
            original.replace(old_str, new_str)
        };

        fs::write(&resolved, modified).map_err(|e| ToolError::io("Error editing file", path, e))?;
        info!(path = %path, "file edited");
        Ok(ToolResult::ok("OK"))
    }

    fn create_file(&self, resolved: &Path, path: &str, content: &str) -> Result<ToolResult, ToolError> {
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|e| ToolError::io("Failed to create file", path, e))?;
        }
        // create_new refuses to follow a link planted after resolution
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(resolved)
            .map_err(|e| ToolError::io("Failed to create file", path, e))?;
        file.write_all(content.as_bytes())
            .map_err(|e| ToolError::io("Failed to create file", path, e))?;
        info!(path = %path, "file created");
        Ok(ToolResult::ok(format!("Successfully created file {}", path)))
    }
}

/// Arguments must be an object; some models send the object JSON-encoded as
/// a string, which is accepted too.
fn as_object(arguments: &Value) -> Option<serde_json::Map<String, Value>> {
    match arguments {
        Value::Object(map) => Some(map.clone()),
        Value::Null => Some(serde_json::Map::new()),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CodingTools) {
        let dir = TempDir::new().unwrap();
        let tools = CodingTools::new(Workspace::new(dir.path()).unwrap());
        (dir, tools)
    }

    #[test]
    fn test_tool_definitions() {
        let (_dir, tools) = setup();
        let defs = tools.get_tool_definitions();
        assert_eq!(defs.len(), 3);
        assert!(defs.iter().any(|d| d.name == "read_file"));
        assert!(defs.iter().any(|d| d.name == "list_files"));
        let edit = defs.iter().find(|d| d.name == "edit_file").unwrap();
        assert_eq!(edit.parameters["required"], json!(["path", "new_str"]));
    }

    #[test]
    fn test_read_file() {
        let (dir, tools) = setup();
        fs::write(dir.path().join("notes.txt"), "line one\nline two\n").unwrap();

        let result = tools.execute("read_file", &json!({"path": "notes.txt"}));
        assert!(result.success);
        assert_eq!(result.to_content(), "line one\nline two\n");

        let result = tools.execute("read_file", &json!({"path": "missing.txt"}));
        assert!(!result.success);
        assert!(result.error.unwrap().contains("File not found"));

        let result = tools.execute("read_file", &json!({}));
        assert_eq!(result.error.as_deref(), Some("Path is required."));
    }

    #[test]
    fn test_read_file_rejects_directory_and_binary() {
        let (dir, tools) = setup();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("blob.bin"), [0xff, 0xfe, 0x00]).unwrap();

        assert!(!tools.execute("read_file", &json!({"path": "src"})).success);
        let result = tools.execute("read_file", &json!({"path": "blob.bin"}));
        assert!(result.error.unwrap().contains("UTF-8"));
    }

    #[test]
    fn test_path_confinement() {
        let (dir, tools) = setup();
        let sibling = TempDir::new().unwrap();
        fs::write(sibling.path().join("secret.txt"), "nope").unwrap();

        let result = tools.execute("read_file", &json!({"path": "../../../../etc/passwd"}));
        assert!(result.error.unwrap().contains("is not allowed"));

        let outside = sibling.path().join("secret.txt");
        let result = tools.execute("read_file", &json!({"path": outside.to_str().unwrap()}));
        assert!(result.error.unwrap().contains("is not allowed"));

        // absolute path inside the root is fine
        fs::write(dir.path().join("inside.txt"), "ok").unwrap();
        let inside = dir.path().join("inside.txt");
        let result = tools.execute("read_file", &json!({"path": inside.to_str().unwrap()}));
        assert!(result.success);
    }

    #[test]
    fn test_prefix_sibling_rejected() {
        let parent = TempDir::new().unwrap();
        let root = parent.path().join("proj");
        let sibling = parent.path().join("proj-secrets");
        fs::create_dir(&root).unwrap();
        fs::create_dir(&sibling).unwrap();
        fs::write(sibling.join("key"), "k").unwrap();

        let workspace = Workspace::new(&root).unwrap();
        assert!(matches!(
            workspace.resolve("../proj-secrets/key"),
            Err(ToolError::PathNotAllowed(_))
        ));
        assert!(workspace.resolve("sub/../new.txt").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let (dir, tools) = setup();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let result = tools.execute(
            "edit_file",
            &json!({"path": "link/planted.txt", "new_str": "x"}),
        );
        assert!(result.error.unwrap().contains("is not allowed"));
        assert!(!outside.path().join("planted.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_escape_rejected() {
        let (dir, tools) = setup();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("planted.txt");
        std::os::unix::fs::symlink(&target, dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink("../escaped.txt", dir.path().join("rel")).unwrap();

        let result = tools.execute("edit_file", &json!({"path": "link", "new_str": "pwned"}));
        assert!(result.error.unwrap().contains("is not allowed"));
        assert!(!target.exists());

        let result = tools.execute("edit_file", &json!({"path": "rel", "new_str": "pwned"}));
        assert!(result.error.unwrap().contains("is not allowed"));
        assert!(!dir.path().parent().unwrap().join("escaped.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_inside_creates_target() {
        let (dir, tools) = setup();
        std::os::unix::fs::symlink("notes/todo.txt", dir.path().join("todo")).unwrap();

        let result = tools.execute("edit_file", &json!({"path": "todo", "new_str": "ship it"}));
        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            fs::read_to_string(dir.path().join("notes/todo.txt")).unwrap(),
            "ship it"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_is_error() {
        let (dir, tools) = setup();
        std::os::unix::fs::symlink("b", dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink("a", dir.path().join("b")).unwrap();

        let result = tools.execute("edit_file", &json!({"path": "a", "new_str": "x"}));
        assert!(!result.success);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_files() {
        let (dir, tools) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("id_rsa"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path().join("id_rsa"), dir.path().join("key")).unwrap();

        let result = tools.execute("read_file", &json!({"path": "key"}));
        assert!(result.error.unwrap().contains("is not allowed"));
        let result = tools.execute("edit_file", &json!({"path": "key", "old_str": "", "new_str": "x"}));
        assert!(result.error.unwrap().contains("is not allowed"));
        assert_eq!(fs::read_to_string(outside.path().join("id_rsa")).unwrap(), "secret");

        fs::write(dir.path().join("real.rs"), "fn main() {}").unwrap();
        std::os::unix::fs::symlink("real.rs", dir.path().join("alias.rs")).unwrap();
        let result = tools.execute("read_file", &json!({"path": "alias.rs"}));
        assert_eq!(result.to_content(), "fn main() {}");
    }

    #[test]
    fn test_list_files() {
        let (dir, tools) = setup();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        fs::write(dir.path().join("Cargo.toml"), "").unwrap();

        let result = tools.execute("list_files", &json!({}));
        assert!(result.success);
        let listed: Vec<String> = serde_json::from_str(&result.to_content()).unwrap();
        assert_eq!(listed, vec!["Cargo.toml".to_string(), "src/".to_string()]);

        let result = tools.execute("list_files", &json!({"path": "src"}));
        assert_eq!(result.to_content(), r#"["lib.rs"]"#);

        let result = tools.execute("list_files", &json!({"path": "nowhere"}));
        assert!(result.error.unwrap().contains("Path not found"));

        let result = tools.execute("list_files", &json!({"path": "Cargo.toml"}));
        assert!(result.error.unwrap().contains("Not a directory"));
    }

    #[test]
    fn test_edit_file_create() {
        let (dir, tools) = setup();
        let result = tools.execute(
            "edit_file",
            &json!({"path": "src/bin/hello.rs", "old_str": "", "new_str": "fn main() {}\n"}),
        );
        assert_eq!(result.to_content(), "Successfully created file src/bin/hello.rs");
        assert_eq!(
            fs::read_to_string(dir.path().join("src/bin/hello.rs")).unwrap(),
            "fn main() {}\n"
        );
    }

    #[test]
    fn test_edit_file_missing_with_old_str() {
        let (_dir, tools) = setup();
        let result = tools.execute(
            "edit_file",
            &json!({"path": "ghost.rs", "old_str": "a", "new_str": "b"}),
        );
        assert!(result.error.unwrap().contains("not creating a new file"));
    }

    #[test]
    fn test_edit_file_replace_all_and_append() {
        let (dir, tools) = setup();
        let file = dir.path().join("main.rs");
        fs::write(&file, "let x = 1;\nlet y = x + 1;\n").unwrap();

        let result = tools.execute(
            "edit_file",
            &json!({"path": "main.rs", "old_str": "x", "new_str": "count"}),
        );
        assert_eq!(result.to_content(), "OK");
        assert_eq!(
            fs::read_to_string(&file).unwrap(),
            "let count = 1;\nlet y = count + 1;\n"
        );

        let result = tools.execute("edit_file", &json!({"path": "main.rs", "new_str": "// end\n"}));
        assert!(result.success);
        assert!(fs::read_to_string(&file).unwrap().ends_with("// end\n"));
    }

    #[test]
    fn test_edit_file_errors() {
        let (dir, tools) = setup();
        fs::write(dir.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(dir.path().join("d")).unwrap();

        let same = tools.execute(
            "edit_file",
            &json!({"path": "a.txt", "old_str": "hello", "new_str": "hello"}),
        );
        assert!(same.error.unwrap().contains("must be different"));

        let missing = tools.execute(
            "edit_file",
            &json!({"path": "a.txt", "old_str": "bye", "new_str": "ciao"}),
        );
        assert_eq!(
            missing.to_content(),
            json!({"error": "'old_str' not found in file a.txt."}).to_string()
        );

        let dir_target = tools.execute("edit_file", &json!({"path": "d", "new_str": "x"}));
        assert!(dir_target.error.unwrap().contains("not a file"));

        let no_new = tools.execute("edit_file", &json!({"path": "a.txt"}));
        assert!(no_new.error.unwrap().contains("'new_str' are required"));
    }

    #[test]
    fn test_bad_arguments_and_unknown_tool() {
        let (_dir, tools) = setup();

        let result = tools.execute("read_file", &json!(["notes.txt"]));
        let error = result.error.unwrap();
        assert!(error.contains("not in the expected dictionary format"));
        assert!(error.contains("notes.txt"));

        let result = tools.execute("list_files", &json!("{\"path\": \".\"}"));
        assert!(result.success);

        let result = tools.execute("rm_rf", &json!({}));
        assert_eq!(result.error.as_deref(), Some("Tool 'rm_rf' not found by agent."));
    }
}
