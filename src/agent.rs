use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::console::Console;
use crate::llm::{ChatBackend, Message, Role, ToolCall};
use crate::metrics::SessionMetrics;
use crate::session::SessionRecorder;
use crate::tools::{CodingTools, ToolDefinition};

/// How a single user turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model answered without requesting more tools
    Replied,
    /// Inference failed; the user message stays in the conversation
    InferenceFailed,
    /// The model kept calling tools past the configured limit
    ToolRoundLimit,
}

/// Interactive coding agent: conversation state plus the tool loop
pub struct Agent<B: ChatBackend> {
    backend: B,
    tools: CodingTools,
    definitions: Vec<ToolDefinition>,
    model: String,
    conversation: Vec<Message>,
    console: Console,
    recorder: Option<SessionRecorder>,
    max_tool_rounds: usize,
    pub metrics: SessionMetrics,
}

impl<B: ChatBackend> Agent<B> {
    pub fn new(backend: B, tools: CodingTools, model: impl Into<String>, console: Console) -> Self {
        let definitions = tools.get_tool_definitions();
        Self {
            backend,
            tools,
            definitions,
            model: model.into(),
            conversation: Vec::new(),
            console,
            recorder: None,
            max_tool_rounds: 25,
            metrics: SessionMetrics::new(),
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    /// Record every message to `recorder`, continuing from `history`.
    pub fn with_session(mut self, recorder: SessionRecorder, history: Vec<Message>) -> Self {
        self.conversation = history;
        self.recorder = Some(recorder);
        self
    }

    /// Seed the conversation with a system prompt unless it already has one
    /// (e.g. from a resumed session).
    pub fn with_system_prompt(mut self, prompt: Option<&str>) -> Self {
        let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) else {
            return self;
        };
        if self.conversation.is_empty() {
            self.push(Message::system(prompt));
        }
        self
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Read lines from `input` until EOF or Ctrl-C, handling each as a turn.
    pub async fn run<R>(&mut self, input: R)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        self.console.plain(&format!(
            "Chat with Ollama (model: {}). Use 'ctrl-c' or 'ctrl-d' to quit.",
            self.model
        ));
        if self.conversation.iter().any(|m| m.role != Role::System) {
            self.console
                .info(&format!("Resumed {} messages.", self.conversation.len()));
        }

        loop {
            self.console.prompt();
            let line = tokio::select! {
                line = lines.next_line() => line,
                _ = tokio::signal::ctrl_c() => Ok(None),
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read input");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let interrupted = tokio::select! {
                _ = self.handle_user_input(&line) => false,
                _ = tokio::signal::ctrl_c() => true,
            };
            if interrupted {
                self.console.notice("\nInterrupted.");
            }
        }

        self.console.plain("");
        self.console.notice("Exiting chat.");
        self.console.info(&format!("Session: {}", self.metrics.summary()));
        info!(
            turns = self.metrics.turns,
            tool_calls = self.metrics.tool_calls_total,
            prompt_tokens = self.metrics.prompt_tokens,
            completion_tokens = self.metrics.completion_tokens,
            "chat finished"
        );
    }

    /// Send one user message and keep executing tool calls until the model
    /// replies without any.
    pub async fn handle_user_input(&mut self, input: &str) -> TurnOutcome {
        self.metrics.record_turn();
        self.push(Message::user(input));

        let mut rounds = 0;
        loop {
            let response = match self.backend.chat(&self.conversation, &self.definitions).await {
                Ok(response) => response,
                Err(e) => {
                    self.metrics.record_inference_failure();
                    warn!(error = %e, "inference failed");
                    self.console.error(&format!("Ollama API Error: {}", e));
                    return TurnOutcome::InferenceFailed;
                }
            };
            self.metrics
                .record_inference(response.prompt_eval_count, response.eval_count);

            let message = response.message;
            let text = message.content.trim().to_string();
            let tool_calls = message.tool_calls.clone();
            self.push(message);

            if !text.is_empty() {
                self.console.assistant(&text);
            }
            if tool_calls.is_empty() {
                return TurnOutcome::Replied;
            }

            debug!(count = tool_calls.len(), round = rounds + 1, "executing tool calls");
            for call in &tool_calls {
                let content = self.execute_tool(call);
                self.push(Message::tool(call.function.name.clone(), content));
            }

            rounds += 1;
            if rounds >= self.max_tool_rounds {
                warn!(rounds, "tool round limit reached");
                self.console.notice(&format!(
                    "Stopped after {} consecutive tool rounds.",
                    rounds
                ));
                return TurnOutcome::ToolRoundLimit;
            }
        }
    }

    fn execute_tool(&mut self, call: &ToolCall) -> String {
        let name = &call.function.name;
        self.console.tool_call(name, &call.function.arguments);

        let result = self.tools.execute(name, &call.function.arguments);
        self.metrics.record_tool(result.success);
        if let Some(error) = &result.error {
            warn!(tool = %name, error = %error, "tool failed");
        }

        let content = result.to_content();
        self.console.tool_result(&content);
        content
    }

    fn push(&mut self, message: Message) {
        if let Some(recorder) = self.recorder.as_mut() {
            if let Err(e) = recorder.record(&message) {
                warn!(error = %e, "failed to record session entry");
            }
        }
        self.conversation.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::llm::{ChatResponse, MockChatBackend};
    use crate::tools::Workspace;
    use mockall::Sequence;
    use serde_json::json;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn reply(message: Message) -> ChatResponse {
        ChatResponse {
            model: "qwen3:8b".into(),
            message,
            done: true,
            prompt_eval_count: Some(50),
            eval_count: Some(10),
        }
    }

    fn tool_request(name: &str, arguments: serde_json::Value) -> Message {
        let mut message = Message::assistant("");
        message.tool_calls = vec![ToolCall::new(name, arguments)];
        message
    }

    fn agent(backend: MockChatBackend, dir: &TempDir) -> (Agent<MockChatBackend>, SharedBuf) {
        let buf = SharedBuf::default();
        let tools = CodingTools::new(Workspace::new(dir.path()).unwrap());
        let console = Console::new(Box::new(buf.clone()), false);
        (Agent::new(backend, tools, "qwen3:8b", console), buf)
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat()
            .times(1)
            .withf(|messages, tools| messages.len() == 1 && tools.len() == 3)
            .returning(|_, _| Ok(reply(Message::assistant("  Hello!\n"))));

        let (mut agent, buf) = agent(backend, &dir);
        let outcome = agent.handle_user_input("hi").await;

        assert_eq!(outcome, TurnOutcome::Replied);
        assert_eq!(agent.conversation().len(), 2);
        assert_eq!(agent.conversation()[1].content, "  Hello!\n");
        assert_eq!(buf.text(), "Assistant: Hello!\n");
        assert_eq!(agent.metrics.prompt_tokens, 50);
    }

    #[tokio::test]
    async fn test_tool_call_then_reply() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("README.md"), "# demo\n").unwrap();

        let mut seq = Sequence::new();
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(reply(tool_request("read_file", json!({"path": "README.md"})))));
        backend
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|messages, _| {
                messages.len() == 3
                    && messages[2].role == Role::Tool
                    && messages[2].content == "# demo\n"
                    && messages[2].tool_name.as_deref() == Some("read_file")
            })
            .returning(|_, _| Ok(reply(Message::assistant("It is a demo project."))));

        let (mut agent, buf) = agent(backend, &dir);
        let outcome = agent.handle_user_input("what is this repo?").await;

        assert_eq!(outcome, TurnOutcome::Replied);
        assert_eq!(agent.conversation().len(), 4);
        assert_eq!(agent.metrics.tool_calls_success, 1);
        assert_eq!(agent.metrics.inference_calls, 2);
        let out = buf.text();
        assert!(out.contains("tool_call: read_file({\"path\":\"README.md\"})"));
        assert!(out.contains("tool_result: # demo"));
        assert!(out.ends_with("Assistant: It is a demo project.\n"));
    }

    #[tokio::test]
    async fn test_inference_error_keeps_user_message() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat()
            .times(1)
            .returning(|_, _| Err(AgentError::ServerNotRunning("http://localhost:11434".into())));

        let (mut agent, buf) = agent(backend, &dir);
        let outcome = agent.handle_user_input("hello?").await;

        assert_eq!(outcome, TurnOutcome::InferenceFailed);
        assert_eq!(agent.conversation(), &[Message::user("hello?")]);
        assert_eq!(agent.metrics.inference_failures, 1);
        assert!(buf.text().starts_with("Ollama API Error: Ollama server not running"));
    }

    #[tokio::test]
    async fn test_tool_round_limit() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat()
            .times(2)
            .returning(|_, _| Ok(reply(tool_request("list_files", json!({})))));

        let (agent, _buf) = agent(backend, &dir);
        let mut agent = agent.with_max_tool_rounds(2);
        let outcome = agent.handle_user_input("loop forever").await;

        assert_eq!(outcome, TurnOutcome::ToolRoundLimit);
        // user + 2 x (assistant + tool)
        assert_eq!(agent.conversation().len(), 5);
    }

    #[tokio::test]
    async fn test_failed_tool_reported_to_model() {
        let dir = TempDir::new().unwrap();
        let mut seq = Sequence::new();
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(reply(tool_request("delete_everything", json!({})))));
        backend
            .expect_chat()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|messages, _| {
                messages[2].content
                    == json!({"error": "Tool 'delete_everything' not found by agent."}).to_string()
            })
            .returning(|_, _| Ok(reply(Message::assistant("Sorry."))));

        let (mut agent, _buf) = agent(backend, &dir);
        agent.handle_user_input("clean up").await;
        assert_eq!(agent.metrics.tool_calls_failed, 1);
    }

    #[tokio::test]
    async fn test_system_prompt_first() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat()
            .times(1)
            .withf(|messages, _| messages[0].role == Role::System && messages[1].role == Role::User)
            .returning(|_, _| Ok(reply(Message::assistant("ok"))));

        let (agent, _buf) = agent(backend, &dir);
        let mut agent = agent.with_system_prompt(Some("You edit Rust code."));
        assert_eq!(agent.handle_user_input("go").await, TurnOutcome::Replied);
    }

    #[tokio::test]
    async fn test_run_skips_blank_lines_and_exits_on_eof() {
        let dir = TempDir::new().unwrap();
        let mut backend = MockChatBackend::new();
        backend
            .expect_chat()
            .times(1)
            .returning(|_, _| Ok(reply(Message::assistant("Hi."))));

        let (mut agent, buf) = agent(backend, &dir);
        agent.run(&b"\n   \nhello\n"[..]).await;

        let out = buf.text();
        assert!(out.starts_with("Chat with Ollama (model: qwen3:8b). Use 'ctrl-c' or 'ctrl-d' to quit.\n"));
        assert!(out.contains("Assistant: Hi."));
        assert!(out.contains("Exiting chat."));
        assert_eq!(agent.metrics.turns, 1);
    }
}
