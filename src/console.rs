use serde_json::Value;
use std::io::Write;

/// ANSI escape codes for colors
pub mod colors {
    pub const BLUE: &str = "\x1b[94m";
    pub const YELLOW: &str = "\x1b[93m";
    pub const GREEN: &str = "\x1b[92m";
    pub const RED: &str = "\x1b[91m";
    pub const RESET: &str = "\x1b[0m";
}

/// Terminal side of the chat: prompts, replies and tool traces.
///
/// Write failures are ignored; a closed stdout must not abort a tool round.
pub struct Console {
    out: Box<dyn Write + Send>,
    color: bool,
    preview_chars: usize,
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            out,
            color,
            preview_chars: 2000,
        }
    }

    pub fn stdout(color: bool) -> Self {
        Self::new(Box::new(std::io::stdout()), color)
    }

    /// Limit how much of a tool result is echoed to the terminal.
    pub fn with_preview_chars(mut self, chars: usize) -> Self {
        self.preview_chars = chars;
        self
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.color {
            format!("{}{}{}", color, text, colors::RESET)
        } else {
            text.to_string()
        }
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
        let _ = self.out.flush();
    }

    pub fn plain(&mut self, msg: &str) {
        self.line(msg);
    }

    pub fn info(&mut self, msg: &str) {
        let text = self.paint(colors::BLUE, msg);
        self.line(&text);
    }

    pub fn success(&mut self, msg: &str) {
        let text = self.paint(colors::GREEN, msg);
        self.line(&text);
    }

    pub fn notice(&mut self, msg: &str) {
        let text = self.paint(colors::YELLOW, msg);
        self.line(&text);
    }

    pub fn error(&mut self, msg: &str) {
        let text = self.paint(colors::RED, msg);
        self.line(&text);
    }

    /// `You: ` without a newline
    pub fn prompt(&mut self) {
        let label = self.paint(colors::BLUE, "You");
        let _ = write!(self.out, "{}: ", label);
        let _ = self.out.flush();
    }

    pub fn assistant(&mut self, text: &str) {
        let label = self.paint(colors::YELLOW, "Assistant");
        self.line(&format!("{}: {}", label, text));
    }

    pub fn tool_call(&mut self, name: &str, arguments: &Value) {
        let label = self.paint(colors::GREEN, "tool_call");
        self.line(&format!("{}: {}({})", label, name, arguments));
    }

    pub fn tool_result(&mut self, content: &str) {
        let label = self.paint(colors::GREEN, "tool_result");
        let shown = preview(content, self.preview_chars);
        self.line(&format!("{}: {}", label, shown));
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}... ({} more bytes)",
            &content[..cut],
            content.len() - cut
        ),
        None => content.to_string(),
    }
}
