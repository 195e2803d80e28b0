use serde::{Deserialize, Serialize};

/// Counters for one chat session
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionMetrics {
    pub turns: u64,
    pub inference_calls: u64,
    pub inference_failures: u64,
    pub tool_calls_total: u64,
    pub tool_calls_success: u64,
    pub tool_calls_failed: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one user message entering the loop
    pub fn record_turn(&mut self) {
        self.turns += 1;
    }

    /// Record a completed inference with the token counts the server reported
    pub fn record_inference(&mut self, prompt_tokens: Option<u32>, completion_tokens: Option<u32>) {
        self.inference_calls += 1;
        self.prompt_tokens += u64::from(prompt_tokens.unwrap_or(0));
        self.completion_tokens += u64::from(completion_tokens.unwrap_or(0));
    }

    pub fn record_inference_failure(&mut self) {
        self.inference_calls += 1;
        self.inference_failures += 1;
    }

    pub fn record_tool(&mut self, success: bool) {
        self.tool_calls_total += 1;
        if success {
            self.tool_calls_success += 1;
        } else {
            self.tool_calls_failed += 1;
        }
    }

    /// Tool success rate as percentage
    pub fn tool_success_rate(&self) -> f64 {
        if self.tool_calls_total == 0 {
            return 100.0;
        }
        (self.tool_calls_success as f64 / self.tool_calls_total as f64) * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} turns, {} tool calls ({:.0}% ok), {} prompt / {} completion tokens",
            self.turns,
            self.tool_calls_total,
            self.tool_success_rate(),
            self.prompt_tokens,
            self.completion_tokens
        )
    }
}
