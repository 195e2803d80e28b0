pub mod agent;
pub mod config;
pub mod console;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod modelfile;
/// JSONL tree session store for resumable conversations.
pub mod session;
pub mod tools;
