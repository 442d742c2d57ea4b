//! Concrete LLM runtimes.

pub mod anthropic;

pub use anthropic::AnthropicRuntime;
