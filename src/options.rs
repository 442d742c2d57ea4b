//! Options for the LLM runtime and for outbound HTTP transports.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::mcp::{qualified_tool_name, ToolServer};

/// Options for one agent turn: model behavior plus the tool servers the
/// runtime may call.
#[derive(Debug, Clone, Default)]
pub struct AgentOptions {
    /// Model identifier (e.g., "claude-sonnet-4-5-20250929").
    pub model: Option<String>,

    /// System instructions passed to the model.
    pub system_prompt: Option<String>,

    /// Maximum tokens to generate per model response.
    pub max_tokens: Option<u32>,

    /// Temperature for sampling.
    pub temperature: Option<f32>,

    /// Tool servers keyed by the name the model sees them under.
    pub servers: BTreeMap<String, ToolServer>,

    /// Qualified tool names (`mcp__<server>__<tool>`) the model may call.
    pub allowed_tools: Vec<String>,
}

impl AgentOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Attach a tool server and allow every tool it exposes.
    pub fn with_server(mut self, key: impl Into<String>, server: ToolServer) -> Self {
        let key = key.into();
        for tool in server.tool_names() {
            let qualified = qualified_tool_name(&key, tool);
            if !self.allowed_tools.contains(&qualified) {
                self.allowed_tools.push(qualified);
            }
        }
        self.servers.insert(key, server);
        self
    }

    /// Replace the list of allowed tools.
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_allowed(&self, qualified_name: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == qualified_name)
    }
}

/// Transport configuration options.
///
/// Controls how requests are sent over the network.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Request timeout. If None, the client default (no timeout) is used.
    pub timeout: Option<Duration>,
    /// HTTP proxy URL.
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    /// Additional HTTP headers to send with every request.
    pub headers: BTreeMap<String, String>,
}

impl TransportOptions {
    /// Create new default HTTP transport options.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }

    pub fn with_proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.proxy = Some(proxy_url.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_options_builder() {
        let options = TransportOptions::new()
            .with_timeout(Duration::from_secs(30))
            .with_proxy("http://proxy.example.com")
            .with_header("X-Custom-Header", "Value");

        assert_eq!(options.timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.proxy.as_deref(), Some("http://proxy.example.com"));
        assert_eq!(
            options.headers.get("X-Custom-Header").map(String::as_str),
            Some("Value")
        );
    }

    #[test]
    fn agent_options_allow_list() {
        let options = AgentOptions::new("model-x").with_allowed_tools(["mcp__calc__addition"]);
        assert!(options.is_allowed("mcp__calc__addition"));
        assert!(!options.is_allowed("mcp__calc__insanity"));
        assert_eq!(options.model.as_deref(), Some("model-x"));
    }
}
