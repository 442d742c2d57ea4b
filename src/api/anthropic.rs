//! Anthropic Messages API runtime with a tool-use loop.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use tracing::{debug, info, warn};

use crate::http::{add_extra_headers, build_http_client, RequestBuilderExt, ResponseExt};
use crate::mcp::parse_qualified_tool_name;
use crate::options::{AgentOptions, TransportOptions};
use crate::runtime::{AgentRuntime, ContentBlock, RuntimeError, RuntimeReply};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
const DEFAULT_MAX_TOKENS: u32 = 1024;
const MAX_TOOL_NAME_LEN: usize = 64;

/// Runtime speaking the Anthropic Messages API.
///
/// Tools of every attached [`crate::mcp::ToolServer`] that the options allow
/// are offered to the model. `tool_use` blocks are executed against the
/// owning server and fed back as `tool_result` blocks until the model stops
/// asking for tools.
#[derive(Debug, Clone)]
pub struct AnthropicRuntime {
    api_key: String,
    base_url: String,
    max_iterations: usize,
    transport_options: TransportOptions,
    client: Client,
}

impl AnthropicRuntime {
    pub fn new(api_key: impl Into<String>) -> Result<Self, RuntimeError> {
        Self::with_transport_options(api_key, TransportOptions::default())
    }

    pub fn with_transport_options(
        api_key: impl Into<String>,
        transport_options: TransportOptions,
    ) -> Result<Self, RuntimeError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RuntimeError::Config("Anthropic API key is empty".to_string()));
        }
        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            client: build_http_client(&transport_options)?,
            transport_options,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn handle_error_response(status: reqwest::StatusCode, body: &str) -> RuntimeError {
        if let Ok(error_resp) = serde_json::from_str::<AnthropicErrorResponse>(body) {
            RuntimeError::Provider(format!(
                "Anthropic error ({}): {}",
                error_resp.error.error_type, error_resp.error.message
            ))
        } else {
            RuntimeError::Provider(format!("HTTP {}: {}", status, body))
        }
    }

    async fn send(&self, request: &MessagesRequest) -> Result<MessagesResponse, RuntimeError> {
        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        let req = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let response = add_extra_headers(req, &self.transport_options)
            .json_logged(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text_logged().await?;
        if !status.is_success() {
            return Err(Self::handle_error_response(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Execute one `tool_use` block and turn the outcome into a `tool_result` block.
    async fn execute(
        routes: &HashMap<String, ToolRoute>,
        options: &AgentOptions,
        id: &str,
        alias: &str,
        input: serde_json::Map<String, Value>,
    ) -> ContentBlock {
        let outcome = match routes.get(alias) {
            None => Err(format!("Tool {alias} is not allowed")),
            Some(route) => match options.servers.get(&route.server) {
                None => Err(format!("Tool server {} is not attached", route.server)),
                Some(server) => server
                    .call(&route.tool, input)
                    .await
                    .map(|envelope| envelope.joined_text())
                    .map_err(|e| e.to_string()),
            },
        };

        match outcome {
            Ok(content) => ContentBlock::ToolResult {
                tool_use_id: id.to_string(),
                content,
                is_error: false,
            },
            Err(content) => {
                warn!(tool = alias, error = %content, "Tool call failed");
                ContentBlock::ToolResult {
                    tool_use_id: id.to_string(),
                    content,
                    is_error: true,
                }
            }
        }
    }
}

/// Where an API-facing tool name points.
#[derive(Debug, Clone, PartialEq)]
struct ToolRoute {
    server: String,
    tool: String,
    qualified: String,
}

/// The API only accepts `[A-Za-z0-9_-]{1,64}` tool names.
fn api_tool_name(qualified: &str) -> String {
    qualified
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_TOOL_NAME_LEN)
        .collect()
}

/// Offered tools, in allow-list order, and the route back from each API name.
fn collect_tools(options: &AgentOptions) -> (Vec<AnthropicTool>, HashMap<String, ToolRoute>) {
    let mut tools = Vec::new();
    let mut routes: HashMap<String, ToolRoute> = HashMap::new();

    for qualified in &options.allowed_tools {
        let Some((key, wrapped)) = parse_qualified_tool_name(qualified)
            .and_then(|(key, tool)| options.servers.get(key).map(|server| (key, server, tool)))
            .and_then(|(key, server, tool)| server.get(tool).map(|wrapped| (key, wrapped)))
        else {
            warn!(tool = %qualified, "Allowed tool is not exposed by any attached server");
            continue;
        };

        let alias = api_tool_name(qualified);
        if let Some(existing) = routes.get(&alias) {
            if existing.qualified != *qualified {
                warn!(tool = %qualified, "Skipping tool whose API name collides with another");
            }
            continue;
        }

        let descriptor = wrapped.descriptor();
        tools.push(AnthropicTool {
            name: alias.clone(),
            description: descriptor.description.as_ref().map(|d| d.to_string()),
            input_schema: Value::Object((*descriptor.input_schema).clone()),
        });
        routes.insert(
            alias,
            ToolRoute {
                server: key.to_string(),
                tool: wrapped.name().to_string(),
                qualified: qualified.clone(),
            },
        );
    }

    (tools, routes)
}

/// Rewrite API tool names in reported blocks to their qualified form.
fn report(blocks: &[ContentBlock], routes: &HashMap<String, ToolRoute>) -> Vec<ContentBlock> {
    blocks
        .iter()
        .map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => ContentBlock::ToolUse {
                id: id.clone(),
                name: routes
                    .get(name)
                    .map(|route| route.qualified.clone())
                    .unwrap_or_else(|| name.clone()),
                input: input.clone(),
            },
            other => other.clone(),
        })
        .collect()
}

#[async_trait]
impl AgentRuntime for AnthropicRuntime {
    async fn query(
        &self,
        prompt: &str,
        options: &AgentOptions,
    ) -> Result<Vec<RuntimeReply>, RuntimeError> {
        let model = options
            .model
            .clone()
            .ok_or_else(|| RuntimeError::Config("Model must be specified".to_string()))?;
        let (tools, routes) = collect_tools(options);
        info!(model = %model, tools = tools.len(), "Starting Anthropic turn");

        let mut request = MessagesRequest {
            model,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: options.system_prompt.clone(),
            temperature: options.temperature,
            messages: vec![AnthropicMessage {
                role: "user",
                content: vec![ContentBlock::Text {
                    text: prompt.to_string(),
                }],
            }],
            tools,
        };
        let mut replies = Vec::new();

        for iteration in 0..self.max_iterations {
            let response = self.send(&request).await?;
            let content: Vec<ContentBlock> = response
                .content
                .into_iter()
                .filter(|block| !matches!(block, ContentBlock::Other))
                .collect();
            replies.push(RuntimeReply::Blocks(report(&content, &routes)));

            let tool_uses: Vec<(String, String, serde_json::Map<String, Value>)> = content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        Some((id.clone(), name.clone(), input.clone()))
                    }
                    _ => None,
                })
                .collect();

            if response.stop_reason.as_deref() != Some("tool_use") || tool_uses.is_empty() {
                debug!(iteration, "Anthropic turn finished");
                return Ok(replies);
            }

            let mut results = Vec::with_capacity(tool_uses.len());
            for (id, alias, input) in tool_uses {
                results.push(Self::execute(&routes, options, &id, &alias, input).await);
            }

            request.messages.push(AnthropicMessage {
                role: "assistant",
                content,
            });
            replies.push(RuntimeReply::Blocks(results.clone()));
            request.messages.push(AnthropicMessage {
                role: "user",
                content: results,
            });
        }

        Err(RuntimeError::MaxIterations(self.max_iterations))
    }
}

// --- Request Types ---

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: Option<String>,
    temperature: Option<f32>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: Option<String>,
    input_schema: Value,
}

// --- Response Types ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorResponse {
    error: AnthropicError,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::ToolServer;
    use crate::tools::builtin::calculator_registry;
    use crate::tools::{RestTool, ToolContext, ToolRegistry};
    use serde_json::json;

    #[test]
    fn api_names_are_sanitized() {
        assert_eq!(api_tool_name("mcp__crud__todo.list"), "mcp__crud__todo_list");
        assert_eq!(api_tool_name("mcp__calc__addition"), "mcp__calc__addition");
        assert_eq!(api_tool_name(&"x".repeat(80)).len(), MAX_TOOL_NAME_LEN);
    }

    #[test]
    fn only_allowed_tools_are_offered() {
        let server = ToolServer::from_registry(
            "calc",
            "0.1.0",
            &calculator_registry().unwrap(),
            ToolContext::new(),
        );
        let options = AgentOptions::new("m")
            .with_server("calc", server)
            .with_allowed_tools(["mcp__calc__addition"]);

        let (tools, routes) = collect_tools(&options);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "mcp__calc__addition");
        assert_eq!(tools[0].input_schema["type"], json!("object"));
        assert_eq!(routes["mcp__calc__addition"].tool, "addition");
    }

    #[test]
    fn allowed_names_without_a_server_tool_are_skipped() {
        let server = ToolServer::from_registry(
            "calc",
            "0.1.0",
            &calculator_registry().unwrap(),
            ToolContext::new(),
        );
        let options = AgentOptions::new("m")
            .with_server("calc", server)
            .with_allowed_tools([
                "mcp__calc__insanity",
                "mcp__calc__division",
                "mcp__other__addition",
                "addition",
                "mcp__calc__insanity",
            ]);

        let (tools, routes) = collect_tools(&options);
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["mcp__calc__insanity"]);
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn reported_blocks_use_qualified_names() {
        let mut registry = ToolRegistry::new();
        registry.register(RestTool::new("todo.list", "List todos")).unwrap();
        let server = ToolServer::from_registry("crud", "0.1.0", &registry, ToolContext::new());
        let options = AgentOptions::new("m").with_server("crud", server);
        let (_, routes) = collect_tools(&options);

        let reported = report(
            &[ContentBlock::ToolUse {
                id: "t".into(),
                name: "mcp__crud__todo_list".into(),
                input: Default::default(),
            }],
            &routes,
        );
        assert!(matches!(
            &reported[0],
            ContentBlock::ToolUse { name, .. } if name == "mcp__crud__todo.list"
        ));
    }

    #[tokio::test]
    async fn disallowed_tool_yields_error_result() {
        let block = AnthropicRuntime::execute(
            &HashMap::new(),
            &AgentOptions::default(),
            "t1",
            "mcp__x__y",
            Default::default(),
        )
        .await;
        assert_eq!(
            block,
            ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: "Tool mcp__x__y is not allowed".into(),
                is_error: true,
            }
        );
    }

    #[test]
    fn empty_api_key_is_rejected() {
        assert!(matches!(
            AnthropicRuntime::new(""),
            Err(RuntimeError::Config(_))
        ));
    }
}
