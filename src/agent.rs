//! Agents turn a conversation into an [`AssistantResponse`].
//!
//! [`RuntimeAgent`] exposes a tool registry to an [`AgentRuntime`] for one
//! turn and reduces what the runtime reports. [`EchoAgent`] needs no model and
//! is handy for exercising tools by hand.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::anthropic::AnthropicRuntime;
use crate::config::Settings;
use crate::http::{HttpTransport, ReqwestTransport};
use crate::mcp::{render_output, ToolServer};
use crate::model::{AgentStep, AssistantResponse, Message, Role, ToolCall};
use crate::options::AgentOptions;
use crate::runtime::{reduce_replies, AgentRuntime, RuntimeError};
use crate::tools::builtin::{register_default_crud_suite, todo_widget_tools};
use crate::tools::{RegistryError, ToolContext, ToolError, ToolRegistry};

const DEFAULT_SERVER_KEY: &str = "gateway";
const DEFAULT_SERVER_VERSION: &str = "0.1.0";
const CLAUDE_SYSTEM_PROMPT: &str = "You are a helpful assistant. Use the available tools to \
     read and modify data in the CRUD backend and the Space todo widgets.";

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Produces one assistant response per conversation turn.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Run a turn. `base_context` carries the per-turn metadata every tool call inherits.
    async fn run(
        &self,
        messages: Vec<Message>,
        base_context: ToolContext,
    ) -> Result<AssistantResponse, AgentError>;
}

/// Agent that hands its tools to an LLM runtime through an in-process MCP server.
pub struct RuntimeAgent<R: AgentRuntime> {
    runtime: R,
    registry: Arc<ToolRegistry>,
    options: AgentOptions,
    server_key: String,
    server_name: String,
    server_version: String,
}

impl<R: AgentRuntime> RuntimeAgent<R> {
    /// Create an agent over `registry`.
    ///
    /// `options` holds the model settings. When its allow-list is empty every
    /// registered tool is allowed.
    pub fn new(runtime: R, registry: ToolRegistry, options: AgentOptions) -> Self {
        Self {
            runtime,
            registry: Arc::new(registry),
            options,
            server_key: DEFAULT_SERVER_KEY.to_string(),
            server_name: DEFAULT_SERVER_KEY.to_string(),
            server_version: DEFAULT_SERVER_VERSION.to_string(),
        }
    }

    /// Name the MCP server the tools are exposed through.
    ///
    /// `key` is the part the model sees in `mcp__<key>__<tool>`.
    pub fn with_server(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.server_key = key.into();
        self.server_name = name.into();
        self.server_version = version.into();
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Options for one turn, with a server bound to `base_context`.
    pub fn turn_options(&self, base_context: ToolContext) -> AgentOptions {
        let server = ToolServer::from_registry(
            self.server_name.clone(),
            self.server_version.clone(),
            &self.registry,
            base_context,
        );
        let restricted = !self.options.allowed_tools.is_empty();
        let mut options = self.options.clone().with_server(self.server_key.clone(), server);
        if restricted {
            options.allowed_tools = self.options.allowed_tools.clone();
        }
        options
    }
}

/// Content of the latest user or assistant message, or the empty string.
fn latest_prompt(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| m.content.as_str())
        .unwrap_or("")
}

#[async_trait]
impl<R: AgentRuntime> Agent for RuntimeAgent<R> {
    async fn run(
        &self,
        messages: Vec<Message>,
        base_context: ToolContext,
    ) -> Result<AssistantResponse, AgentError> {
        let prompt = latest_prompt(&messages);
        let options = self.turn_options(base_context);
        debug!(tools = options.allowed_tools.len(), "Submitting prompt to runtime");

        let replies = self.runtime.query(prompt, &options).await?;
        let outcome = reduce_replies(&replies);
        info!(
            replies = replies.len(),
            tool_calls = outcome.tool_calls.len(),
            "Runtime turn completed"
        );

        let steps = outcome
            .tool_calls
            .into_iter()
            .map(|call| AgentStep {
                tool_calls: vec![call],
                ..AgentStep::default()
            })
            .collect();

        let (messages, final_text) = if outcome.text.is_empty() {
            (Vec::new(), None)
        } else {
            (vec![Message::assistant(outcome.text.clone())], Some(outcome.text))
        };

        Ok(AssistantResponse {
            messages,
            steps,
            tool_results: outcome.tool_results,
            final_text,
        })
    }
}

#[derive(Debug, Error)]
enum DirectCallError {
    #[error("expected `tool: <name> <json object>`")]
    Syntax,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("tool input must be a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Echoes the latest user message, or runs `tool: <name> {json}` directly.
pub struct EchoAgent {
    registry: Arc<ToolRegistry>,
}

impl EchoAgent {
    /// Echo agent with the CRUD tool suite sending through `transport`.
    pub fn new(transport: Arc<dyn HttpTransport>) -> Result<Self, RegistryError> {
        let mut registry = ToolRegistry::new();
        register_default_crud_suite(&mut registry, &transport)?;
        Ok(Self::with_registry(registry))
    }

    /// Echo agent whose CRUD tools use the transport configured in `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, AgentError> {
        Ok(Self::new(crud_transport(settings)?)?)
    }

    pub fn with_registry(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    async fn direct_call(
        &self,
        command: &str,
        base_context: &ToolContext,
    ) -> Result<AssistantResponse, DirectCallError> {
        let (name, json_part) = command
            .trim()
            .split_once(char::is_whitespace)
            .ok_or(DirectCallError::Syntax)?;
        let Value::Object(payload) = serde_json::from_str::<Value>(json_part.trim())? else {
            return Err(DirectCallError::NotAnObject);
        };

        let call_id = Uuid::new_v4().to_string();
        let steps = vec![AgentStep {
            thought: Some("Calling a tool as requested.".to_string()),
            tool_calls: vec![ToolCall {
                id: call_id.clone(),
                name: name.to_string(),
                input: payload.clone(),
            }],
            final_response: None,
        }];

        let Some(tool) = self.registry.get(name) else {
            let mut response = AssistantResponse::from_text(format!("Unknown tool: {name}"));
            response.steps = steps;
            return Ok(response);
        };

        let result = tool
            .run(&base_context.with_input(payload))
            .await?
            .with_tool_call_id(call_id);
        let mut response = AssistantResponse::from_text(format!(
            "Tool {name} result: {}",
            render_output(&result.output)
        ));
        response.steps = steps;
        response.tool_results = vec![result];
        Ok(response)
    }
}

#[async_trait]
impl Agent for EchoAgent {
    async fn run(
        &self,
        messages: Vec<Message>,
        base_context: ToolContext,
    ) -> Result<AssistantResponse, AgentError> {
        let Some(last_user) = messages.iter().rev().find(|m| m.role == Role::User) else {
            return Ok(AssistantResponse {
                messages: vec![Message::assistant("How can I help you today?")],
                ..AssistantResponse::default()
            });
        };

        let content = last_user.content.trim();
        let command = content
            .get(..5)
            .filter(|prefix| prefix.eq_ignore_ascii_case("tool:"))
            .map(|_| &content[5..]);

        let Some(command) = command else {
            return Ok(AssistantResponse::from_text(format!("You said: {content}")));
        };

        match self.direct_call(command, &base_context).await {
            Ok(response) => Ok(response),
            Err(err) => Ok(AssistantResponse {
                messages: vec![Message::assistant(format!(
                    "Failed to parse or execute tool call: {err}"
                ))],
                ..AssistantResponse::default()
            }),
        }
    }
}

fn crud_transport(settings: &Settings) -> Result<Arc<dyn HttpTransport>, AgentError> {
    let transport = ReqwestTransport::new(&settings.transport_options())
        .map_err(|e| AgentError::Config(format!("invalid CRUD transport options: {e}")))?;
    Ok(Arc::new(transport))
}

/// Build the agent registered under `name`, or `None` when no such agent exists.
///
/// Names are matched case-insensitively: `claude`, `echo` and `simple`.
pub fn build_agent(name: &str, settings: &Settings) -> Result<Option<Arc<dyn Agent>>, AgentError> {
    match name.to_lowercase().as_str() {
        "claude" => {
            let api_key = settings
                .anthropic_api_key
                .clone()
                .ok_or_else(|| AgentError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;

            let transport = crud_transport(settings)?;
            let mut registry = ToolRegistry::new();
            register_default_crud_suite(&mut registry, &transport)?;
            for tool in todo_widget_tools(&transport) {
                registry.register(tool)?;
            }

            let options = AgentOptions::new(settings.claude_model.clone())
                .with_system_prompt(CLAUDE_SYSTEM_PROMPT);
            let agent: Arc<dyn Agent> = Arc::new(
                RuntimeAgent::new(AnthropicRuntime::new(api_key)?, registry, options)
                    .with_server("crud", "assistant-gateway-crud", DEFAULT_SERVER_VERSION),
            );
            Ok(Some(agent))
        }
        "echo" | "simple" => {
            let agent: Arc<dyn Agent> = Arc::new(EchoAgent::from_settings(settings)?);
            Ok(Some(agent))
        }
        _ => Ok(None),
    }
}
