//! # assistant-gateway
//!
//! A gateway that lets a conversational agent call backend operations
//! through a uniform tool abstraction, and returns a structured response
//! (text, tool calls, tool results) to the caller.
//!
//! ## Architecture
//!
//! 1. **Tools** are named, schema-described units of work run against a
//!    per-call [`ToolContext`]. They are declared with the [`tool`] attribute
//!    or built from data, like the generic [`RestTool`].
//! 2. A **[`ToolRegistry`]** holds the tools of an agent.
//! 3. The **MCP adapter** ([`mcp::ToolServer`]) exposes a registry to an LLM
//!    tool-calling runtime with inlined JSON schemas and text envelopes.
//! 4. **Agents** run one conversation turn through an [`AgentRuntime`] and
//!    reduce its replies into an [`AssistantResponse`].
//! 5. The **orchestrator** and the HTTP **server** wire settings, auth headers
//!    and agents together behind `POST <prefix>/chat`.
//!
//! ## Example
//! ```no_run
//! use assistant_gateway::tools::{RestTool, ToolContext, ToolRegistry};
//! use assistant_gateway::Tool;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = ToolRegistry::new();
//!     registry.register(RestTool::new("todo.list", "List todos. GET /todos"))?;
//!
//!     let base = ToolContext::new().with_base_url("http://localhost:5000");
//!     let args = json!({"path": "/todos", "method": "get"});
//!     let tool = registry.get("todo.list").ok_or("missing tool")?;
//!     let result = tool.run(&base.with_input(args.as_object().cloned().unwrap_or_default())).await?;
//!     println!("{}", result.output);
//!     Ok(())
//! }
//! ```

extern crate self as assistant_gateway;

pub mod agent;
pub mod api;
pub mod config;
pub mod http;
pub mod mcp;
pub mod model;
pub mod options;
pub mod orchestrator;
pub mod runtime;
pub mod server;
pub mod tools;

pub use agent::{Agent, AgentError, EchoAgent, RuntimeAgent};
pub use config::Settings;
pub use mcp::{ContentEnvelope, ToolServer, WrappedTool};
pub use model::{AssistantResponse, Message, Role, ToolResult, UserContext};
pub use options::{AgentOptions, TransportOptions};
pub use orchestrator::ConversationOrchestrator;
pub use runtime::{AgentRuntime, ContentBlock, RuntimeError, RuntimeReply};
pub use tools::{RestTool, Tool, ToolContext, ToolError, ToolMetadata, ToolRegistry};

// Used by code generated from the `tool` attribute.
pub use async_trait::async_trait;

// Re-export rmcp for convenience
pub use rmcp;

// Re-export the proc macro attribute
pub use gateway_macros::tool;
