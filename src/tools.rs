//! Tool system: the `Tool` trait, its metadata and error type.
//!
//! Tools are named units of work that receive a [`ToolContext`] and produce a
//! [`ToolResult`]. They are collected in a [`ToolRegistry`] and exposed to a
//! language model through the adapter in [`crate::mcp`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::http::TransportError;
use crate::model::ToolResult;

pub mod builtin;
pub mod context;
pub mod registry;
pub mod rest;
pub mod schema;
pub mod typed;

pub use context::ToolContext;
pub use registry::{RegistryError, ToolRegistry};
pub use rest::{PayloadModel, PayloadSlot, RestTool};

/// Error type for tool execution.
///
/// Every message starts with the name of the failing tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool}: invalid input: {reason}")]
    InvalidInput { tool: String, reason: String },

    #[error("{tool}: missing base_url. Provide one in ToolContext or the tool input.")]
    MissingBaseUrl { tool: String },

    #[error("{tool}: HTTP error: {source}")]
    Transport {
        tool: String,
        #[source]
        source: TransportError,
    },

    #[error("{tool}: backend returned {status}: {body}")]
    Backend {
        tool: String,
        status: u16,
        body: Value,
    },

    #[error("{tool}: {reason}")]
    Execution { tool: String, reason: String },
}

impl ToolError {
    pub fn invalid_input(tool: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidInput {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    pub fn execution(tool: impl Into<String>, reason: impl ToString) -> Self {
        Self::Execution {
            tool: tool.into(),
            reason: reason.to_string(),
        }
    }

    /// Name of the tool that failed.
    pub fn tool_name(&self) -> &str {
        match self {
            Self::InvalidInput { tool, .. }
            | Self::MissingBaseUrl { tool }
            | Self::Transport { tool, .. }
            | Self::Backend { tool, .. }
            | Self::Execution { tool, .. } => tool,
        }
    }
}

/// Static description of a tool, fixed at construction time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMetadata {
    pub name: String,
    /// Natural-language description shown to the model.
    pub description: String,
    /// JSON Schema of the accepted arguments.
    pub input_schema: Option<Value>,
    pub output_description: Option<String>,
    pub output_schema: Option<Value>,
}

impl ToolMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: None,
            output_description: None,
            output_schema: None,
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_output_description(mut self, description: impl Into<String>) -> Self {
        self.output_description = Some(description.into());
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// A named capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Metadata describing the tool.
    fn metadata(&self) -> &ToolMetadata;

    /// Unique name of the tool.
    fn name(&self) -> &str {
        &self.metadata().name
    }

    /// Execute the tool against a per-call context.
    async fn run(&self, context: &ToolContext) -> Result<ToolResult, ToolError>;
}
