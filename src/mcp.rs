//! Exposes registry tools to an LLM tool-calling runtime as an MCP server.
//!
//! Each registered tool becomes a [`WrappedTool`]: an MCP descriptor with an
//! inlined input schema, plus a callable that derives a per-call
//! [`ToolContext`] from the turn's base context and marshals the result into
//! a text content envelope.

use std::fmt;
use std::io;
use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, JsonObject,
    ListToolsResult, PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool as McpTool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{ErrorData, ServerHandler};
use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::tools::schema::{empty_object_schema, inline_schema};
use crate::tools::{Tool, ToolContext, ToolError, ToolRegistry};

const QUALIFIED_PREFIX: &str = "mcp__";
const QUALIFIED_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// `{"content": [{"type": "text", "text": ...}]}`, the shape tool callables return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEnvelope {
    pub content: Vec<EnvelopeContent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EnvelopeContent {
    Text { text: String },
}

impl ContentEnvelope {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![EnvelopeContent::Text { text: text.into() }],
        }
    }

    /// All text items joined by newlines.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|item| match item {
                EnvelopeContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn into_contents(self) -> Vec<Content> {
        self.content
            .into_iter()
            .map(|item| match item {
                EnvelopeContent::Text { text } => Content::text(text),
            })
            .collect()
    }
}

/// Formats JSON the way Python's `json.dumps` does by default: `", "` and
/// `": "` separators, non-ASCII characters escaped as `\uXXXX`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn write_string_fragment<W: ?Sized + io::Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
        let mut ascii_start = 0;
        for (i, c) in fragment.char_indices().filter(|(_, c)| !c.is_ascii()) {
            writer.write_all(fragment[ascii_start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            ascii_start = i + c.len_utf8();
        }
        writer.write_all(fragment[ascii_start..].as_bytes())
    }

    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Encode `value` as spaced JSON text, e.g. `{"x": 1, "y": [1, 2]}`.
pub fn to_spaced_json(value: &Value) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    value.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Text shown to the model for a tool output: strings as-is, anything else as JSON.
pub fn render_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => to_spaced_json(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// The tool's input schema with every local `$ref` inlined, or an empty object schema.
pub fn build_input_schema(tool: &dyn Tool) -> JsonObject {
    let schema = tool
        .metadata()
        .input_schema
        .as_ref()
        .map(inline_schema)
        .unwrap_or_else(empty_object_schema);
    match schema {
        Value::Object(map) => map,
        _ => match empty_object_schema() {
            Value::Object(map) => map,
            _ => JsonObject::new(),
        },
    }
}

/// `mcp__<server>__<tool>`, the identifier the model calls a tool by.
pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("{QUALIFIED_PREFIX}{server}{QUALIFIED_SEPARATOR}{tool}")
}

/// Split a qualified name into its server key and tool name.
pub fn parse_qualified_tool_name(qualified: &str) -> Option<(&str, &str)> {
    qualified
        .strip_prefix(QUALIFIED_PREFIX)?
        .split_once(QUALIFIED_SEPARATOR)
        .filter(|(server, tool)| !server.is_empty() && !tool.is_empty())
}

/// A registry tool bound to a base context and described for the model.
#[derive(Clone)]
pub struct WrappedTool {
    tool: Arc<dyn Tool>,
    base_context: Arc<ToolContext>,
    descriptor: McpTool,
}

impl WrappedTool {
    pub fn new(tool: Arc<dyn Tool>, base_context: Arc<ToolContext>) -> Self {
        let input_schema = build_input_schema(tool.as_ref());
        debug!(tool = tool.name(), "Wrapping tool for MCP exposure");
        let descriptor = McpTool::new(
            tool.name().to_string(),
            tool.metadata().description.clone(),
            Arc::new(input_schema),
        );
        Self {
            tool,
            base_context,
            descriptor,
        }
    }

    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn descriptor(&self) -> &McpTool {
        &self.descriptor
    }

    /// Run the tool on a copy of the base context carrying `args`.
    pub async fn invoke(&self, args: JsonObject) -> Result<ContentEnvelope, ToolError> {
        let context = self.base_context.with_input(args);
        let user = context.user_context().and_then(|user| user.user_id);
        info!(tool = self.name(), user = user.as_deref(), "Invoking tool");
        let result = self.tool.run(&context).await?;
        Ok(ContentEnvelope::text(render_output(&result.output)))
    }
}

impl fmt::Debug for WrappedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappedTool")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// In-process MCP server exposing a registry's tools.
#[derive(Clone)]
pub struct ToolServer {
    name: String,
    version: String,
    tools: Arc<Vec<WrappedTool>>,
}

impl ToolServer {
    /// Wrap every tool in `registry`, binding each to `base_context`.
    pub fn from_registry(
        name: impl Into<String>,
        version: impl Into<String>,
        registry: &ToolRegistry,
        base_context: ToolContext,
    ) -> Self {
        let base_context = Arc::new(base_context);
        let tools = registry
            .all()
            .map(|tool| WrappedTool::new(Arc::clone(tool), Arc::clone(&base_context)))
            .collect();
        Self {
            name: name.into(),
            version: version.into(),
            tools: Arc::new(tools),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.tools.iter().map(WrappedTool::name)
    }

    pub fn descriptors(&self) -> Vec<McpTool> {
        self.tools.iter().map(|t| t.descriptor().clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&WrappedTool> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Invoke a tool by its unqualified name.
    pub async fn call(&self, name: &str, args: JsonObject) -> Result<ContentEnvelope, McpError> {
        let tool = self
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;
        Ok(tool.invoke(args).await?)
    }

    /// Qualified names of every tool, as seen under server key `key`.
    pub fn allowed_tool_names(&self, key: &str) -> Vec<String> {
        self.tool_names()
            .map(|tool| qualified_tool_name(key, tool))
            .collect()
    }
}

impl fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolServer")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &self.tool_names().collect::<Vec<_>>())
            .finish()
    }
}

impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                ..Default::default()
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.descriptors()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let args = request.arguments.unwrap_or_default();
        match self.call(&request.name, args).await {
            Ok(envelope) => Ok(CallToolResult::success(envelope.into_contents())),
            Err(McpError::ToolNotFound(name)) => Err(ErrorData::invalid_params(
                format!("Tool not found: {name}"),
                None,
            )),
            Err(McpError::Tool(err)) => {
                warn!(tool = err.tool_name(), error = %err, "Tool failed");
                Ok(CallToolResult::error(vec![Content::text(err.to_string())]))
            }
        }
    }
}
