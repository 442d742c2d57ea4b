//! Conversation and tool-result data structures exchanged with callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// A single conversation message.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_result: Option<ToolResult>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_result: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: Map<String, Value>,
}

/// One reasoning step of an agent turn.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStep {
    #[serde(default)]
    pub thought: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub final_response: Option<String>,
}

/// Output of a single tool execution.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub output: Value,
    /// Backend-level details such as the HTTP status code.
    #[serde(default)]
    pub raw_response: Option<Value>,
    /// Correlation id assigned by the calling runtime.
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

impl ToolResult {
    pub fn new(tool_name: impl Into<String>, output: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            output,
            raw_response: None,
            tool_call_id: None,
        }
    }

    pub fn with_raw_response(mut self, raw: Value) -> Self {
        self.raw_response = Some(raw);
        self
    }

    pub fn with_tool_call_id(mut self, id: impl Into<String>) -> Self {
        self.tool_call_id = Some(id.into());
        self
    }
}

/// Caller identity forwarded to tools through the context metadata.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Everything an agent produced for one conversation turn.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantResponse {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub steps: Vec<AgentStep>,
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
    #[serde(default)]
    pub final_text: Option<String>,
}

impl AssistantResponse {
    /// A response consisting of a single assistant message that is also the final text.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            messages: vec![Message::assistant(text.clone())],
            steps: Vec::new(),
            tool_results: Vec::new(),
            final_text: Some(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roles_serialize_lowercase() {
        let message = Message::user("hi");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"role": "user", "content": "hi"})
        );
    }

    #[test]
    fn tool_result_omits_absent_fields() {
        let result = ToolResult::new("todo.list", json!([1, 2]));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"tool_name": "todo.list", "output": [1, 2]})
        );
    }

    #[test]
    fn assistant_response_defaults_when_parsing() {
        let parsed: AssistantResponse =
            serde_json::from_value(json!({"messages": []})).unwrap();
        assert!(parsed.steps.is_empty());
        assert!(parsed.final_text.is_none());
    }
}
