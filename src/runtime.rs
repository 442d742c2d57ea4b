//! Boundary to the LLM tool-calling runtime and the reduction of its replies.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{ToolCall, ToolResult};
use crate::options::AgentOptions;

/// Errors that can occur while talking to the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool loop did not finish within {0} iterations")]
    MaxIterations(usize),
}

/// One block of runtime output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
    /// Block kinds the gateway does not interpret.
    #[serde(other)]
    Other,
}

/// A reply as produced by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeReply {
    Blocks(Vec<ContentBlock>),
    Text(String),
    Structured(Value),
}

/// Send a prompt to an LLM with tool servers attached and collect its replies.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    async fn query(
        &self,
        prompt: &str,
        options: &AgentOptions,
    ) -> Result<Vec<RuntimeReply>, RuntimeError>;
}

/// What a turn produced once the replies are reduced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Text of all replies; replies are separated by a blank line.
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
}

/// Fold runtime replies into final text, tool calls and tool results.
pub fn reduce_replies(replies: &[RuntimeReply]) -> TurnOutcome {
    let mut outcome = TurnOutcome::default();
    let mut names: HashMap<String, String> = HashMap::new();

    for reply in replies {
        let text = match reply {
            RuntimeReply::Text(text) => text.clone(),
            RuntimeReply::Structured(value) => structured_text(value),
            RuntimeReply::Blocks(blocks) => {
                let mut text = String::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text { text: segment } => text.push_str(segment),
                        ContentBlock::ToolUse { id, name, input } => {
                            names.insert(id.clone(), name.clone());
                            outcome.tool_calls.push(ToolCall {
                                id: id.clone(),
                                name: name.clone(),
                                input: input.clone(),
                            });
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content,
                            is_error,
                        } => {
                            let tool_name = names
                                .get(tool_use_id)
                                .cloned()
                                .unwrap_or_else(|| tool_use_id.clone());
                            let output = serde_json::from_str(content)
                                .unwrap_or_else(|_| Value::String(content.clone()));
                            let mut result =
                                ToolResult::new(tool_name, output).with_tool_call_id(tool_use_id);
                            if *is_error {
                                result = result.with_raw_response(serde_json::json!({"is_error": true}));
                            }
                            outcome.tool_results.push(result);
                        }
                        ContentBlock::Other => {}
                    }
                }
                text
            }
        };

        if text.is_empty() {
            continue;
        }
        if !outcome.text.is_empty() {
            outcome.text.push_str("\n\n");
        }
        outcome.text.push_str(&text);
    }

    outcome
}

fn structured_text(value: &Value) -> String {
    let field = value.get("text").or_else(|| value.get("content"));
    match field.unwrap_or(value) {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn blocks_yield_text_and_tool_calls() {
        let replies = vec![
            RuntimeReply::Blocks(vec![
                ContentBlock::Text { text: "Let me ".into() },
                ContentBlock::Text { text: "add.".into() },
                ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "mcp__calc__addition".into(),
                    input: json!({"a": 1, "b": 2}).as_object().cloned().unwrap(),
                },
            ]),
            RuntimeReply::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: "t1".into(),
                content: r#"{"result": 3}"#.into(),
                is_error: false,
            }]),
            RuntimeReply::Blocks(vec![ContentBlock::Text { text: "It is 3.".into() }]),
        ];

        let outcome = reduce_replies(&replies);
        assert_eq!(outcome.text, "Let me add.\n\nIt is 3.");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name, "mcp__calc__addition");
        assert_eq!(outcome.tool_results[0].tool_name, "mcp__calc__addition");
        assert_eq!(outcome.tool_results[0].output, json!({"result": 3}));
        assert_eq!(outcome.tool_results[0].tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn plain_and_structured_replies() {
        assert_eq!(reduce_replies(&[RuntimeReply::Text("hi".into())]).text, "hi");
        assert_eq!(
            reduce_replies(&[RuntimeReply::Structured(json!({"text": "a", "content": "b"}))]).text,
            "a"
        );
        assert_eq!(
            reduce_replies(&[RuntimeReply::Structured(json!({"content": "b"}))]).text,
            "b"
        );
        assert_eq!(
            reduce_replies(&[RuntimeReply::Structured(json!({"other": 1}))]).text,
            r#"{"other":1}"#
        );
    }

    #[test]
    fn no_text_is_empty_outcome() {
        let outcome = reduce_replies(&[RuntimeReply::Blocks(vec![ContentBlock::Other])]);
        assert_eq!(outcome, TurnOutcome::default());
        assert_eq!(reduce_replies(&[]), TurnOutcome::default());
    }

    #[test]
    fn unknown_block_types_deserialize_as_other() {
        let block: ContentBlock =
            serde_json::from_value(json!({"type": "thinking", "thinking": "..."})).unwrap();
        assert_eq!(block, ContentBlock::Other);
        let block: ContentBlock =
            serde_json::from_value(json!({"type": "text", "text": "x", "citations": null})).unwrap();
        assert_eq!(block, ContentBlock::Text { text: "x".into() });
    }
}
