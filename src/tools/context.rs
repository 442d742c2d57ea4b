//! Request-scoped data handed to tools.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::UserContext;

/// Default per-call timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Metadata key holding the backend base URL.
pub const BASE_URL_KEY: &str = "base_url";
/// Metadata key holding headers sent with every backend request.
pub const DEFAULT_HEADERS_KEY: &str = "default_headers";
/// Metadata key holding the caller's [`crate::model::UserContext`].
pub const USER_CONTEXT_KEY: &str = "user_context";

/// Runtime context passed to tools.
///
/// A base context carrying auth headers and the base URL is built once per
/// turn; each invocation gets its own copy through [`ToolContext::with_input`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolContext {
    /// Arguments for the current invocation.
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Cross-cutting data such as `base_url` and `default_headers`.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl Default for ToolContext {
    fn default() -> Self {
        Self {
            input: Map::new(),
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            metadata: Map::new(),
        }
    }
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of this context carrying `payload` as its input.
    ///
    /// The receiver is left untouched and the copy shares no nested values with it.
    pub fn with_input(&self, payload: Map<String, Value>) -> Self {
        Self {
            input: payload,
            timeout_seconds: self.timeout_seconds,
            metadata: self.metadata.clone(),
        }
    }

    pub fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        self.with_metadata(BASE_URL_KEY, Value::String(base_url.into()))
    }

    pub fn with_default_headers<I, K, V>(self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect::<Map<_, _>>();
        self.with_metadata(DEFAULT_HEADERS_KEY, Value::Object(headers))
    }

    /// Base URL from the metadata, if a non-empty one is set.
    pub fn base_url(&self) -> Option<&str> {
        self.metadata
            .get(BASE_URL_KEY)
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
    }

    /// Default headers from the metadata. Non-string values are rendered as JSON.
    pub fn default_headers(&self) -> BTreeMap<String, String> {
        match self.metadata.get(DEFAULT_HEADERS_KEY) {
            Some(Value::Object(headers)) => headers
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            _ => BTreeMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// The caller's identity, when the metadata carries a well-formed one.
    pub fn user_context(&self) -> Option<UserContext> {
        self.metadata
            .get(USER_CONTEXT_KEY)
            .cloned()
            .and_then(|value| serde_json::from_value(value).ok())
    }
}
