//! HTTP plumbing shared by the REST tool and the LLM runtime.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::options::TransportOptions;

/// Build a configured HTTP client from transport options.
pub fn build_http_client(transport_options: &TransportOptions) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder();

    if let Some(timeout) = transport_options.timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(proxy_url) = &transport_options.proxy {
        match reqwest::Proxy::all(proxy_url) {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(e) => tracing::warn!("Ignoring invalid proxy {}: {}", proxy_url, e),
        }
    }
    if let Some(agent) = &transport_options.user_agent {
        builder = builder.user_agent(agent.clone());
    }

    builder.build()
}

/// Add the transport's extra headers to a request.
pub fn add_extra_headers(
    mut request: RequestBuilder,
    transport_options: &TransportOptions,
) -> RequestBuilder {
    for (key, value) in &transport_options.headers {
        request = request.header(key, value);
    }
    request
}

/// Extension trait for RequestBuilder that logs request body.
pub trait RequestBuilderExt {
    /// Set JSON request body and log it. Returns the RequestBuilder for chaining.
    fn json_logged<T: serde::Serialize + ?Sized>(self, json: &T) -> Self;
}

impl RequestBuilderExt for RequestBuilder {
    fn json_logged<T: serde::Serialize + ?Sized>(self, json: &T) -> Self {
        if let Ok(req_body) = serde_json::to_string_pretty(json) {
            tracing::debug!("HTTP request body ({} bytes):\n{}", req_body.len(), req_body);
        }

        self.json(json)
    }
}

/// Extension trait for Response that logs response body.
#[async_trait]
pub trait ResponseExt {
    /// Get response text and log it. Consumes the response.
    async fn text_logged(self) -> Result<String, reqwest::Error>;
}

#[async_trait]
impl ResponseExt for reqwest::Response {
    async fn text_logged(self) -> Result<String, reqwest::Error> {
        let status = self.status();
        let text = self.text().await?;
        tracing::debug!("HTTP response {} ({} bytes):\n{}", status, text.len(), text);
        Ok(text)
    }
}

/// Failure below the HTTP status level: connection, timeout, malformed request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(String),
}

/// A fully resolved outbound request.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
    /// Upper-cased verb; not restricted to the common set.
    pub method: String,
    pub url: String,
    pub query: Map<String, Value>,
    pub json: Option<Value>,
    /// Form fields; sent instead of `json` when present.
    pub form: Option<Map<String, Value>>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// The parts of a response the REST tool looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl RestResponse {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }

    /// JSON body when the content type claims JSON and it parses, otherwise the raw text.
    pub fn parsed_body(&self) -> Value {
        let claims_json = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"));
        if claims_json {
            if let Ok(value) = serde_json::from_str(&self.body) {
                return value;
            }
        }
        Value::String(self.body.clone())
    }
}

/// Sends one request and returns the raw response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError>;
}

/// `HttpTransport` backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    transport_options: TransportOptions,
}

impl ReqwestTransport {
    /// Transport whose client honors the timeout, proxy and user agent in
    /// `transport_options`, and sends its extra headers on every request.
    pub fn new(transport_options: &TransportOptions) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(transport_options)?,
            transport_options: transport_options.clone(),
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            transport_options: TransportOptions::default(),
        }
    }
}

/// Process-wide transport used by REST tools that are not given one explicitly.
pub fn default_transport() -> Arc<dyn HttpTransport> {
    static DEFAULT: OnceLock<Arc<ReqwestTransport>> = OnceLock::new();
    let transport = DEFAULT.get_or_init(|| Arc::new(ReqwestTransport::from_client(Client::new())));
    Arc::clone(transport) as Arc<dyn HttpTransport>
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: RestRequest) -> Result<RestResponse, TransportError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| TransportError::InvalidMethod(request.method.clone()))?;

        let mut builder = add_extra_headers(
            self.client.request(method, &request.url),
            &self.transport_options,
        )
        .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&encode_pairs(&request.query));
        }
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(form) = &request.form {
            builder = builder.form(&encode_pairs(form));
        } else if let Some(json) = &request.json {
            builder = builder.json_logged(json);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.text_logged().await?;

        Ok(RestResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Flatten a JSON object into key/value pairs for query strings and forms.
///
/// Arrays repeat the key, nulls are skipped, nested objects are sent as JSON text.
pub fn encode_pairs(fields: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(fields.len());
    for (key, value) in fields {
        match value {
            Value::Null => {}
            Value::Array(items) => pairs.extend(
                items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| (key.clone(), scalar_text(item))),
            ),
            other => pairs.push((key.clone(), scalar_text(other))),
        }
    }
    pairs
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pairs_flatten_scalars_and_arrays() {
        let fields = json!({"tag": ["a", "b"], "limit": 5, "done": false, "skip": null});
        let Value::Object(fields) = fields else { unreachable!() };
        let mut pairs = encode_pairs(&fields);
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("done".to_string(), "false".to_string()),
                ("limit".to_string(), "5".to_string()),
                ("tag".to_string(), "a".to_string()),
                ("tag".to_string(), "b".to_string()),
            ]
        );
    }

    #[test]
    fn body_falls_back_to_text_when_json_is_malformed() {
        let response = RestResponse {
            status: 200,
            content_type: Some("application/json; charset=utf-8".into()),
            body: "{not json".into(),
        };
        assert_eq!(response.parsed_body(), json!("{not json"));
    }

    #[test]
    fn body_is_text_without_json_content_type() {
        let response = RestResponse {
            status: 200,
            content_type: Some("text/plain".into()),
            body: "{\"id\":\"1\"}".into(),
        };
        assert_eq!(response.parsed_body(), json!("{\"id\":\"1\"}"));
    }
}
