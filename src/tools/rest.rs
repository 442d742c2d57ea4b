//! Generic, data-driven tool that turns its arguments into one HTTP request.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::http::{default_transport, HttpTransport, RestRequest};
use crate::model::ToolResult;
use crate::tools::schema::{definitions, describe_output, schema_of};
use crate::tools::{Tool, ToolContext, ToolError, ToolMetadata};

/// Envelope shared by every REST tool.
///
/// The `query`, `json` and `data` slots are free-form objects unless a tool
/// narrows them with a payload model.
#[derive(Debug, Deserialize, JsonSchema)]
struct RestToolInput {
    /// Path relative to the CRUD base URL, e.g. /todos
    path: String,
    /// HTTP method: GET, POST, PUT, PATCH, DELETE
    method: String,
    /// Query string parameters to include with the request.
    #[serde(default)]
    #[schemars(schema_with = "free_form_object")]
    query: Option<Value>,
    /// JSON payload to include with the request.
    #[serde(default)]
    #[schemars(schema_with = "free_form_object")]
    json: Option<Value>,
    /// Form data to include with the request.
    #[serde(default)]
    #[schemars(schema_with = "free_form_object")]
    data: Option<Value>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    /// Override the default base URL supplied via ToolContext.
    #[serde(default)]
    base_url: Option<String>,
}

fn free_form_object(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    schemars::schema::SchemaObject {
        instance_type: Some(
            vec![
                schemars::schema::InstanceType::Object,
                schemars::schema::InstanceType::Null,
            ]
            .into(),
        ),
        ..Default::default()
    }
    .into()
}

type Normalizer = dyn Fn(Value) -> Result<Value, serde_json::Error> + Send + Sync;

/// A typed sub-schema narrowing one payload slot.
#[derive(Clone)]
pub struct PayloadModel {
    title: String,
    schema: Value,
    normalize: Arc<Normalizer>,
}

impl PayloadModel {
    /// Model backed by the Rust type `T`.
    pub fn of<T>() -> Self
    where
        T: DeserializeOwned + Serialize + JsonSchema + 'static,
    {
        Self {
            title: T::schema_name(),
            schema: schema_of::<T>(),
            normalize: Arc::new(|raw| {
                let typed: T = serde_json::from_value(raw)?;
                serde_json::to_value(typed)
            }),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Validate `raw` against the model and re-serialize it.
    pub fn normalize(&self, raw: Value) -> Result<Value, serde_json::Error> {
        (self.normalize)(raw)
    }
}

impl fmt::Debug for PayloadModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadModel")
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

/// How a payload slot is typed.
#[derive(Debug, Clone, Default)]
pub enum PayloadSlot {
    /// Any JSON object is accepted.
    #[default]
    Untyped,
    Typed(PayloadModel),
}

impl PayloadSlot {
    /// Turn a raw slot value into the mapping sent over the wire, without null fields.
    fn serialize(
        &self,
        tool: &str,
        slot: &str,
        raw: Option<Value>,
    ) -> Result<Map<String, Value>, ToolError> {
        let raw = match raw {
            None | Some(Value::Null) => return Ok(Map::new()),
            Some(raw @ Value::Object(_)) => raw,
            Some(other) => {
                return Err(ToolError::invalid_input(
                    tool,
                    format!("{slot} must be an object, got {other}"),
                ))
            }
        };

        let value = match self {
            PayloadSlot::Untyped => raw,
            PayloadSlot::Typed(model) => model.normalize(raw).map_err(|e| {
                ToolError::invalid_input(tool, format!("invalid {slot} parameters: {e}"))
            })?,
        };

        match strip_nulls(value) {
            Value::Object(fields) => Ok(fields),
            _ => Ok(Map::new()),
        }
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, strip_nulls(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Join a base URL and a path with exactly one slash between them.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Overlay per-call headers on the context defaults; per-call values win.
pub fn merge_headers(
    defaults: BTreeMap<String, String>,
    overrides: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = defaults;
    merged.extend(overrides);
    merged
}

/// A tool calling a CRUD-style backend with arbitrary method, path, query and body.
pub struct RestTool {
    metadata: ToolMetadata,
    query: PayloadSlot,
    json: PayloadSlot,
    data: PayloadSlot,
    transport: Arc<dyn HttpTransport>,
}

impl RestTool {
    /// A REST tool with free-form slots and the default transport.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::builder(name, description).build()
    }

    pub fn builder(name: impl Into<String>, description: impl Into<String>) -> RestToolBuilder {
        RestToolBuilder {
            name: name.into(),
            description: description.into(),
            query: PayloadSlot::Untyped,
            json: PayloadSlot::Untyped,
            data: PayloadSlot::Untyped,
            output_schema: None,
            transport: None,
        }
    }

    /// Composite input schema: the envelope with typed slots swapped in.
    pub fn build_input_schema(
        tool_name: &str,
        query: &PayloadSlot,
        json: &PayloadSlot,
        data: &PayloadSlot,
    ) -> Value {
        let mut root = schema_of::<RestToolInput>();
        let sanitized: String = tool_name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        root["title"] = json!(format!("RestToolInput_{sanitized}"));

        let mut defs = definitions(&root);
        for (slot, kind, label) in [
            ("query", query, "Query parameters"),
            ("json", json, "JSON payload"),
            ("data", data, "Form data"),
        ] {
            let PayloadSlot::Typed(model) = kind else {
                continue;
            };

            let mut sub = model.schema().clone();
            defs.extend(definitions(&sub));
            if let Value::Object(fields) = &mut sub {
                for key in ["$schema", "definitions", "$defs"] {
                    fields.remove(key);
                }
            }
            defs.insert(model.title().to_string(), sub);
            root["properties"][slot] = json!({
                "anyOf": [
                    {"$ref": format!("#/definitions/{}", model.title())},
                    {"type": "null"},
                ],
                "default": null,
                "description": format!("{label} validated by the tool-specific model."),
            });
        }

        if !defs.is_empty() {
            root["definitions"] = Value::Object(defs);
        }
        root
    }

    fn invalid(&self, reason: impl ToString) -> ToolError {
        ToolError::invalid_input(self.name(), reason)
    }
}

#[async_trait]
impl Tool for RestTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn run(&self, context: &ToolContext) -> Result<ToolResult, ToolError> {
        let input: RestToolInput = serde_json::from_value(Value::Object(context.input.clone()))
            .map_err(|e| self.invalid(e))?;
        let query = self.query.serialize(self.name(), "query", input.query)?;
        let json = self.json.serialize(self.name(), "json", input.json)?;
        let data = self.data.serialize(self.name(), "data", input.data)?;

        let base_url = input
            .base_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .or_else(|| context.base_url())
            .ok_or_else(|| ToolError::MissingBaseUrl {
                tool: self.name().to_string(),
            })?;

        let url = join_url(base_url, &input.path);
        let method = input.method.to_uppercase();
        let headers = merge_headers(context.default_headers(), input.headers);

        let request = RestRequest {
            method,
            url,
            query,
            json: (!json.is_empty()).then_some(Value::Object(json)),
            form: (!data.is_empty()).then_some(data),
            headers,
            timeout: context.timeout(),
        };

        info!(
            tool = self.name(),
            method = %request.method,
            url = %request.url,
            "Dispatching REST tool request"
        );

        let response = self
            .transport
            .send(request)
            .await
            .map_err(|source| ToolError::Transport {
                tool: self.name().to_string(),
                source,
            })?;

        let body = response.parsed_body();
        if response.is_error() {
            warn!(tool = self.name(), status = response.status, "Backend returned an error");
            return Err(ToolError::Backend {
                tool: self.name().to_string(),
                status: response.status,
                body,
            });
        }

        debug!(tool = self.name(), status = response.status, "REST tool succeeded");
        Ok(ToolResult::new(self.name(), body)
            .with_raw_response(json!({ "status_code": response.status })))
    }
}

/// Builder assembling a [`RestTool`] from optional payload and output models.
pub struct RestToolBuilder {
    name: String,
    description: String,
    query: PayloadSlot,
    json: PayloadSlot,
    data: PayloadSlot,
    output_schema: Option<Value>,
    transport: Option<Arc<dyn HttpTransport>>,
}

impl RestToolBuilder {
    /// Narrow the query string to `T`.
    pub fn query<T>(mut self) -> Self
    where
        T: DeserializeOwned + Serialize + JsonSchema + 'static,
    {
        self.query = PayloadSlot::Typed(PayloadModel::of::<T>());
        self
    }

    /// Narrow the JSON body to `T`.
    pub fn json<T>(mut self) -> Self
    where
        T: DeserializeOwned + Serialize + JsonSchema + 'static,
    {
        self.json = PayloadSlot::Typed(PayloadModel::of::<T>());
        self
    }

    /// Narrow the form body to `T`.
    pub fn data<T>(mut self) -> Self
    where
        T: DeserializeOwned + Serialize + JsonSchema + 'static,
    {
        self.data = PayloadSlot::Typed(PayloadModel::of::<T>());
        self
    }

    /// Document the response shape. Not enforced at runtime.
    pub fn output<T: JsonSchema>(mut self) -> Self {
        self.output_schema = Some(schema_of::<T>());
        self
    }

    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> RestTool {
        let input_schema =
            RestTool::build_input_schema(&self.name, &self.query, &self.json, &self.data);
        let output_description = describe_output(self.output_schema.as_ref());

        let mut metadata = ToolMetadata::new(self.name, self.description)
            .with_input_schema(input_schema)
            .with_output_description(output_description);
        if let Some(schema) = self.output_schema {
            metadata = metadata.with_output_schema(schema);
        }

        RestTool {
            metadata,
            query: self.query,
            json: self.json,
            data: self.data,
            transport: self.transport.unwrap_or_else(default_transport),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Filter {
        /// Only completed items
        done: Option<bool>,
        limit: u32,
    }

    #[test]
    fn join_url_normalizes_slashes() {
        for (base, path) in [("http://h/", "/p"), ("http://h", "p"), ("http://h/", "p"), ("http://h", "/p")] {
            assert_eq!(join_url(base, path), "http://h/p");
        }
        assert_eq!(join_url("http://h/api/", "/todos/1"), "http://h/api/todos/1");
    }

    #[test]
    fn merge_headers_prefers_per_call_values() {
        let defaults = BTreeMap::from([("a".to_string(), "1".to_string())]);
        let overrides = BTreeMap::from([
            ("a".to_string(), "2".to_string()),
            ("b".to_string(), "3".to_string()),
        ]);
        assert_eq!(
            merge_headers(defaults, overrides),
            BTreeMap::from([
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "3".to_string()),
            ])
        );
    }

    #[test]
    fn untyped_slot_keeps_fields_and_drops_nulls() {
        let fields = PayloadSlot::Untyped
            .serialize("t", "json", Some(json!({"title": "x", "note": null})))
            .unwrap();
        assert_eq!(Value::Object(fields), json!({"title": "x"}));
    }

    #[test]
    fn typed_slot_validates_and_excludes_unset() {
        let slot = PayloadSlot::Typed(PayloadModel::of::<Filter>());

        let fields = slot
            .serialize("t", "query", Some(json!({"limit": 5, "extra": 1})))
            .unwrap();
        assert_eq!(Value::Object(fields), json!({"limit": 5}));

        let err = slot
            .serialize("t", "query", Some(json!({"limit": "five"})))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[test]
    fn non_object_slot_is_rejected() {
        let err = PayloadSlot::Untyped
            .serialize("t", "data", Some(json!([1, 2])))
            .unwrap_err();
        assert!(err.to_string().starts_with("t: invalid input: data must be an object"));
    }

    #[test]
    fn input_schema_swaps_in_typed_slots() {
        let tool = RestTool::builder("todo.filter", "Filter todos")
            .query::<Filter>()
            .build();
        let schema = tool.metadata().input_schema.clone().unwrap();

        assert_eq!(schema["title"], json!("RestToolInput_todo_filter"));
        assert_eq!(
            schema["properties"]["query"]["anyOf"],
            json!([{"$ref": "#/definitions/Filter"}, {"type": "null"}])
        );
        assert_eq!(schema["properties"]["query"]["default"], Value::Null);
        assert_eq!(schema["properties"]["json"]["type"], json!(["object", "null"]));
        assert!(schema["definitions"]["Filter"]["properties"]["limit"].is_object());

        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("path")));
        assert!(required.contains(&json!("method")));
    }

    #[test]
    fn output_description_defaults_to_arbitrary_json() {
        let tool = RestTool::new("todo.list", "List todos. GET /todos");
        assert_eq!(
            tool.metadata().output_description.as_deref(),
            Some("Arbitrary JSON response from the CRUD backend.")
        );
    }
}
