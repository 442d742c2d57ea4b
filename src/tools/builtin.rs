//! Tools shipped with the gateway: calculator utilities, an echo tool, the
//! CRUD REST suite and the todo-widget REST tools.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::HttpTransport;
use crate::model::ToolResult;
use crate::tools::schema::empty_object_schema;
use crate::tools::{
    RegistryError, RestTool, Tool, ToolContext, ToolError, ToolMetadata, ToolRegistry,
};
use crate::tool;

/// Name of the generic CRUD tool.
pub const CRUD_REST_TOOL: &str = "crud.rest";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct BinaryInput {
    pub a: i64,
    pub b: i64,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct CalcOutput {
    pub result: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InsanityInput {
    pub x: i64,
}

fn overflow(tool: &str) -> ToolError {
    ToolError::execution(tool, "integer overflow")
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AdditionTool;

#[tool(
    name = "addition",
    description = "Add two numbers a and b, where a and b are integers. return the result of the addition of a and b, result = a + b"
)]
impl AdditionTool {
    async fn call(&self, input: BinaryInput) -> Result<CalcOutput, ToolError> {
        let result = input.a.checked_add(input.b).ok_or_else(|| overflow("addition"))?;
        Ok(CalcOutput { result })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MultiplicationTool;

#[tool(
    name = "multiplication",
    description = "Multiply two numbers a and b, where a and b are integers. return the result of the multiplication of a and b, result = a * b"
)]
impl MultiplicationTool {
    async fn call(&self, input: BinaryInput) -> Result<CalcOutput, ToolError> {
        let result = input
            .a
            .checked_mul(input.b)
            .ok_or_else(|| overflow("multiplication"))?;
        Ok(CalcOutput { result })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct InsanityTool;

#[tool(
    name = "insanity",
    description = "Return the result of the insanity of the number x, result = x * 28 + 11"
)]
impl InsanityTool {
    async fn call(&self, input: InsanityInput) -> Result<CalcOutput, ToolError> {
        let result = input
            .x
            .checked_mul(28)
            .and_then(|v| v.checked_add(11))
            .ok_or_else(|| overflow("insanity"))?;
        Ok(CalcOutput { result })
    }
}

/// Registry holding the three calculator tools.
pub fn calculator_registry() -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(AdditionTool)?;
    registry.register(MultiplicationTool)?;
    registry.register(InsanityTool)?;
    Ok(registry)
}

/// Returns its input unchanged.
pub struct EchoTool {
    metadata: ToolMetadata,
}

impl EchoTool {
    pub fn new() -> Self {
        Self {
            metadata: ToolMetadata::new("echo", "Return the provided arguments unchanged.")
                .with_input_schema(empty_object_schema())
                .with_output_description("The arguments that were passed in."),
        }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    async fn run(&self, context: &ToolContext) -> Result<ToolResult, ToolError> {
        Ok(ToolResult::new(
            self.name(),
            Value::Object(context.input.clone()),
        ))
    }
}

/// Register named tools for a typical TODO CRUD API, all sending through `transport`.
pub fn register_basic_crud_tools(
    registry: &mut ToolRegistry,
    transport: &Arc<dyn HttpTransport>,
) -> Result<(), RegistryError> {
    for (name, description) in [
        ("todo.list", "List todos. GET /todos"),
        ("todo.get", "Get a todo by id. GET /todos/{id}"),
        ("todo.create", "Create a todo. POST /todos"),
        ("todo.update", "Update a todo. PUT or PATCH /todos/{id}"),
        ("todo.delete", "Delete a todo. DELETE /todos/{id}"),
    ] {
        registry.register(
            RestTool::builder(name, description)
                .transport(Arc::clone(transport))
                .build(),
        )?;
    }
    Ok(())
}

/// Register the generic CRUD tool (unless already present) plus the named affordances.
pub fn register_default_crud_suite(
    registry: &mut ToolRegistry,
    transport: &Arc<dyn HttpTransport>,
) -> Result<(), RegistryError> {
    if !registry.contains(CRUD_REST_TOOL) {
        registry.register(
            RestTool::builder(
                CRUD_REST_TOOL,
                "Call the CRUD backend using arbitrary HTTP method/path.",
            )
            .transport(Arc::clone(transport))
            .build(),
        )?;
    }
    register_basic_crud_tools(registry, transport)
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TodoListQuery {
    #[serde(rename = "widgetId")]
    pub widget_id: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TodoItemData {
    /// The content of the todo item
    pub content: String,
}

/// REST tools for the todo widget of the Space API.
pub fn todo_widget_tools(transport: &Arc<dyn HttpTransport>) -> Vec<RestTool> {
    vec![
        RestTool::builder(
            "get_todo_list",
            "Get the todo list for a given widgetId from the Space API. \
             The API endpoint is GET /api/widgets/todo/{widgetId}",
        )
        .query::<TodoListQuery>()
        .transport(Arc::clone(transport))
        .build(),
        RestTool::builder(
            "add_todo_item",
            "Add a new todo item to the todo list for a given widgetId from the Space API. \
             The API endpoint is POST /api/widgets/todo/{widgetId}",
        )
        .data::<TodoItemData>()
        .transport(Arc::clone(transport))
        .build(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::default_transport;
    use serde_json::{json, Map};

    fn context(input: Value) -> ToolContext {
        let Value::Object(input) = input else {
            panic!("input must be an object")
        };
        ToolContext::new().with_input(input)
    }

    #[tokio::test]
    async fn calculator_tools_compute() {
        let result = AdditionTool.run(&context(json!({"a": 2, "b": 3}))).await.unwrap();
        assert_eq!(result.output, json!({"result": 5}));
        assert_eq!(result.tool_name, "addition");

        let result = MultiplicationTool
            .run(&context(json!({"a": 4, "b": 6})))
            .await
            .unwrap();
        assert_eq!(result.output, json!({"result": 24}));

        let result = InsanityTool.run(&context(json!({"x": 2}))).await.unwrap();
        assert_eq!(result.output, json!({"result": 67}));
    }

    #[tokio::test]
    async fn typed_tool_rejects_malformed_input() {
        let err = AdditionTool
            .run(&context(json!({"a": "two", "b": 3})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
        assert!(err.to_string().starts_with("addition: invalid input"));
    }

    #[tokio::test]
    async fn overflow_is_an_execution_error() {
        let err = InsanityTool
            .run(&context(json!({"x": i64::MAX})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[test]
    fn typed_tool_metadata_has_schemas() {
        let metadata = AdditionTool.metadata();
        let input = metadata.input_schema.as_ref().unwrap();
        assert_eq!(input["properties"]["a"]["type"], json!("integer"));
        assert!(metadata
            .output_description
            .as_deref()
            .unwrap()
            .starts_with("Response validated by the tool-specific model: CalcOutput."));
    }

    #[tokio::test]
    async fn echo_returns_input() {
        let result = EchoTool::new().run(&context(json!({"x": 1}))).await.unwrap();
        assert_eq!(result.output, json!({"x": 1}));
        let empty = EchoTool::new().run(&ToolContext::new().with_input(Map::new())).await.unwrap();
        assert_eq!(empty.output, json!({}));
    }

    #[test]
    fn default_crud_suite_registers_six_tools() {
        let mut registry = ToolRegistry::new();
        register_default_crud_suite(&mut registry, &default_transport()).unwrap();
        assert_eq!(
            registry.names(),
            vec!["crud.rest", "todo.list", "todo.get", "todo.create", "todo.update", "todo.delete"]
        );
    }

    #[test]
    fn default_crud_suite_keeps_existing_generic_tool() {
        let mut registry = ToolRegistry::new();
        registry
            .register(RestTool::new(CRUD_REST_TOOL, "custom"))
            .unwrap();
        register_default_crud_suite(&mut registry, &default_transport()).unwrap();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.get(CRUD_REST_TOOL).unwrap().metadata().description, "custom");

        let err = register_default_crud_suite(&mut registry, &default_transport()).unwrap_err();
        assert_eq!(err.to_string(), "Tool todo.list already registered");
    }

    #[test]
    fn todo_widget_tools_are_typed() {
        let tools = todo_widget_tools(&default_transport());
        let list = tools[0].metadata().input_schema.clone().unwrap();
        assert_eq!(list["properties"]["query"]["anyOf"][0]["$ref"], json!("#/definitions/TodoListQuery"));
        assert!(list["definitions"]["TodoListQuery"]["properties"]["widgetId"].is_object());

        let add = tools[1].metadata().input_schema.clone().unwrap();
        assert_eq!(add["properties"]["data"]["anyOf"][0]["$ref"], json!("#/definitions/TodoItemData"));
    }
}
