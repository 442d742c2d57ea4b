//! Support code for tools declared with the `#[tool]` attribute.
//!
//! The macro generates a [`Tool`](crate::tools::Tool) impl that calls into
//! these helpers, so the typed conversions live in one place.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::model::ToolResult;
use crate::tools::schema::{describe_output, schema_of};
use crate::tools::{ToolContext, ToolError, ToolMetadata};

/// Metadata for a tool taking `In` and producing `Out`.
pub fn metadata_for<In: JsonSchema, Out: JsonSchema>(name: &str, description: &str) -> ToolMetadata {
    let output_schema = schema_of::<Out>();
    ToolMetadata::new(name, description)
        .with_input_schema(schema_of::<In>())
        .with_output_description(describe_output(Some(&output_schema)))
        .with_output_schema(output_schema)
}

/// Deserialize the context input into `In`, rejecting anything that does not fit.
pub fn parse_input<In: DeserializeOwned>(tool: &str, context: &ToolContext) -> Result<In, ToolError> {
    serde_json::from_value(Value::Object(context.input.clone()))
        .map_err(|e| ToolError::invalid_input(tool, e))
}

/// Wrap a typed output into a [`ToolResult`].
pub fn into_result<Out: Serialize>(tool: &str, output: Out) -> Result<ToolResult, ToolError> {
    let output = serde_json::to_value(output)
        .map_err(|e| ToolError::execution(tool, format!("unserializable output: {e}")))?;
    Ok(ToolResult::new(tool, output))
}
