//! JSON Schema helpers: generation from Rust types, `$ref` inlining and
//! human-readable output descriptions.

use itertools::Itertools;
use schemars::JsonSchema;
use serde_json::{json, Map, Value};

const DEFINITION_TABLES: [&str; 2] = ["definitions", "$defs"];
const DEFINITION_PREFIXES: [&str; 2] = ["#/definitions/", "#/$defs/"];

/// Description used when a tool declares no output model.
pub const ARBITRARY_OUTPUT: &str = "Arbitrary JSON response from the CRUD backend.";

/// JSON Schema of `T` as a plain JSON value.
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| empty_object_schema())
}

/// Schema accepting any object.
pub fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Collect the definitions tables of a root schema.
pub fn definitions(schema: &Value) -> Map<String, Value> {
    let mut defs = Map::new();
    for table in DEFINITION_TABLES {
        if let Some(Value::Object(entries)) = schema.get(table) {
            defs.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }
    defs
}

/// Recursively replace every local `$ref` in `schema` by the referenced definition.
///
/// Shared definitions are expanded again at each use site. A reference back
/// into a definition that is already being expanded is left in place, so
/// recursive types terminate. Keys next to a `$ref` (such as `description`)
/// are kept on the expanded schema.
pub fn resolve_refs(schema: &Value, defs: &Map<String, Value>) -> Value {
    resolve(schema, defs, &mut Vec::new())
}

fn resolve(node: &Value, defs: &Map<String, Value>, expanding: &mut Vec<String>) -> Value {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                let target = definition_name(reference)
                    .filter(|name| !expanding.iter().any(|n| n == name))
                    .and_then(|name| defs.get(name).map(|def| (name, def)));

                let Some((name, definition)) = target else {
                    return node.clone();
                };

                expanding.push(name.to_string());
                let mut resolved = resolve(definition, defs, expanding);
                expanding.pop();

                if let Value::Object(expanded) = &mut resolved {
                    for (key, value) in map.iter().filter(|(k, _)| k.as_str() != "$ref") {
                        if !expanded.contains_key(key) {
                            expanded.insert(key.clone(), resolve(value, defs, expanding));
                        }
                    }
                }
                return resolved;
            }

            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), resolve(v, defs, expanding)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve(item, defs, expanding))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn definition_name(reference: &str) -> Option<&str> {
    DEFINITION_PREFIXES
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))
}

/// Fully inline a root schema and drop its definitions tables.
///
/// The tables are kept only when a recursive definition left references behind.
pub fn inline_schema(schema: &Value) -> Value {
    let defs = definitions(schema);
    let mut resolved = resolve_refs(schema, &defs);
    if let Value::Object(root) = &mut resolved {
        let dangling = root
            .iter()
            .filter(|(k, _)| !DEFINITION_TABLES.contains(&k.as_str()))
            .any(|(_, v)| has_local_ref(v));
        if !dangling {
            for table in DEFINITION_TABLES {
                root.remove(table);
            }
        }
    }
    resolved
}

fn has_local_ref(node: &Value) -> bool {
    match node {
        Value::Object(map) => {
            map.get("$ref")
                .and_then(Value::as_str)
                .and_then(definition_name)
                .is_some()
                || map.values().any(has_local_ref)
        }
        Value::Array(items) => items.iter().any(has_local_ref),
        _ => false,
    }
}

/// Describe the response of a tool for the model.
pub fn describe_output(output_schema: Option<&Value>) -> String {
    let Some(schema) = output_schema else {
        return ARBITRARY_OUTPUT.to_string();
    };

    let title = schema
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("output");
    let mut description = format!("Response validated by the tool-specific model: {title}");

    if let Some(Value::Object(properties)) = schema.get("properties") {
        let fields = properties
            .iter()
            .map(|(name, field)| match field.get("description").and_then(Value::as_str) {
                Some(info) if !info.is_empty() => format!("{name}: {info}"),
                _ => name.clone(),
            })
            .join(", ");
        if !fields.is_empty() {
            description.push_str(". Fields: ");
            description.push_str(&fields);
        }
    }
    description
}
