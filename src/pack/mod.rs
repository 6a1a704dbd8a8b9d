//! Pack Model & Validator: parses and validates task-pack JSON.

pub mod model;
pub mod validate;

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use model::{InputSchema, InputType, TaskPackManifest};

/// A fully assembled task pack: manifest + flow, loaded from a pack directory.
#[derive(Debug, Clone)]
pub struct TaskPack {
    pub manifest: TaskPackManifest,
    pub flow: model::FlowFile,
}

impl TaskPack {
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    pub fn inputs_schema(&self) -> &InputSchema {
        &self.flow.inputs
    }

    pub fn collectible_names(&self) -> Vec<&str> {
        self.flow.collectibles.iter().map(|c| c.name.as_str()).collect()
    }

    /// Parse `taskpack.json` + `flow.json` contents into a `TaskPack`,
    /// rejecting any `kind` other than `"json-dsl"`.
    pub fn parse(taskpack_json: &str, flow_json: &str) -> EngineResult<Self> {
        let manifest: TaskPackManifest = serde_json::from_str(taskpack_json)?;
        if let Some(kind) = &manifest.kind
            && kind != "json-dsl"
        {
            return Err(EngineError::Validation(format!(
                "unsupported pack kind '{}': only 'json-dsl' is supported",
                kind
            )));
        }
        let flow: model::FlowFile = serde_json::from_str(flow_json)?;

        let raw_flow_file: Value = serde_json::from_str(flow_json)?;
        let raw_steps: Vec<Value> = raw_flow_file
            .get("flow")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        validate::validate_flow_raw(&flow.flow, &raw_steps, None)?;

        Ok(Self { manifest, flow })
    }
}

/// Validate supplied inputs against the declared schema.
///
/// Rejects unknown top-level fields and missing required fields without a
/// default. Does not apply defaults; call `apply_defaults` first if desired.
pub fn validate_inputs(schema: &InputSchema, inputs: &Map<String, Value>) -> EngineResult<()> {
    for key in inputs.keys() {
        if !schema.contains_key(key) {
            return Err(EngineError::Input(format!("unknown input field '{}'", key)));
        }
    }
    for (name, field) in schema {
        match inputs.get(name) {
            None => {
                if field.required && field.default.is_none() {
                    return Err(EngineError::Input(format!("missing required input '{}'", name)));
                }
            }
            Some(value) => {
                let matches = match field.r#type {
                    InputType::String => value.is_string(),
                    InputType::Number => value.is_number(),
                    InputType::Boolean => value.is_boolean(),
                };
                if !matches {
                    return Err(EngineError::Input(format!(
                        "input '{}' has wrong type: expected {:?}",
                        name, field.r#type
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Apply schema defaults to `inputs`, returning a fresh map.
///
/// Invariant: defaults apply only when the key is *absent*.
/// An explicit `false`/`0`/`""` suppresses the default — presence, not
/// truthiness, is what's tested.
pub fn apply_defaults(inputs: &Map<String, Value>, schema: &InputSchema) -> Map<String, Value> {
    let mut out = inputs.clone();
    for (name, field) in schema {
        if !out.contains_key(name)
            && let Some(default) = &field.default
        {
            out.insert(name.clone(), default.clone());
        }
    }
    out
}

/// Convenience wrapper bundling resolved inputs into a map usable by the
/// templating engine's `inputs.*` scope.
pub fn inputs_to_map(inputs: &Map<String, Value>) -> HashMap<String, Value> {
    inputs.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::InputField;
    use serde_json::json;

    fn schema_with_default() -> InputSchema {
        let mut s = InputSchema::new();
        s.insert(
            "count".to_string(),
            InputField {
                r#type: InputType::Number,
                required: false,
                default: Some(json!(10)),
                description: None,
            },
        );
        s
    }

    #[test]
    fn default_applies_only_when_key_absent() {
        let schema = schema_with_default();
        let empty = Map::new();
        let out = apply_defaults(&empty, &schema);
        assert_eq!(out.get("count"), Some(&json!(10)));

        let mut explicit_zero = Map::new();
        explicit_zero.insert("count".to_string(), json!(0));
        let out2 = apply_defaults(&explicit_zero, &schema);
        assert_eq!(out2.get("count"), Some(&json!(0)));
    }

    #[test]
    fn unknown_top_level_field_rejected() {
        let schema = schema_with_default();
        let mut inputs = Map::new();
        inputs.insert("bogus".to_string(), json!(1));
        assert!(validate_inputs(&schema, &inputs).is_err());
    }

    #[test]
    fn missing_required_without_default_rejected() {
        let mut schema = InputSchema::new();
        schema.insert(
            "name".to_string(),
            InputField {
                r#type: InputType::String,
                required: true,
                default: None,
                description: None,
            },
        );
        let inputs = Map::new();
        assert!(validate_inputs(&schema, &inputs).is_err());
    }
}
