//! Plugin traits

use crate::AnalysisContext;
use epistat_core::EpiError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};

/// Metadata about a function argument
#[derive(Debug, Clone, Serialize)]
pub struct ArgMeta {
    pub name: &'static str,
    pub typ: &'static str,
    pub description: &'static str,
    pub optional: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<&'static str>,
}

impl ArgMeta {
    pub const fn required(name: &'static str, typ: &'static str, description: &'static str) -> Self {
        Self { name, typ, description, optional: false, default: None }
    }

    pub const fn optional(name: &'static str, typ: &'static str, description: &'static str, default: &'static str) -> Self {
        Self { name, typ, description, optional: true, default: Some(default) }
    }

    /// JSON schema fragment for this argument
    fn schema(&self) -> JsonValue {
        let mut schema = match self.typ {
            "Number" => json!({ "type": "number" }),
            "Integer" => json!({ "type": "integer", "minimum": 0 }),
            "Bool" => json!({ "type": "boolean" }),
            "List<Number>" => json!({ "type": "array", "items": { "type": "number" } }),
            "List<Text>" => json!({ "type": "array", "items": { "type": ["string", "null"] } }),
            "Dataset" => json!({ "type": "array", "items": { "type": "object" } }),
            "Object" => json!({ "type": "object" }),
            _ => json!({ "type": "string" }),
        };
        if let Some(obj) = schema.as_object_mut() {
            obj.insert("description".to_string(), JsonValue::String(self.description.to_string()));
        }
        schema
    }
}

/// Metadata for a function plugin
#[derive(Debug, Clone, Serialize)]
pub struct FunctionMeta {
    pub name: &'static str,
    pub description: &'static str,
    pub usage: &'static str,
    pub args: &'static [ArgMeta],
    pub returns: &'static str,
    pub examples: &'static [&'static str],
    pub category: &'static str,
    pub related: &'static [&'static str],
}

impl FunctionMeta {
    /// JSON schema describing the argument object
    pub fn input_schema(&self) -> JsonValue {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for arg in self.args {
            properties.insert(arg.name.to_string(), arg.schema());
            if !arg.optional {
                required.push(JsonValue::String(arg.name.to_string()));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Pure function plugin
///
/// Arguments arrive as a JSON object keyed by argument name.
pub trait FunctionPlugin: Send + Sync {
    fn meta(&self) -> FunctionMeta;
    fn call(&self, args: &JsonValue, ctx: &AnalysisContext) -> Result<JsonValue, EpiError>;
}

/// Deserialize a plugin's argument object into its typed form
pub fn decode_args<T: DeserializeOwned>(func: &str, args: &JsonValue) -> Result<T, EpiError> {
    serde_json::from_value(args.clone()).map_err(|e| EpiError::arg_type(func, e.to_string()))
}

/// Serialize a typed result for the caller
pub fn encode_result<T: Serialize>(value: &T) -> Result<JsonValue, EpiError> {
    serde_json::to_value(value).map_err(|e| EpiError::internal(e.to_string()))
}
