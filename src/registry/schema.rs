/// Declared parameter schemas and parameter binding
///
/// Every capability declares its parameters up front. Binding checks an
/// inbound parameter map against that declaration: required parameters must
/// be present and every value must already have the declared JSON shape.
/// Nothing is coerced.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::registry::HandlerError;

/// JSON shape a parameter value must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    /// A JSON number with no fractional part
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    /// Any JSON value, including null
    Any,
}

impl ParamType {
    /// Check whether a value is structurally of this type
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
            ParamType::Any => true,
        }
    }

    /// JSON Schema `type` keyword, if the type constrains it
    pub fn json_schema_type(&self) -> Option<&'static str> {
        match self {
            ParamType::String => Some("string"),
            ParamType::Integer => Some("integer"),
            ParamType::Number => Some("number"),
            ParamType::Boolean => Some("boolean"),
            ParamType::Array => Some("array"),
            ParamType::Object => Some("object"),
            ParamType::Any => None,
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_schema_type().unwrap_or("any"))
    }
}

/// Name of the JSON type of a value, for error messages
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub description: Option<String>,
}

/// Parameter mismatch found while binding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("parameter '{name}' must be {expected}, got {found}")]
    WrongType {
        name: String,
        expected: ParamType,
        found: &'static str,
    },
}

/// The declared parameters of one capability
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamSchema {
    params: Vec<ParamSpec>,
}

impl ParamSchema {
    /// An empty schema (capability takes no parameters)
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required parameter
    pub fn required(self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.with(name.into(), param_type, true)
    }

    /// Declare an optional parameter
    pub fn optional(self, name: impl Into<String>, param_type: ParamType) -> Self {
        self.with(name.into(), param_type, false)
    }

    /// Attach a description to the most recently declared parameter
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        if let Some(last) = self.params.last_mut() {
            last.description = Some(description.into());
        }
        self
    }

    // Redeclaring a name replaces the earlier declaration
    fn with(mut self, name: String, param_type: ParamType, required: bool) -> Self {
        self.params.retain(|p| p.name != name);
        self.params.push(ParamSpec {
            name,
            param_type,
            required,
            description: None,
        });
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validate an inbound parameter map and bind it
    ///
    /// Undeclared parameters are not passed on; their names are returned in
    /// `Binding::ignored` so the caller can log them. An explicit `null` for an
    /// optional parameter counts as absent.
    pub fn bind(&self, mut raw: Map<String, Value>) -> Result<Binding, ValidationError> {
        let mut bound = Map::new();

        for spec in &self.params {
            match raw.remove(&spec.name) {
                Some(Value::Null) if !spec.required && spec.param_type != ParamType::Any => {}
                Some(value) => {
                    if !spec.param_type.accepts(&value) {
                        return Err(ValidationError::WrongType {
                            name: spec.name.clone(),
                            expected: spec.param_type,
                            found: json_type_name(&value),
                        });
                    }
                    bound.insert(spec.name.clone(), value);
                }
                None if spec.required => return Err(ValidationError::Missing(spec.name.clone())),
                None => {}
            }
        }

        let mut ignored: Vec<String> = raw.into_iter().map(|(name, _)| name).collect();
        ignored.sort();

        Ok(Binding {
            params: Params(bound),
            ignored,
        })
    }

    /// Render as a JSON Schema object for capability listings
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for spec in &self.params {
            let mut prop = Map::new();
            if let Some(ty) = spec.param_type.json_schema_type() {
                prop.insert("type".to_string(), json!(ty));
            }
            if let Some(description) = &spec.description {
                prop.insert("description".to_string(), json!(description));
            }
            properties.insert(spec.name.clone(), Value::Object(prop));
        }

        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Result of a successful bind
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub params: Params,
    /// Undeclared parameter names that were dropped
    pub ignored: Vec<String>,
}

/// Validated parameters handed to a handler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Borrow a string parameter
    pub fn str(&self, name: &str) -> Result<&str, HandlerError> {
        self.0
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::failed(format!("parameter '{}' is not a string", name)))
    }

    /// Deserialize a required parameter into any serde type
    pub fn value<T: DeserializeOwned>(&self, name: &str) -> Result<T, HandlerError> {
        let raw = self
            .0
            .get(name)
            .ok_or_else(|| HandlerError::failed(format!("parameter '{}' is missing", name)))?;
        serde_json::from_value(raw.clone())
            .map_err(|e| HandlerError::failed(format!("parameter '{}': {}", name, e)))
    }

    /// Deserialize an optional parameter
    pub fn optional<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, HandlerError> {
        if self.0.contains_key(name) {
            self.value(name).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}
