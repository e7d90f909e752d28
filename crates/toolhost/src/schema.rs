//! Tool input schemas and the shared argument validator.

use serde_json::{Map, Value, json};

use crate::error::{FieldViolation, ToolError};

/// JSON type of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
        }
    }
}

/// A named tool parameter.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub required: bool,
}

impl Param {
    /// A required parameter.
    pub fn required(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            default: None,
            required: true,
        }
    }

    /// An optional parameter.
    pub fn optional(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set a default. A parameter with a default is never missing.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self.required = false;
        self
    }
}

/// Ordered set of parameters accepted by a tool.
#[derive(Debug, Clone, Default)]
pub struct InputSchema {
    params: Vec<Param>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, param: Param) -> Self {
        self.params.push(param);
        self
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// Render as JSON Schema for `inputSchema`.
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.params {
            let mut prop = Map::new();
            prop.insert("type".into(), json!(param.kind.json_type()));
            if let Some(description) = &param.description {
                prop.insert("description".into(), json!(description));
            }
            if let Some(default) = &param.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(param.name.clone(), Value::Object(prop));
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

    /// Validate raw arguments and fill in defaults.
    ///
    /// Every violating field is reported, not just the first. Unknown
    /// fields are passed through untouched.
    pub fn validate(&self, args: Option<Value>) -> Result<Arguments, ToolError> {
        let mut map = match args {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(ToolError::invalid(
                    "arguments",
                    format!("expected object, got {}", type_name(&other)),
                ));
            }
        };

        let mut violations = Vec::new();
        for param in &self.params {
            match map.get(&param.name) {
                Some(Value::Null) | None => {
                    if let Some(default) = &param.default {
                        map.insert(param.name.clone(), default.clone());
                    } else if param.required {
                        violations.push(FieldViolation {
                            field: param.name.clone(),
                            reason: "required".into(),
                        });
                    }
                }
                Some(value) if !param.kind.accepts(value) => violations.push(FieldViolation {
                    field: param.name.clone(),
                    reason: format!(
                        "expected {}, got {}",
                        param.kind.json_type(),
                        type_name(value)
                    ),
                }),
                Some(_) => {}
            }
        }

        if violations.is_empty() {
            Ok(Arguments(map))
        } else {
            Err(ToolError::InvalidArguments(violations))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Arguments that passed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments(pub Map<String, Value>);

impl Arguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// A string argument that must be present and non-blank.
    pub fn non_blank(&self, name: &str) -> Result<&str, ToolError> {
        match self.str(name) {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(ToolError::invalid(name, "must not be blank")),
        }
    }
}
