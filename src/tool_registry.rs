use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::{ToolError, ToolErrorKind, ToolResult};
use crate::tools::ToolHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Boolean,
    Integer,
}

impl ParamType {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Boolean(bool),
    Integer(i64),
}

impl ArgValue {
    fn to_json(&self) -> Value {
        match self {
            Self::String(value) => json!(value),
            Self::Boolean(value) => json!(value),
            Self::Integer(value) => json!(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub ty: ParamType,
    pub required: bool,
    pub description: &'static str,
    pub default: Option<ArgValue>,
    pub minimum: Option<i64>,
}

impl ParamSpec {
    pub fn required_string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            ty: ParamType::String,
            required: true,
            description,
            default: None,
            minimum: None,
        }
    }

    pub fn optional_string(name: &'static str, description: &'static str) -> Self {
        Self {
            required: false,
            ..Self::required_string(name, description)
        }
    }

    pub fn flag(name: &'static str, description: &'static str, default: bool) -> Self {
        Self {
            name,
            ty: ParamType::Boolean,
            required: false,
            description,
            default: Some(ArgValue::Boolean(default)),
            minimum: None,
        }
    }

    pub fn integer(
        name: &'static str,
        description: &'static str,
        default: i64,
        minimum: i64,
    ) -> Self {
        Self {
            name,
            ty: ParamType::Integer,
            required: false,
            description,
            default: Some(ArgValue::Integer(default)),
            minimum: Some(minimum),
        }
    }

    fn schema(&self) -> Value {
        let mut schema = json!({
            "type": self.ty.json_type(),
            "description": self.description,
        });
        if let Some(default) = &self.default {
            schema["default"] = default.to_json();
        }
        if let Some(minimum) = self.minimum {
            schema["minimum"] = json!(minimum);
        }
        schema
    }

    fn coerce(&self, raw: &Value) -> ToolResult<ArgValue> {
        let mismatch = || {
            ToolError::schema(format!(
                "parameter `{}` must be a {}",
                self.name,
                self.ty.json_type()
            ))
        };
        let value = match self.ty {
            ParamType::String => match raw {
                Value::String(text) => ArgValue::String(text.clone()),
                Value::Number(number) => ArgValue::String(number.to_string()),
                Value::Bool(flag) => ArgValue::String(flag.to_string()),
                _ => return Err(mismatch()),
            },
            ParamType::Boolean => match raw {
                Value::Bool(flag) => ArgValue::Boolean(*flag),
                Value::String(text) => ArgValue::Boolean(parse_bool(text).ok_or_else(mismatch)?),
                Value::Number(number) => match number.as_i64() {
                    Some(0) => ArgValue::Boolean(false),
                    Some(1) => ArgValue::Boolean(true),
                    _ => return Err(mismatch()),
                },
                _ => return Err(mismatch()),
            },
            ParamType::Integer => match raw {
                Value::Number(number) => ArgValue::Integer(
                    number
                        .as_i64()
                        .or_else(|| {
                            number
                                .as_f64()
                                .filter(|value| value.fract() == 0.0)
                                .map(|value| value as i64)
                        })
                        .ok_or_else(mismatch)?,
                ),
                Value::String(text) => {
                    ArgValue::Integer(text.trim().parse::<i64>().map_err(|_| mismatch())?)
                }
                _ => return Err(mismatch()),
            },
        };

        if let (ArgValue::Integer(value), Some(minimum)) = (&value, self.minimum) {
            if *value < minimum {
                return Err(ToolError::schema(format!(
                    "parameter `{}` must be >= {minimum}",
                    self.name
                )));
            }
        }
        Ok(value)
    }
}

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    pub result: Value,
}

impl ToolDescriptor {
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(param.name.to_owned(), param.schema());
            if param.required {
                required.push(param.name);
            }
        }
        json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
            "additionalProperties": false,
        })
    }

    pub fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema(),
            "outputSchema": self.result,
        })
    }
}

/// Arguments after validation: every key is declared, typed, and defaulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: BTreeMap<String, ArgValue>,
}

impl ToolArgs {
    pub fn string(&self, name: &str) -> ToolResult<String> {
        self.opt_string(name)
            .ok_or_else(|| ToolError::schema(format!("missing required parameter `{name}`")))
    }

    pub fn opt_string(&self, name: &str) -> Option<String> {
        match self.values.get(name) {
            Some(ArgValue::String(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.values.get(name), Some(ArgValue::Boolean(true)))
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.values.get(name) {
            Some(ArgValue::Integer(value)) => Some(*value),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
        )
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Immutable after startup; shared by reference with the dispatcher.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> anyhow::Result<()> {
        if self.index.contains_key(descriptor.name) {
            anyhow::bail!("tool `{}` registered twice", descriptor.name);
        }
        self.index.insert(descriptor.name, self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            handler,
        });
        Ok(())
    }

    pub fn list_descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tools.iter().map(|tool| &tool.descriptor).collect()
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|slot| &self.tools[*slot].descriptor)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.index
            .get(name)
            .map(|slot| self.tools[*slot].handler.clone())
    }

    pub fn validate(&self, name: &str, arguments: &Value) -> ToolResult<ToolArgs> {
        let descriptor = self.descriptor(name).ok_or_else(|| {
            ToolError::new(ToolErrorKind::UnknownTool, format!("unknown tool `{name}`"))
        })?;

        let empty = Map::new();
        let provided = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            _ => return Err(ToolError::schema("arguments must be a JSON object")),
        };

        let mut unknown = provided
            .keys()
            .filter(|key| !descriptor.params.iter().any(|param| param.name == key.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if !unknown.is_empty() {
            unknown.sort();
            let allowed = descriptor
                .params
                .iter()
                .map(|param| param.name)
                .collect::<Vec<_>>();
            return Err(ToolError::new(
                ToolErrorKind::UnknownParameter,
                format!("unknown parameter(s) for `{name}`: {}", unknown.join(", ")),
            )
            .with_detail(json!({ "unknown": unknown, "allowed": allowed })));
        }

        let mut values = BTreeMap::new();
        for param in &descriptor.params {
            let raw = provided.get(param.name).filter(|value| !value.is_null());
            let coerced = match raw {
                Some(raw) => Some(param.coerce(raw)?),
                None => None,
            };
            let coerced = match coerced {
                Some(ArgValue::String(text)) if text.trim().is_empty() => None,
                other => other,
            };
            match coerced.or_else(|| param.default.clone()) {
                Some(value) => {
                    values.insert(param.name.to_owned(), value);
                }
                None if param.required => {
                    return Err(ToolError::schema(format!(
                        "missing required parameter `{}`",
                        param.name
                    )));
                }
                None => {}
            }
        }
        Ok(ToolArgs { values })
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::tools::{ToolContext, ToolOutput};

    struct Noop;

    #[async_trait]
    impl ToolHandler for Noop {
        async fn execute(&self, _ctx: &ToolContext, args: ToolArgs) -> ToolResult<ToolOutput> {
            Ok(ToolOutput::new("ok", args.to_value()))
        }
    }

    fn search_descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "search",
            description: "search things",
            params: vec![
                ParamSpec::required_string("dir", "directory"),
                ParamSpec::required_string("pattern", "pattern"),
                ParamSpec::optional_string("locale", "locale"),
                ParamSpec::flag("case_sensitive", "case", true),
                ParamSpec::integer("max_results", "limit", 50, 1),
            ],
            result: json!({ "type": "object" }),
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register(search_descriptor(), Arc::new(Noop))
            .expect("register");
        registry
    }

    #[test]
    fn missing_required_parameter_is_schema_error() {
        let err = registry()
            .validate("search", &json!({ "dir": "decoded" }))
            .expect_err("pattern missing");
        assert_eq!(err.kind, ToolErrorKind::Schema);
        assert!(err.message.contains("`pattern`"));

        let err = registry()
            .validate("search", &json!({ "dir": "decoded", "pattern": "  " }))
            .expect_err("blank pattern");
        assert_eq!(err.kind, ToolErrorKind::Schema);
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        let err = registry()
            .validate(
                "search",
                &json!({ "dir": "d", "pattern": "p", "regex": true, "depth": 2 }),
            )
            .expect_err("unknown params");
        assert_eq!(err.kind, ToolErrorKind::UnknownParameter);
        assert_eq!(
            err.detail.as_ref().and_then(|detail| detail.get("unknown")),
            Some(&json!(["depth", "regex"]))
        );
    }

    #[test]
    fn values_are_coerced_and_defaults_applied() {
        let args = registry()
            .validate(
                "search",
                &json!({
                    "dir": "decoded",
                    "pattern": 42,
                    "case_sensitive": "false",
                    "max_results": "10",
                    "locale": ""
                }),
            )
            .expect("valid");
        assert_eq!(args.string("pattern").expect("pattern"), "42");
        assert!(!args.flag("case_sensitive"));
        assert_eq!(args.integer("max_results"), Some(10));
        assert_eq!(args.opt_string("locale"), None);

        let defaults = registry()
            .validate("search", &json!({ "dir": "d", "pattern": "p" }))
            .expect("valid");
        assert!(defaults.flag("case_sensitive"));
        assert_eq!(defaults.integer("max_results"), Some(50));
    }

    #[test]
    fn type_mismatch_and_minimum_violations_fail() {
        let err = registry()
            .validate("search", &json!({ "dir": "d", "pattern": "p", "case_sensitive": "maybe" }))
            .expect_err("bad bool");
        assert_eq!(err.kind, ToolErrorKind::Schema);

        let err = registry()
            .validate("search", &json!({ "dir": "d", "pattern": "p", "max_results": 0 }))
            .expect_err("below minimum");
        assert!(err.message.contains(">= 1"));

        let err = registry()
            .validate("search", &json!(["d", "p"]))
            .expect_err("array args");
        assert_eq!(err.kind, ToolErrorKind::Schema);
    }

    #[test]
    fn unknown_tool_is_reported() {
        let err = registry()
            .validate("nope", &Value::Null)
            .expect_err("unknown tool");
        assert_eq!(err.kind, ToolErrorKind::UnknownTool);
    }

    #[test]
    fn input_schema_lists_required_and_closes_properties() {
        let schema = search_descriptor().input_schema();
        assert_eq!(schema["required"], json!(["dir", "pattern"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["max_results"]["default"], json!(50));
        assert_eq!(schema["properties"]["case_sensitive"]["type"], "boolean");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry();
        let err = registry
            .register(search_descriptor(), Arc::new(Noop))
            .expect_err("duplicate");
        assert!(err.to_string().contains("registered twice"));
        assert_eq!(registry.list_descriptors().len(), 1);
    }
}
