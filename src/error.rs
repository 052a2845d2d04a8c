use std::fmt;

use serde_json::{json, Value};

use crate::protocol::{INTERNAL_ERROR, INVALID_PARAMS, RESOURCE_NOT_FOUND};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    Schema,
    UnknownParameter,
    UnknownTool,
    DuplicateCall,
    PathEscape,
    ExternalTool,
    TimedOut,
    NotFound,
    UnsupportedResource,
    Io,
    Internal,
}

impl ToolErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema_error",
            Self::UnknownParameter => "unknown_parameter",
            Self::UnknownTool => "unknown_tool",
            Self::DuplicateCall => "duplicate_call",
            Self::PathEscape => "path_escape",
            Self::ExternalTool => "external_tool_error",
            Self::TimedOut => "timed_out",
            Self::NotFound => "not_found",
            Self::UnsupportedResource => "unsupported_resource",
            Self::Io => "io_error",
            Self::Internal => "internal_error",
        }
    }

    /// JSON-RPC error code used when the failure surfaces as a protocol error
    /// (resources and prompts) rather than as a tool result.
    pub fn rpc_code(self) -> i64 {
        match self {
            Self::NotFound => RESOURCE_NOT_FOUND,
            Self::Schema
            | Self::UnknownParameter
            | Self::UnknownTool
            | Self::DuplicateCall
            | Self::PathEscape
            | Self::UnsupportedResource => INVALID_PARAMS,
            Self::ExternalTool | Self::TimedOut | Self::Io | Self::Internal => INTERNAL_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
    pub detail: Option<Value>,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Schema, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFound, message)
    }

    pub fn io(context: impl fmt::Display, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::not_found(format!("{context}: {err}"));
        }
        Self::new(ToolErrorKind::Io, format!("{context}: {err}"))
    }

    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "kind": self.kind.as_str(),
            "message": self.message,
        });
        if let Some(detail) = &self.detail {
            value["detail"] = detail.clone();
        }
        value
    }
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for ToolError {}

pub type ToolResult<T> = Result<T, ToolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_not_found_kind() {
        let err = ToolError::io(
            "reading manifest",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert_eq!(err.kind, ToolErrorKind::NotFound);
        assert!(err.message.starts_with("reading manifest"));
    }

    #[test]
    fn error_value_carries_detail_when_present() {
        let err = ToolError::new(ToolErrorKind::ExternalTool, "apktool exited with 1")
            .with_detail(json!({ "stderr": "boom" }));
        let value = err.to_value();
        assert_eq!(value["kind"], "external_tool_error");
        assert_eq!(value["detail"]["stderr"], "boom");
        assert_eq!(err.to_string(), "external_tool_error: apktool exited with 1");
    }
}
