// Error - Typed runtime errors raised by nodes, the scheduler and the sandbox
//
// Every error carries a kind, a stable snake_case code, a message, the node that
// raised it and a free-form details bag consulted by the recovery policy.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use blueprint_types::{Value, ValueConversionError};

/// Result type used throughout the runtime
pub type Result<T, E = BlueprintError> = std::result::Result<T, E>;

// ─────────────────────────────────────────────────────────────────────────────
// Kinds and Codes
// ─────────────────────────────────────────────────────────────────────────────

/// Error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Missing or invalid input, type mismatch
    Validation,
    /// Node-raised failures, domain errors, scheduler faults
    Execution,
    /// Remote I/O, timeouts
    Connection,
    /// Limit exceeded
    Resource,
    /// Permission denied, rate limited
    Security,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::Execution => "Execution",
            ErrorKind::Connection => "Connection",
            ErrorKind::Resource => "Resource",
            ErrorKind::Security => "Security",
        };
        f.write_str(name)
    }
}

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Validation
    MissingRequiredInput,
    TypeMismatch,
    InvalidInput,
    InvalidBlueprint,
    UnknownNodeType,
    // Execution
    NodeExecutionFailed,
    DivisionByZero,
    MultipleActivation,
    DoubleSignal,
    DataCycle,
    LoopNotSupported,
    FunctionFailed,
    Cancelled,
    // Connection
    Timeout,
    ConnectionFailed,
    // Resource
    ExecutionTimeExceeded,
    MemoryLimitExceeded,
    DiskLimitExceeded,
    NetworkLimitExceeded,
    NodeLimitExceeded,
    // Security
    PermissionDenied,
    RateLimited,
    InjectionDetected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingRequiredInput => "missing_required_input",
            ErrorCode::TypeMismatch => "type_mismatch",
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::InvalidBlueprint => "invalid_blueprint",
            ErrorCode::UnknownNodeType => "unknown_node_type",
            ErrorCode::NodeExecutionFailed => "node_execution_failed",
            ErrorCode::DivisionByZero => "division_by_zero",
            ErrorCode::MultipleActivation => "multiple_activation",
            ErrorCode::DoubleSignal => "double_signal",
            ErrorCode::DataCycle => "data_cycle",
            ErrorCode::LoopNotSupported => "loop_not_supported",
            ErrorCode::FunctionFailed => "function_failed",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Timeout => "timeout",
            ErrorCode::ConnectionFailed => "connection_failed",
            ErrorCode::ExecutionTimeExceeded => "execution_time_exceeded",
            ErrorCode::MemoryLimitExceeded => "memory_limit_exceeded",
            ErrorCode::DiskLimitExceeded => "disk_limit_exceeded",
            ErrorCode::NetworkLimitExceeded => "network_limit_exceeded",
            ErrorCode::NodeLimitExceeded => "node_limit_exceeded",
            ErrorCode::PermissionDenied => "permission_denied",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::InjectionDetected => "injection_detected",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Blueprint Error
// ─────────────────────────────────────────────────────────────────────────────

/// A typed runtime error
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{kind}/{code}: {message}")]
pub struct BlueprintError {
    pub kind: ErrorKind,
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
    /// Rendered underlying cause
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Already recorded and routed by the scheduler; set while it unwinds nested frames
    #[serde(skip)]
    pub(crate) handled: bool,
}

impl BlueprintError {
    pub fn new(kind: ErrorKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            node_id: None,
            details: BTreeMap::new(),
            cause: None,
            handled: false,
        }
    }

    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    pub fn execution(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, code, message)
    }

    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, code, message)
    }

    pub fn resource(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, code, message)
    }

    pub fn security(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, code, message)
    }

    /// Generic node failure
    pub fn node_failed(message: impl Into<String>) -> Self {
        Self::execution(ErrorCode::NodeExecutionFailed, message)
    }

    /// Required input pin had no value
    pub fn missing_input(pin_id: &str) -> Self {
        Self::validation(
            ErrorCode::MissingRequiredInput,
            format!("missing required input '{}'", pin_id),
        )
        .with_detail("pin", pin_id)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::security(ErrorCode::PermissionDenied, message)
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    /// Attach the node id only if none is set yet
    pub fn or_node(mut self, node_id: &str) -> Self {
        if self.node_id.is_none() {
            self.node_id = Some(node_id.to_string());
        }
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub(crate) fn into_handled(mut self) -> Self {
        self.handled = true;
        self
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Resource and security violations are never recovered
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Resource | ErrorKind::Security)
    }

    /// Error object written to a node's `error` output pin
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("kind".to_string(), Value::from(self.kind.to_string()));
        map.insert("code".to_string(), Value::from(self.code.as_str()));
        map.insert("message".to_string(), Value::from(self.message.clone()));
        if let Some(node_id) = &self.node_id {
            map.insert("nodeId".to_string(), Value::from(node_id.clone()));
        }
        if !self.details.is_empty() {
            map.insert("details".to_string(), Value::Object(self.details.clone()));
        }
        Value::Object(map)
    }
}

impl From<ValueConversionError> for BlueprintError {
    fn from(err: ValueConversionError) -> Self {
        BlueprintError::validation(ErrorCode::TypeMismatch, err.to_string()).with_cause(err)
    }
}

/// Invalid configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_codes() {
        let err = BlueprintError::execution(ErrorCode::DivisionByZero, "divide by zero")
            .with_node("div1");
        assert_eq!(err.to_string(), "Execution/division_by_zero: divide by zero");
        assert_eq!(err.node_id.as_deref(), Some("div1"));
        assert!(!err.is_fatal());
        assert!(BlueprintError::security(ErrorCode::RateLimited, "slow down").is_fatal());
    }

    #[test]
    fn test_error_serializes_snake_case_code() {
        let err = BlueprintError::missing_input("value");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "missing_required_input");
        assert_eq!(json["kind"], "Validation");
        assert_eq!(json["details"]["pin"], "value");
    }

    #[test]
    fn test_conversion_error_maps_to_type_mismatch() {
        let err: BlueprintError = Value::from("abc").as_number().unwrap_err().into();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.code, ErrorCode::TypeMismatch);
        assert!(err.cause.is_some());
    }

    #[test]
    fn test_error_to_value() {
        let err = BlueprintError::node_failed("boom").with_node("n1");
        let value = err.to_value();
        assert_eq!(value.get("code"), Some(&Value::from("node_execution_failed")));
        assert_eq!(value.get("nodeId"), Some(&Value::from("n1")));
    }
}
