// Blueprint Types - Core data structures for the visual scripting system
//
// These types define the structure of blueprints, nodes, pins, and connections.
// Blueprints are stored as JSON documents and consumed read-only by the engine.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueConversionError};

// ─────────────────────────────────────────────────────────────────────────────
// Pin Types
// ─────────────────────────────────────────────────────────────────────────────

/// Data types that can flow through pins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinType {
    /// Execution flow (no data, just control flow)
    Execution,
    String,
    Number,
    Boolean,
    Object,
    Array,
    /// Accepts and forwards the raw value
    Any,
}

impl PinType {
    /// Stable identifier used in blueprint documents
    pub fn id(&self) -> &'static str {
        match self {
            PinType::Execution => "execution",
            PinType::String => "string",
            PinType::Number => "number",
            PinType::Boolean => "boolean",
            PinType::Object => "object",
            PinType::Array => "array",
            PinType::Any => "any",
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            PinType::Execution => "Execution",
            PinType::String => "String",
            PinType::Number => "Number",
            PinType::Boolean => "Boolean",
            PinType::Object => "Object",
            PinType::Array => "Array",
            PinType::Any => "Any",
        }
    }

    /// Check if this is an execution pin type
    pub fn is_exec(&self) -> bool {
        matches!(self, PinType::Execution)
    }

    /// Check if this is a data pin type
    pub fn is_data(&self) -> bool {
        !self.is_exec()
    }

    /// Check if a value of type `other` can be wired into a pin of this type
    pub fn is_compatible_with(&self, other: &PinType) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (PinType::Execution, _) | (_, PinType::Execution) => false,
            (PinType::Any, _) | (_, PinType::Any) => true,
            // Scalars coerce into each other where safe
            (PinType::String, PinType::Number | PinType::Boolean) => true,
            (PinType::Number | PinType::Boolean, PinType::String) => true,
            (PinType::Boolean, PinType::Number) | (PinType::Number, PinType::Boolean) => true,
            (PinType::Array, PinType::Object) | (PinType::Object, PinType::Array) => true,
            _ => false,
        }
    }

    /// Validate and coerce a value for this pin type.
    ///
    /// `Any` forwards the raw value; every other data type coerces where safe.
    pub fn coerce(&self, value: &Value) -> Result<Value, ValueConversionError> {
        match self {
            PinType::Any => Ok(value.clone()),
            PinType::Execution => Err(ValueConversionError::TypeMismatch {
                expected: "data",
                actual: "execution",
            }),
            PinType::String => value.as_string().map(Value::String),
            PinType::Number => match value {
                Value::Int(_) => Ok(value.clone()),
                _ => value.as_number().map(Value::Float),
            },
            PinType::Boolean => value.as_boolean().map(Value::Bool),
            PinType::Object => value.as_object().map(Value::Object),
            PinType::Array => value.as_array().map(Value::Array),
        }
    }
}

impl std::fmt::Display for PinType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pin Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Definition of a pin declared by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    /// Stable pin id (used in connections)
    pub id: String,
    /// Display name
    pub name: String,
    /// Data type of the pin
    #[serde(rename = "type")]
    pub pin_type: PinType,
    /// Whether the pin may be left unconnected without error
    #[serde(default)]
    pub optional: bool,
    /// Default literal used when nothing is connected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Pin {
    fn new(id: &str, pin_type: PinType) -> Self {
        Self {
            id: id.to_string(),
            name: display_name(id),
            pin_type,
            optional: false,
            default: None,
        }
    }

    /// Create an execution pin (input or output, direction comes from the slice it lives in)
    pub fn exec(id: &str) -> Self {
        Self::new(id, PinType::Execution)
    }

    /// Create a data pin
    pub fn data(id: &str, pin_type: PinType) -> Self {
        Self::new(id, pin_type)
    }

    /// Create a data pin with a default literal
    pub fn data_with_default(id: &str, pin_type: PinType, default: impl Into<Value>) -> Self {
        Self {
            default: Some(default.into()),
            ..Self::new(id, pin_type)
        }
    }

    /// Mark the pin optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Override the display name
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn is_exec(&self) -> bool {
        self.pin_type.is_exec()
    }

    /// Whether a missing or unconvertible value on this pin can be recovered
    pub fn is_recoverable(&self) -> bool {
        self.optional || self.default.is_some()
    }
}

fn display_name(id: &str) -> String {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connections
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a connection: control flow or data flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Execution,
    Data,
}

/// A directed edge between two pins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sourceNodeID", alias = "source_node_id")]
    pub source_node_id: String,
    #[serde(rename = "sourcePinID", alias = "source_pin_id")]
    pub source_pin_id: String,
    #[serde(rename = "targetNodeID", alias = "target_node_id")]
    pub target_node_id: String,
    #[serde(rename = "targetPinID", alias = "target_pin_id")]
    pub target_pin_id: String,
    #[serde(rename = "connectionType", alias = "connection_type")]
    pub connection_type: ConnectionType,
}

impl Connection {
    fn new(
        connection_type: ConnectionType,
        from_node: &str,
        from_pin: &str,
        to_node: &str,
        to_pin: &str,
    ) -> Self {
        Self {
            id: format!("{}.{}->{}.{}", from_node, from_pin, to_node, to_pin),
            source_node_id: from_node.to_string(),
            source_pin_id: from_pin.to_string(),
            target_node_id: to_node.to_string(),
            target_pin_id: to_pin.to_string(),
            connection_type,
        }
    }

    /// Create an execution connection
    pub fn execution(from_node: &str, from_pin: &str, to_node: &str, to_pin: &str) -> Self {
        Self::new(ConnectionType::Execution, from_node, from_pin, to_node, to_pin)
    }

    /// Create a data connection
    pub fn data(from_node: &str, from_pin: &str, to_node: &str, to_pin: &str) -> Self {
        Self::new(ConnectionType::Data, from_node, from_pin, to_node, to_pin)
    }

    pub fn is_execution(&self) -> bool {
        self.connection_type == ConnectionType::Execution
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Blueprint Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Variable declaration within a blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDef {
    pub name: String,
    #[serde(rename = "type", default = "default_variable_type")]
    pub var_type: PinType,
    #[serde(default, alias = "default", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

fn default_variable_type() -> PinType {
    PinType::Any
}

/// Position in the visual editor (for UI purposes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

/// A node instance within a blueprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintNode {
    /// Unique instance ID within this blueprint
    pub id: String,
    /// Registered node type id (kebab-case), or a declared function id
    #[serde(rename = "type")]
    pub node_type: String,
    /// Node-specific properties
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    /// Position in the visual editor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl BlueprintNode {
    pub fn new(id: &str, node_type: &str) -> Self {
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            properties: BTreeMap::new(),
            position: None,
        }
    }

    /// Builder-style property setter
    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }
}

/// A pin whose final value is reported as a blueprint output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintOutput {
    /// Name under which the value appears in the result
    pub name: String,
    #[serde(rename = "nodeID", alias = "node_id")]
    pub node_id: String,
    #[serde(rename = "pinID", alias = "pin_id")]
    pub pin_id: String,
}

/// A function parameter (input or output of a function)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParam {
    pub name: String,
    #[serde(rename = "type", default = "default_variable_type")]
    pub param_type: PinType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A mini-blueprint exposed as a callable node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Input parameters (become output pins on the function-input node)
    #[serde(default)]
    pub inputs: Vec<FunctionParam>,
    /// Output values (become input pins on the function-output node)
    #[serde(default)]
    pub outputs: Vec<FunctionParam>,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    #[serde(default)]
    pub nodes: Vec<BlueprintNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Complete blueprint definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blueprint {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    #[serde(default)]
    pub nodes: Vec<BlueprintNode>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDef>,
    /// Pins reported in the execution result
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<BlueprintOutput>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl Blueprint {
    /// Create a new empty blueprint
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: default_version(),
            variables: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
            functions: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Get a node by ID
    pub fn get_node(&self, id: &str) -> Option<&BlueprintNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Get a function by ID
    pub fn get_function(&self, id: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.id == id)
    }

    /// Initial variable values from declarations
    pub fn variable_defaults(&self) -> HashMap<String, Value> {
        self.variables
            .iter()
            .map(|v| (v.name.clone(), v.default_value.clone().unwrap_or_default()))
            .collect()
    }

    /// View a function as a standalone blueprint so it can run as a child execution
    pub fn from_function(parent_id: &str, function: &FunctionDef) -> Self {
        Self {
            id: format!("{}::{}", parent_id, function.id),
            name: if function.name.is_empty() {
                function.id.clone()
            } else {
                function.name.clone()
            },
            version: default_version(),
            variables: function.variables.clone(),
            nodes: function.nodes.clone(),
            connections: function.connections.clone(),
            functions: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Builder helpers used by tests and programmatic construction
    pub fn with_node(mut self, node: BlueprintNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn with_variable(mut self, name: &str, default: impl Into<Value>) -> Self {
        self.variables.push(VariableDef {
            name: name.to_string(),
            var_type: PinType::Any,
            default_value: Some(default.into()),
        });
        self
    }

    pub fn with_output(mut self, name: &str, node_id: &str, pin_id: &str) -> Self {
        self.outputs.push(BlueprintOutput {
            name: name.to_string(),
            node_id: node_id.to_string(),
            pin_id: pin_id.to_string(),
        });
        self
    }

    pub fn with_function(mut self, function: FunctionDef) -> Self {
        self.functions.push(function);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_type_compatibility() {
        assert!(PinType::Number.is_compatible_with(&PinType::Number));
        assert!(PinType::String.is_compatible_with(&PinType::Number));
        assert!(PinType::Any.is_compatible_with(&PinType::Object));
        assert!(!PinType::Execution.is_compatible_with(&PinType::Any));
        assert!(!PinType::Object.is_compatible_with(&PinType::Boolean));
    }

    #[test]
    fn test_pin_type_coerce() {
        assert_eq!(
            PinType::String.coerce(&Value::Int(3)),
            Ok(Value::from("3"))
        );
        assert_eq!(PinType::Number.coerce(&Value::from("2")), Ok(Value::Float(2.0)));
        assert!(PinType::Number.coerce(&Value::from("x")).is_err());
        assert_eq!(PinType::Any.coerce(&Value::Null), Ok(Value::Null));
    }

    #[test]
    fn test_pin_builders() {
        let pin = Pin::data_with_default("startValue", PinType::Number, 0).optional();
        assert_eq!(pin.name, "StartValue");
        assert!(pin.optional);
        assert!(pin.is_recoverable());
        assert!(Pin::exec("exec").is_exec());
    }

    #[test]
    fn test_blueprint_json_roundtrip() {
        let json = r#"{
            "id": "test-bp",
            "name": "Test Blueprint",
            "variables": [{"name": "count", "type": "number", "defaultValue": 1}],
            "nodes": [
                {"id": "n1", "type": "branch", "properties": {"case1": 8}},
                {"id": "n2", "type": "print"}
            ],
            "connections": [
                {"id": "c1", "sourceNodeID": "n1", "sourcePinID": "case1_out",
                 "targetNodeID": "n2", "targetPinID": "exec", "connectionType": "execution"}
            ]
        }"#;

        let bp: Blueprint = serde_json::from_str(json).unwrap();
        assert_eq!(bp.id, "test-bp");
        assert_eq!(bp.nodes.len(), 2);
        assert_eq!(bp.nodes[0].properties.get("case1"), Some(&Value::Int(8)));
        assert!(bp.connections[0].is_execution());
        assert_eq!(bp.variable_defaults().get("count"), Some(&Value::Int(1)));

        let json2 = serde_json::to_string(&bp).unwrap();
        let bp2: Blueprint = serde_json::from_str(&json2).unwrap();
        assert_eq!(bp, bp2);
    }
}
