// Node - The contract every blueprint node implements
//
// Nodes are created per activation by a registered factory. They declare their
// pins through a shared BaseNode and do their work in `execute`, talking to the
// engine only through the ExecutionContext.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use blueprint_types::{Pin, Value};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::sandbox::Capability;

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Static description of a node type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeMetadata {
    /// Registered type id (kebab-case)
    pub type_id: String,
    /// Display name
    pub name: String,
    /// Category for the palette
    pub category: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Pure nodes have no execution pins and are evaluated on demand
    pub pure: bool,
    /// Sensitive operations this node performs
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<Capability>,
}

impl NodeMetadata {
    pub fn new(type_id: &str, name: &str, category: &str) -> Self {
        Self {
            type_id: type_id.to_string(),
            name: name.to_string(),
            category: category.to_string(),
            description: String::new(),
            pure: false,
            capabilities: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    pub fn capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Base Node
// ─────────────────────────────────────────────────────────────────────────────

/// Shared storage for metadata, pins and properties
#[derive(Debug, Clone)]
pub struct BaseNode {
    pub metadata: NodeMetadata,
    pub inputs: Vec<Pin>,
    pub outputs: Vec<Pin>,
    pub properties: BTreeMap<String, Value>,
}

impl BaseNode {
    pub fn new(metadata: NodeMetadata) -> Self {
        Self {
            metadata,
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn input(mut self, pin: Pin) -> Self {
        self.inputs.push(pin);
        self
    }

    pub fn output(mut self, pin: Pin) -> Self {
        self.outputs.push(pin);
        self
    }

    /// Default property value
    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn get_input_pin(&self, id: &str) -> Option<&Pin> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn get_output_pin(&self, id: &str) -> Option<&Pin> {
        self.outputs.iter().find(|p| p.id == id)
    }

    pub fn has_exec_pins(&self) -> bool {
        self.inputs.iter().chain(&self.outputs).any(Pin::is_exec)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A blueprint node.
///
/// `execute` either activates exactly one execution output through the context
/// or returns without activation (pure data nodes). Returning an error aborts
/// the current path; the engine decides whether it can be recovered or routed
/// to the node's `error`/`catch` output.
#[async_trait]
pub trait Node: Send + Sync {
    fn base(&self) -> &BaseNode;

    fn base_mut(&mut self) -> &mut BaseNode;

    fn metadata(&self) -> &NodeMetadata {
        &self.base().metadata
    }

    fn input_pins(&self) -> &[Pin] {
        &self.base().inputs
    }

    fn output_pins(&self) -> &[Pin] {
        &self.base().outputs
    }

    fn properties(&self) -> &BTreeMap<String, Value> {
        &self.base().properties
    }

    fn set_property(&mut self, name: &str, value: Value) {
        self.base_mut().properties.insert(name.to_string(), value);
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()>;
}

/// Creates a fresh node instance
pub type NodeFactory = Arc<dyn Fn() -> Box<dyn Node> + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Function-backed nodes
// ─────────────────────────────────────────────────────────────────────────────

/// Node whose behaviour is a plain synchronous function (for simple nodes)
pub struct FnNode<F>
where
    F: Fn(&mut ExecutionContext<'_>) -> Result<()> + Send + Sync,
{
    base: BaseNode,
    func: Arc<F>,
}

impl<F> FnNode<F>
where
    F: Fn(&mut ExecutionContext<'_>) -> Result<()> + Send + Sync,
{
    pub fn new(base: BaseNode, func: Arc<F>) -> Self {
        Self { base, func }
    }
}

#[async_trait]
impl<F> Node for FnNode<F>
where
    F: Fn(&mut ExecutionContext<'_>) -> Result<()> + Send + Sync,
{
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_types::PinType;

    #[test]
    fn test_base_node_builder() {
        let base = BaseNode::new(NodeMetadata::new("add", "Add", "Math"))
            .input(Pin::exec("exec"))
            .input(Pin::data_with_default("a", PinType::Number, 0))
            .output(Pin::exec("then"))
            .output(Pin::data("result", PinType::Number))
            .property("precision", 2);

        assert!(base.has_exec_pins());
        assert_eq!(base.get_input_pin("a").map(|p| p.pin_type), Some(PinType::Number));
        assert!(base.get_output_pin("missing").is_none());
        assert_eq!(base.properties.get("precision"), Some(&Value::from(2)));
    }

    #[test]
    fn test_metadata_builder() {
        let meta = NodeMetadata::new("http-get", "HTTP Get", "Network")
            .description("Fetch a URL")
            .capability(Capability::Network);
        assert!(!meta.pure);
        assert_eq!(meta.capabilities, vec![Capability::Network]);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["capabilities"][0], "network");
    }
}
