// Node Registry - Maps node type ids to factories
//
// The registry holds all available node types. It is built at startup and
// shared read-only (Arc) by every execution afterwards. Each entry keeps the
// definition captured from a prototype instance so callers can list pins and
// categories without creating nodes.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use blueprint_types::Pin;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::node::{BaseNode, FnNode, Node, NodeFactory, NodeMetadata};

/// Pins and metadata of a registered node type
#[derive(Debug, Clone, Serialize)]
pub struct NodeDefinition {
    #[serde(flatten)]
    pub metadata: NodeMetadata,
    pub inputs: Vec<Pin>,
    pub outputs: Vec<Pin>,
}

impl NodeDefinition {
    fn from_node(node: &dyn Node) -> Self {
        Self {
            metadata: node.metadata().clone(),
            inputs: node.input_pins().to_vec(),
            outputs: node.output_pins().to_vec(),
        }
    }

    pub fn get_input(&self, id: &str) -> Option<&Pin> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn get_output(&self, id: &str) -> Option<&Pin> {
        self.outputs.iter().find(|p| p.id == id)
    }

    pub fn has_exec_pins(&self) -> bool {
        self.inputs.iter().chain(&self.outputs).any(Pin::is_exec)
    }
}

/// Entry in the node registry
struct NodeEntry {
    definition: NodeDefinition,
    factory: NodeFactory,
}

/// Registry of all available node types
pub struct NodeRegistry {
    nodes: HashMap<String, NodeEntry>,
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in node catalog
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::nodes::register_builtins(&mut registry);
        registry
    }

    /// Register a node type by factory. The type id comes from the node's metadata.
    pub fn register<F>(&mut self, factory: F)
    where
        F: Fn() -> Box<dyn Node> + Send + Sync + 'static,
    {
        let prototype = factory();
        let definition = NodeDefinition::from_node(prototype.as_ref());
        let id = definition.metadata.type_id.clone();
        self.nodes.insert(
            id,
            NodeEntry {
                definition,
                factory: Arc::new(factory),
            },
        );
    }

    /// Register a node backed by a sync function
    pub fn register_fn<F>(&mut self, base: BaseNode, func: F)
    where
        F: Fn(&mut ExecutionContext<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        self.register(move || -> Box<dyn Node> {
            Box::new(FnNode::new(base.clone(), Arc::clone(&func)))
        });
    }

    /// Create a fresh instance of a node type
    pub fn create(&self, id: &str) -> Option<Box<dyn Node>> {
        self.nodes.get(id).map(|e| (e.factory)())
    }

    /// Get a node definition by ID
    pub fn get_definition(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(id).map(|e| &e.definition)
    }

    /// Get all registered node IDs
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    /// Get all node definitions, sorted by type id
    pub fn definitions(&self) -> Vec<&NodeDefinition> {
        let mut defs: Vec<_> = self.nodes.values().map(|e| &e.definition).collect();
        defs.sort_by(|a, b| a.metadata.type_id.cmp(&b.metadata.type_id));
        defs
    }

    /// Get nodes by category
    pub fn nodes_in_category(&self, category: &str) -> Vec<&NodeDefinition> {
        self.definitions()
            .into_iter()
            .filter(|d| d.metadata.category == category)
            .collect()
    }

    /// Get all categories
    pub fn categories(&self) -> Vec<String> {
        let mut cats: Vec<_> = self
            .nodes
            .values()
            .map(|e| e.definition.metadata.category.clone())
            .collect();
        cats.sort();
        cats.dedup();
        cats
    }

    /// Check if a node is registered
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Get node count
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_types::PinType;

    fn noop_base(id: &str, category: &str) -> BaseNode {
        BaseNode::new(NodeMetadata::new(id, id, category).pure())
            .output(Pin::data("out", PinType::Any))
    }

    #[test]
    fn test_empty_registry() {
        let registry = NodeRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.create("anything").is_none());
    }

    #[test]
    fn test_register_fn_node() {
        let mut registry = NodeRegistry::new();
        registry.register_fn(noop_base("test-node", "Test"), |_ctx| Ok(()));

        assert!(registry.contains("test-node"));
        assert_eq!(registry.len(), 1);

        let def = registry.get_definition("test-node").unwrap();
        assert!(def.metadata.pure);
        assert!(def.get_output("out").is_some());
        assert!(!def.has_exec_pins());

        let node = registry.create("test-node").unwrap();
        assert_eq!(node.metadata().type_id, "test-node");
    }

    #[test]
    fn test_instances_are_independent() {
        let mut registry = NodeRegistry::new();
        registry.register_fn(noop_base("test-node", "Test"), |_ctx| Ok(()));

        let mut a = registry.create("test-node").unwrap();
        a.set_property("x", 1.into());
        let b = registry.create("test-node").unwrap();
        assert!(b.properties().get("x").is_none());
    }

    #[test]
    fn test_categories() {
        let mut registry = NodeRegistry::new();
        registry.register_fn(noop_base("add", "Math"), |_ctx| Ok(()));
        registry.register_fn(noop_base("and", "Logic"), |_ctx| Ok(()));
        registry.register_fn(noop_base("sub", "Math"), |_ctx| Ok(()));

        assert_eq!(registry.categories(), vec!["Logic", "Math"]);
        let math: Vec<_> = registry
            .nodes_in_category("Math")
            .iter()
            .map(|d| d.metadata.type_id.as_str())
            .collect();
        assert_eq!(math, vec!["add", "sub"]);
    }

    #[test]
    fn test_builtins_registered() {
        let registry = NodeRegistry::with_builtins();
        for id in [
            "number-constant",
            "add",
            "branch",
            "sequence",
            "loop",
            "safe-divide",
            "array-ops",
            "set-variable",
            "get-variable",
        ] {
            assert!(registry.contains(id), "missing builtin {}", id);
        }
    }
}
