//! Pre-built connection indexes over an immutable blueprint.
//!
//! The engine never scans the connection list while running; every lookup goes
//! through these maps, which preserve connection registration order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Blueprint, BlueprintNode, Connection, ConnectionType};

/// Structural problems found in a blueprint document
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("blueprint has an empty id")]
    EmptyId,

    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("connection '{connection}' references unknown node '{node_id}'")]
    UnknownNode { connection: String, node_id: String },

    #[error("input pin '{node_id}.{pin_id}' has more than one incoming data connection")]
    MultipleDataSources { node_id: String, pin_id: String },

    #[error("output '{name}' references unknown node '{node_id}'")]
    UnknownOutputNode { name: String, node_id: String },

    #[error("unknown node type '{node_type}' on node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("unknown pin '{node_id}.{pin_id}' in connection '{connection}'")]
    UnknownPin {
        connection: String,
        node_id: String,
        pin_id: String,
    },

    #[error("connection '{connection}' joins incompatible pins ({source_type} -> {target_type})")]
    IncompatiblePins {
        connection: String,
        source_type: String,
        target_type: String,
    },

    #[error("data-only nodes form a cycle through '{node_id}'")]
    DataCycle { node_id: String },

    #[error("function '{function}' is invalid: {reason}")]
    InvalidFunction { function: String, reason: String },
}

impl Blueprint {
    /// Structural checks only; node types and pins are checked by the engine
    pub fn validate(&self) -> Result<(), ValidationError> {
        BlueprintGraph::new(Arc::new(self.clone())).map(|_| ())
    }
}

/// A blueprint together with its derived lookup indexes.
///
/// Built once per submitted blueprint and shared read-only between executions.
#[derive(Debug)]
pub struct BlueprintGraph {
    blueprint: Arc<Blueprint>,
    node_index: HashMap<String, usize>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
}

impl BlueprintGraph {
    /// Build indexes, rejecting structurally broken documents.
    pub fn new(blueprint: Arc<Blueprint>) -> Result<Self, ValidationError> {
        if blueprint.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }

        let mut node_index = HashMap::with_capacity(blueprint.nodes.len());
        for (i, node) in blueprint.nodes.iter().enumerate() {
            if node_index.insert(node.id.clone(), i).is_some() {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
        }

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        let mut data_targets = HashSet::new();

        for (i, conn) in blueprint.connections.iter().enumerate() {
            for node_id in [&conn.source_node_id, &conn.target_node_id] {
                if !node_index.contains_key(node_id) {
                    return Err(ValidationError::UnknownNode {
                        connection: conn.id.clone(),
                        node_id: node_id.clone(),
                    });
                }
            }

            if conn.connection_type == ConnectionType::Data
                && !data_targets.insert((conn.target_node_id.as_str(), conn.target_pin_id.as_str()))
            {
                return Err(ValidationError::MultipleDataSources {
                    node_id: conn.target_node_id.clone(),
                    pin_id: conn.target_pin_id.clone(),
                });
            }

            outgoing.entry(conn.source_node_id.clone()).or_default().push(i);
            incoming.entry(conn.target_node_id.clone()).or_default().push(i);
        }

        for output in &blueprint.outputs {
            if !node_index.contains_key(&output.node_id) {
                return Err(ValidationError::UnknownOutputNode {
                    name: output.name.clone(),
                    node_id: output.node_id.clone(),
                });
            }
        }

        Ok(Self {
            blueprint,
            node_index,
            outgoing,
            incoming,
        })
    }

    pub fn blueprint(&self) -> &Arc<Blueprint> {
        &self.blueprint
    }

    pub fn id(&self) -> &str {
        &self.blueprint.id
    }

    pub fn node(&self, id: &str) -> Option<&BlueprintNode> {
        self.node_index.get(id).map(|&i| &self.blueprint.nodes[i])
    }

    pub fn nodes(&self) -> impl Iterator<Item = &BlueprintNode> {
        self.blueprint.nodes.iter()
    }

    /// All outgoing connections of a node in registration order
    pub fn outgoing(&self, node_id: &str) -> impl Iterator<Item = &Connection> {
        self.connections_at(&self.outgoing, node_id)
    }

    /// All incoming connections of a node in registration order
    pub fn incoming(&self, node_id: &str) -> impl Iterator<Item = &Connection> {
        self.connections_at(&self.incoming, node_id)
    }

    /// Execution successors leaving a specific output pin
    pub fn exec_successors<'a>(
        &'a self,
        node_id: &str,
        pin_id: &'a str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections_at(&self.outgoing, node_id)
            .filter(move |c| c.is_execution() && c.source_pin_id == pin_id)
    }

    /// The single data connection feeding an input pin, if any
    pub fn data_source(&self, node_id: &str, pin_id: &str) -> Option<&Connection> {
        self.incoming(node_id)
            .find(|c| !c.is_execution() && c.target_pin_id == pin_id)
    }

    /// Whether any execution connection arrives at this node
    pub fn has_incoming_exec(&self, node_id: &str) -> bool {
        self.incoming(node_id).any(Connection::is_execution)
    }

    fn connections_at<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        node_id: &str,
    ) -> impl Iterator<Item = &'a Connection> + 'a {
        index
            .get(node_id)
            .map(|v| v.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|&i| &self.blueprint.connections[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlueprintNode, Connection};

    fn sample() -> Blueprint {
        Blueprint::new("bp", "Sample")
            .with_node(BlueprintNode::new("a", "number-constant"))
            .with_node(BlueprintNode::new("b", "print"))
            .with_node(BlueprintNode::new("c", "print"))
            .with_connection(Connection::execution("b", "then", "c", "exec"))
            .with_connection(Connection::data("a", "value", "b", "message"))
            .with_connection(Connection::data("a", "value", "c", "message"))
    }

    #[test]
    fn test_indexes_preserve_order() {
        let graph = BlueprintGraph::new(Arc::new(sample())).unwrap();
        let targets: Vec<_> = graph
            .outgoing("a")
            .map(|c| c.target_node_id.as_str())
            .collect();
        assert_eq!(targets, vec!["b", "c"]);
        assert!(graph.has_incoming_exec("c"));
        assert!(!graph.has_incoming_exec("b"));
        assert_eq!(graph.exec_successors("b", "then").count(), 1);
        assert_eq!(
            graph.data_source("c", "message").map(|c| c.source_node_id.as_str()),
            Some("a")
        );
        assert!(graph.outgoing("missing").next().is_none());
    }

    #[test]
    fn test_blueprint_validate() {
        assert!(sample().validate().is_ok());
        let empty = Blueprint::new("", "Nameless");
        assert_eq!(empty.validate(), Err(ValidationError::EmptyId));
    }

    #[test]
    fn test_rejects_duplicate_nodes() {
        let bp = sample().with_node(BlueprintNode::new("a", "print"));
        assert_eq!(
            BlueprintGraph::new(Arc::new(bp)).unwrap_err(),
            ValidationError::DuplicateNode("a".into())
        );
    }

    #[test]
    fn test_rejects_dangling_connection() {
        let bp = sample().with_connection(Connection::execution("b", "then", "zzz", "exec"));
        assert!(matches!(
            BlueprintGraph::new(Arc::new(bp)),
            Err(ValidationError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_rejects_second_data_source() {
        let bp = sample()
            .with_node(BlueprintNode::new("d", "string-constant"))
            .with_connection(Connection::data("d", "value", "b", "message"));
        assert!(matches!(
            BlueprintGraph::new(Arc::new(bp)),
            Err(ValidationError::MultipleDataSources { .. })
        ));
    }
}
