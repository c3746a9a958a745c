// Validation - Structural and type checks before a blueprint runs

use std::collections::HashMap;
use std::sync::Arc;

use blueprint_types::{Blueprint, BlueprintGraph, FunctionDef, Pin, ValidationError};

use crate::functions::configure_function_io;

use super::Engine;

/// Declared pins of one node instance
struct NodePins {
    inputs: Vec<Pin>,
    outputs: Vec<Pin>,
    pure: bool,
}

impl Engine {
    /// Check a blueprint against the registry without running it
    pub fn validate(&self, blueprint: &Blueprint) -> Result<(), ValidationError> {
        let functions = function_table(blueprint);
        self.validate_with(&Arc::new(blueprint.clone()), &functions)
            .map(|_| ())
    }

    pub(crate) fn validate_with(
        &self,
        blueprint: &Arc<Blueprint>,
        functions: &HashMap<String, Arc<FunctionDef>>,
    ) -> Result<BlueprintGraph, ValidationError> {
        let graph = BlueprintGraph::new(Arc::clone(blueprint))?;
        self.check_graph(&graph, functions, None)?;

        for function in &blueprint.functions {
            let invalid = |err: ValidationError| ValidationError::InvalidFunction {
                function: function.id.clone(),
                reason: err.to_string(),
            };
            let child = BlueprintGraph::new(Arc::new(Blueprint::from_function(&blueprint.id, function)))
                .map_err(invalid)?;
            self.check_graph(&child, functions, Some(function))
                .map_err(invalid)?;
        }
        Ok(graph)
    }

    fn check_graph(
        &self,
        graph: &BlueprintGraph,
        functions: &HashMap<String, Arc<FunctionDef>>,
        function: Option<&FunctionDef>,
    ) -> Result<(), ValidationError> {
        let mut pins: HashMap<&str, NodePins> = HashMap::new();
        for node in graph.nodes() {
            let Some(mut instance) = self.create_node(&node.node_type, functions) else {
                return Err(ValidationError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                });
            };
            if let Some(function) = function {
                configure_function_io(instance.as_mut(), function);
            }
            pins.insert(
                node.id.as_str(),
                NodePins {
                    inputs: instance.input_pins().to_vec(),
                    outputs: instance.output_pins().to_vec(),
                    pure: !instance.base().has_exec_pins(),
                },
            );
        }

        for conn in &graph.blueprint().connections {
            let unknown = |node_id: &str, pin_id: &str| ValidationError::UnknownPin {
                connection: conn.id.clone(),
                node_id: node_id.to_string(),
                pin_id: pin_id.to_string(),
            };
            let source = pins
                .get(conn.source_node_id.as_str())
                .and_then(|p| p.outputs.iter().find(|pin| pin.id == conn.source_pin_id))
                .ok_or_else(|| unknown(&conn.source_node_id, &conn.source_pin_id))?;
            let target = pins
                .get(conn.target_node_id.as_str())
                .and_then(|p| p.inputs.iter().find(|pin| pin.id == conn.target_pin_id))
                .ok_or_else(|| unknown(&conn.target_node_id, &conn.target_pin_id))?;

            let kinds_match = source.is_exec() == conn.is_execution() && target.is_exec() == conn.is_execution();
            if !kinds_match || !target.pin_type.is_compatible_with(&source.pin_type) {
                return Err(ValidationError::IncompatiblePins {
                    connection: conn.id.clone(),
                    source_type: source.pin_type.to_string(),
                    target_type: target.pin_type.to_string(),
                });
            }
        }

        check_data_cycles(graph, &pins)
    }
}

pub(crate) fn function_table(blueprint: &Blueprint) -> HashMap<String, Arc<FunctionDef>> {
    blueprint
        .functions
        .iter()
        .map(|f| (f.id.clone(), Arc::new(f.clone())))
        .collect()
}

/// Data edges between data-only nodes must form a DAG
fn check_data_cycles(graph: &BlueprintGraph, pins: &HashMap<&str, NodePins>) -> Result<(), ValidationError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'g>(
        graph: &'g BlueprintGraph,
        pins: &HashMap<&str, NodePins>,
        node_id: &'g str,
        marks: &mut HashMap<&'g str, Mark>,
    ) -> Result<(), ValidationError> {
        match marks.get(node_id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                return Err(ValidationError::DataCycle {
                    node_id: node_id.to_string(),
                });
            }
            None => {}
        }
        marks.insert(node_id, Mark::Visiting);
        for conn in graph.outgoing(node_id).filter(|c| !c.is_execution()) {
            let target = conn.target_node_id.as_str();
            if pins.get(target).is_some_and(|p| p.pure) {
                visit(graph, pins, target, marks)?;
            }
        }
        marks.insert(node_id, Mark::Done);
        Ok(())
    }

    let mut marks = HashMap::new();
    for node in graph.nodes() {
        if pins.get(node.id.as_str()).is_some_and(|p| p.pure) {
            visit(graph, pins, node.id.as_str(), &mut marks)?;
        }
    }
    Ok(())
}
