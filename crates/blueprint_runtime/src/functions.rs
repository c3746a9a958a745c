// Functions - Declared mini-blueprints callable as nodes
//
// A call runs the function body as a child execution that shares the parent's
// sandbox and resource monitor. The child's records are folded back into the
// parent under the calling node's id.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};

use blueprint_types::{Blueprint, BlueprintGraph, FunctionDef, Pin, PinType, Value};

use crate::context::ExecutionContext;
use crate::engine::{Engine, RunState, RunStateInit};
use crate::error::{BlueprintError, ErrorCode, Result};
use crate::node::{BaseNode, Node, NodeMetadata};

/// Node types of the form `function:<id>` call a declared function
pub const FUNCTION_PREFIX: &str = "function:";
pub const FUNCTION_INPUT: &str = "function-input";
pub const FUNCTION_OUTPUT: &str = "function-output";

/// Result of calling a function
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionCall {
    Completed { outputs: BTreeMap<String, Value> },
    /// The function was already on the call stack; the body did not run
    SkippedRecursion,
}

// ─────────────────────────────────────────────────────────────────────────────
// Call Node
// ─────────────────────────────────────────────────────────────────────────────

/// Node standing in for a declared function
pub struct FunctionCallNode {
    base: BaseNode,
    function: Arc<FunctionDef>,
}

impl FunctionCallNode {
    pub fn new(function: Arc<FunctionDef>) -> Self {
        let name = if function.name.is_empty() {
            function.id.clone()
        } else {
            function.name.clone()
        };
        let type_id = format!("{}{}", FUNCTION_PREFIX, function.id);
        let mut base = BaseNode::new(NodeMetadata::new(&type_id, &name, "Functions"))
            .input(Pin::exec("exec"))
            .output(Pin::exec("then"));
        for param in &function.inputs {
            base = base.input(param_pin(&param.name, param.param_type, param.default.clone()));
        }
        for param in &function.outputs {
            base = base.output(Pin::data(&param.name, param.param_type));
        }
        Self { base, function }
    }
}

fn param_pin(name: &str, pin_type: PinType, default: Option<Value>) -> Pin {
    match default {
        Some(default) => Pin::data_with_default(name, pin_type, default),
        None => Pin::data(name, pin_type).optional(),
    }
}

#[async_trait]
impl Node for FunctionCallNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        match ctx.call_function(Arc::clone(&self.function)).await? {
            FunctionCall::Completed { outputs } => {
                for (name, value) in outputs {
                    ctx.set_output_value(&name, value);
                }
            }
            FunctionCall::SkippedRecursion => {
                ctx.logger()
                    .warn(&format!("recursive call to '{}' skipped", self.function.id));
            }
        }
        ctx.activate_output_flow("then")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry and exit nodes
// ─────────────────────────────────────────────────────────────────────────────

/// Shape function-input/function-output pins after the enclosing function.
/// Other node types are left untouched.
pub fn configure_function_io(node: &mut dyn Node, function: &FunctionDef) {
    let type_id = node.metadata().type_id.clone();
    let base = node.base_mut();
    match type_id.as_str() {
        FUNCTION_INPUT => {
            base.outputs.retain(|p| p.is_exec());
            for param in &function.inputs {
                base.outputs.push(Pin::data(&param.name, param.param_type));
            }
        }
        FUNCTION_OUTPUT => {
            base.inputs.retain(|p| p.is_exec());
            for param in &function.outputs {
                base.inputs
                    .push(param_pin(&param.name, param.param_type, param.default.clone()));
            }
        }
        _ => {}
    }
}

/// Entry of a function body: publishes the call arguments
pub struct FunctionInputNode {
    base: BaseNode,
}

impl FunctionInputNode {
    pub fn new() -> Self {
        Self {
            base: BaseNode::new(
                NodeMetadata::new(FUNCTION_INPUT, "Function Input", "Functions")
                    .description("Entry point of a function body"),
            )
            .output(Pin::exec("then")),
        }
    }
}

impl Default for FunctionInputNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for FunctionInputNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let arguments: Vec<(String, Value)> = self
            .base
            .outputs
            .iter()
            .filter(|p| !p.is_exec())
            .filter_map(|p| {
                ctx.function_arguments()
                    .get(&p.id)
                    .map(|v| (p.id.clone(), v.clone()))
            })
            .collect();
        for (name, value) in arguments {
            ctx.set_output_value(&name, value);
        }
        ctx.activate_output_flow("then")
    }
}

/// Exit of a function body: its inputs become the call's outputs
pub struct FunctionOutputNode {
    base: BaseNode,
}

impl FunctionOutputNode {
    pub fn new() -> Self {
        Self {
            base: BaseNode::new(
                NodeMetadata::new(FUNCTION_OUTPUT, "Function Output", "Functions")
                    .description("Return values of a function body"),
            )
            .input(Pin::exec("exec")),
        }
    }
}

impl Default for FunctionOutputNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for FunctionOutputNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        for pin in self.base.inputs.iter().filter(|p| !p.is_exec()) {
            if let Some(value) = ctx.get_input_value(&pin.id) {
                ctx.set_output_value(&pin.id, value);
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Child execution
// ─────────────────────────────────────────────────────────────────────────────

impl Engine {
    /// Run a function body as a child of `parent`
    pub(crate) fn run_function<'s>(
        &'s self,
        parent: &'s mut RunState,
        call_node_id: &'s str,
        function: Arc<FunctionDef>,
        arguments: HashMap<String, Value>,
    ) -> BoxFuture<'s, Result<FunctionCall>> {
        Box::pin(async move {
            if parent.call_stack.iter().any(|id| *id == function.id) {
                let message = format!(
                    "recursive call to function '{}' from node '{}' was not executed",
                    function.id, call_node_id
                );
                warn!(execution_id = %parent.execution_id, node_id = %call_node_id, "{}", message);
                parent.debug(
                    call_node_id,
                    "recursion skipped",
                    serde_json::json!({ "function": function.id }),
                );
                parent.warnings.push(message);
                return Ok(FunctionCall::SkippedRecursion);
            }

            let blueprint = Arc::new(Blueprint::from_function(parent.graph.id(), &function));
            let graph = BlueprintGraph::new(Arc::clone(&blueprint)).map_err(|e| {
                BlueprintError::validation(ErrorCode::InvalidBlueprint, e.to_string())
                    .with_detail("function", function.id.as_str())
            })?;
            let graph = Arc::new(graph);

            let seq = parent.next_child_seq();
            let mut child = RunState::new(RunStateInit {
                execution_id: format!("{}/{}#{}", parent.execution_id, function.id, seq),
                graph: Arc::clone(&graph),
                functions: Arc::clone(&parent.functions),
                sandbox: parent.sandbox.clone(),
                hooks: parent.hooks.clone(),
                variables: blueprint.variable_defaults(),
                initial_data: HashMap::new(),
                recovery: self.config().recovery.clone(),
            });
            child.call_stack = parent.call_stack.clone();
            child.call_stack.push(function.id.clone());
            child.function = Some(Arc::clone(&function));
            child.function_args = arguments;

            debug!(
                execution_id = %child.execution_id,
                function = %function.id,
                depth = child.call_stack.len(),
                "Calling function"
            );

            let seeds = self.entry_points(&mut child);
            let outputs = match self.run_frame(&mut child, seeds).await {
                Ok(()) => self.function_outputs(&mut child, &graph, &function).await,
                Err(err) => Err(err),
            };
            let outputs = match (child.failure.clone(), outputs) {
                (Some(cause), _) | (None, Err(cause)) => Err(cause),
                (None, Ok(outputs)) => Ok(outputs),
            };
            parent.absorb_child(call_node_id, child);

            match outputs {
                Ok(outputs) => Ok(FunctionCall::Completed { outputs }),
                Err(cause) => Err(BlueprintError::execution(
                    ErrorCode::FunctionFailed,
                    format!("function '{}' failed: {}", function.id, cause.message),
                )
                .with_detail("function", function.id.as_str())
                .with_cause(&cause)),
            }
        })
    }

    /// Values reaching the function-output node, evaluating unexecuted producers.
    /// A producer failure fails the child run.
    async fn function_outputs(
        &self,
        child: &mut RunState,
        graph: &BlueprintGraph,
        function: &FunctionDef,
    ) -> Result<BTreeMap<String, Value>> {
        let mut outputs = BTreeMap::new();
        let Some(exit) = graph.nodes().find(|n| n.node_type == FUNCTION_OUTPUT) else {
            return Ok(outputs);
        };
        for param in &function.outputs {
            let value = match child.output(&exit.id, &param.name) {
                Some(value) => Some(value.clone()),
                None => match self.evaluate_source(child, &exit.id, &param.name).await {
                    Ok(value) => value,
                    Err(err) => {
                        let owner = err.node_id.clone().unwrap_or_else(|| exit.id.clone());
                        child.record_error(&owner, &err);
                        child.hooks.node_error(&owner, &err);
                        child.fail(err.clone());
                        return Err(err);
                    }
                },
            };
            if let Some(value) = value.or_else(|| param.default.clone()) {
                outputs.insert(param.name.clone(), value);
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blueprint_types::{FunctionParam, PinType};

    fn double() -> FunctionDef {
        FunctionDef {
            id: "double".into(),
            name: "Double".into(),
            inputs: vec![FunctionParam {
                name: "x".into(),
                param_type: PinType::Number,
                default: None,
            }],
            outputs: vec![FunctionParam {
                name: "y".into(),
                param_type: PinType::Number,
                default: Some(Value::Int(0)),
            }],
            variables: Vec::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    #[test]
    fn test_call_node_pins_follow_signature() {
        let node = FunctionCallNode::new(Arc::new(double()));
        assert_eq!(node.metadata().type_id, "function:double");
        assert_eq!(node.metadata().name, "Double");
        assert!(node.base().get_input_pin("x").is_some_and(|p| p.optional));
        assert_eq!(
            node.base().get_output_pin("y").map(|p| p.pin_type),
            Some(PinType::Number)
        );
        assert!(node.base().get_output_pin("then").is_some());
    }

    #[test]
    fn test_configure_io_nodes() {
        let function = double();

        let mut input: Box<dyn Node> = Box::new(FunctionInputNode::new());
        configure_function_io(input.as_mut(), &function);
        let ids: Vec<_> = input.output_pins().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["then", "x"]);

        let mut output: Box<dyn Node> = Box::new(FunctionOutputNode::new());
        configure_function_io(output.as_mut(), &function);
        configure_function_io(output.as_mut(), &function);
        let ids: Vec<_> = output.input_pins().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["exec", "y"]);
    }
}
