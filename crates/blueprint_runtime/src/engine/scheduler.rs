// Scheduler - Drives activations, resolves data inputs and routes errors
//
// Every path that can recurse (nested frames, on-demand data evaluation, loop
// bodies, function calls) returns a boxed future so the recursion has a
// fixed size.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use blueprint_types::{FunctionDef, Pin, Value};

use crate::context::{ContextParts, ExecutionContext, ExtendedContext};
use crate::error::{BlueprintError, ErrorCode, Result};
use crate::functions::{FunctionCallNode, FUNCTION_PREFIX, configure_function_io};
use crate::loop_actor::{LoopContext, drive_loop};
use crate::node::Node;
use crate::recovery::RecoveryStrategy;

use super::Engine;
use super::state::RunState;

/// Execution output names that receive unrecovered errors
const ERROR_PINS: [&str; 2] = ["error", "catch"];
/// Output written with the error object when routing to an error pin
pub const LAST_ERROR_PIN: &str = "lastError";

/// A queued node activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Activation {
    pub node_id: String,
    /// Execution input the activation arrives through
    pub pin: Option<String>,
}

/// What one execute produced
pub(crate) struct Invocation {
    pub activated: Option<String>,
    pub loop_context: Option<LoopContext>,
}

impl Engine {
    // ─────────────────────────────────────────────────────────────────────────
    // Node instances
    // ─────────────────────────────────────────────────────────────────────────

    /// Fresh node for a type id: registered types first, then declared functions
    pub(crate) fn create_node(
        &self,
        node_type: &str,
        functions: &HashMap<String, Arc<FunctionDef>>,
    ) -> Option<Box<dyn Node>> {
        if let Some(node) = self.registry.create(node_type) {
            return Some(node);
        }
        let function_id = node_type.strip_prefix(FUNCTION_PREFIX).unwrap_or(node_type);
        functions
            .get(function_id)
            .map(|function| Box::new(FunctionCallNode::new(Arc::clone(function))) as Box<dyn Node>)
    }

    pub(crate) fn instantiate(&self, state: &RunState, node_type: &str) -> Result<Box<dyn Node>> {
        self.create_node(node_type, &state.functions).ok_or_else(|| {
            BlueprintError::validation(
                ErrorCode::UnknownNodeType,
                format!("unknown node type '{}'", node_type),
            )
        })
    }

    /// Activations for everything wired to an execution output, in registration order
    pub(crate) fn successors(&self, state: &RunState, node_id: &str, pin_id: &str) -> Vec<Activation> {
        state
            .graph
            .exec_successors(node_id, pin_id)
            .map(|c| Activation {
                node_id: c.target_node_id.clone(),
                pin: Some(c.target_pin_id.clone()),
            })
            .collect()
    }

    /// Nodes with execution pins and no incoming execution connection, in node order
    pub(crate) fn entry_points(&self, state: &mut RunState) -> Vec<Activation> {
        let graph = Arc::clone(&state.graph);
        let mut seeds = Vec::new();
        for node in graph.nodes() {
            let Ok(prototype) = self.instantiate(state, &node.node_type) else {
                continue;
            };
            if !prototype.base().has_exec_pins() || graph.has_incoming_exec(&node.id) {
                continue;
            }
            let pin = prototype
                .input_pins()
                .iter()
                .find(|p| p.is_exec())
                .map(|p| p.id.clone());
            state.entry_points.insert(node.id.clone());
            seeds.push(Activation {
                node_id: node.id.clone(),
                pin,
            });
        }
        seeds
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Frames
    // ─────────────────────────────────────────────────────────────────────────

    /// Drain a FIFO of activations. Later activations still run after a failure
    /// so error branches get their turn; the first error is returned.
    pub(crate) fn run_frame<'s>(
        &'s self,
        state: &'s mut RunState,
        seeds: Vec<Activation>,
    ) -> BoxFuture<'s, Result<()>> {
        Box::pin(async move {
            let mut queue: VecDeque<Activation> = seeds.into();
            let mut first_error: Option<BlueprintError> = None;

            while let Some(activation) = queue.pop_front() {
                if let Some(err) = state.sandbox.monitor().cancellation() {
                    debug!(
                        execution_id = %state.execution_id,
                        dropped = queue.len() + 1,
                        "Execution cancelled, dropping queued activations"
                    );
                    queue.clear();
                    state.fail(err.clone());
                    first_error.get_or_insert(err.into_handled());
                    break;
                }

                match self.run_activation(state, &activation).await {
                    Ok(Some(pin)) => {
                        state.record_flow(&activation.node_id, &pin);
                        queue.extend(self.successors(state, &activation.node_id, &pin));
                    }
                    Ok(None) => {}
                    Err(err) => {
                        first_error.get_or_insert(err);
                    }
                }
            }

            match first_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    /// Execute one activation and return the output it continues through
    fn run_activation<'s>(
        &'s self,
        state: &'s mut RunState,
        activation: &'s Activation,
    ) -> BoxFuture<'s, Result<Option<String>>> {
        Box::pin(async move {
            match self.execute_activation(state, activation).await {
                Ok(pin) => Ok(pin),
                Err(err) => self.handle_node_error(state, activation, err).await,
            }
        })
    }

    /// Invoke the node and drive its loop, if it set one up. No error handling.
    async fn execute_activation(
        &self,
        state: &mut RunState,
        activation: &Activation,
    ) -> Result<Option<String>> {
        let node_id = activation.node_id.as_str();
        match self
            .invoke_node(state, node_id, activation.pin.as_deref(), false)
            .await?
        {
            Invocation {
                loop_context: Some(lp),
                ..
            } => drive_loop(self, state, node_id, lp).await,
            invocation => Ok(invocation.activated),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Error handling
    // ─────────────────────────────────────────────────────────────────────────

    /// Recovery, then the node's error output, then failing the run
    fn handle_node_error<'s>(
        &'s self,
        state: &'s mut RunState,
        activation: &'s Activation,
        err: BlueprintError,
    ) -> BoxFuture<'s, Result<Option<String>>> {
        Box::pin(async move {
            // Errors bubbling out of a nested frame were handled where they were raised
            if err.is_handled() {
                return Err(err);
            }

            let node_id = activation.node_id.as_str();
            let err = err.or_node(node_id);
            let owner = err.node_id.clone().unwrap_or_else(|| node_id.to_string());
            warn!(
                execution_id = %state.execution_id,
                node_id = %owner,
                kind = %err.kind,
                code = %err.code,
                "Node failed: {}",
                err.message
            );
            state.record_error(&owner, &err);
            state.hooks.node_error(&owner, &err);
            state.debug(
                &owner,
                "node error",
                serde_json::json!({ "kind": err.kind, "code": err.code, "message": err.message }),
            );

            if err.is_fatal() {
                state.sandbox.monitor().cancel(err.clone());
            }
            if state.sandbox.monitor().is_cancelled() {
                state.fail(err.clone());
                return Err(err.into_handled());
            }

            let outcome = state.recovery.attempt(node_id, &err);
            match outcome.strategy {
                Some(RecoveryStrategy::Retry { delay }) => {
                    debug!(node_id = %node_id, delay_ms = delay.as_millis() as u64, "Retrying node");
                    let monitor = Arc::clone(state.sandbox.monitor());
                    let waited = tokio::select! {
                        biased;
                        _ = monitor.interrupted() => false,
                        _ = tokio::time::sleep(delay) => true,
                    };
                    if waited {
                        let retried = self.execute_activation(state, activation).await;
                        state.recovery.settle(node_id, outcome.attempt, retried.is_ok());
                        return match retried {
                            Ok(pin) => Ok(pin),
                            Err(next) => self.handle_node_error(state, activation, next).await,
                        };
                    }
                    state.recovery.settle(node_id, outcome.attempt, false);
                    if let Some(cause) = monitor.cancellation() {
                        state.fail(cause);
                    }
                    state.fail(err.clone());
                    return Err(err.into_handled());
                }
                Some(strategy) => {
                    if let Some(pin) = self.continue_with_value(state, node_id, strategy.value()) {
                        return Ok(pin);
                    }
                }
                None => {}
            }

            if let Some(pin) = self.error_pin(state, node_id) {
                debug!(node_id = %node_id, pin = %pin, "Routing error to error output");
                state.write_output(node_id, LAST_ERROR_PIN, err.to_value());
                return Ok(Some(pin));
            }

            state.fail(err.clone());
            Err(err.into_handled())
        })
    }

    /// Write a recovered value and pick the normal continuation.
    ///
    /// `None` when the node cannot be instantiated; `Some(None)` for nodes
    /// without a normal execution output.
    fn continue_with_value(
        &self,
        state: &mut RunState,
        node_id: &str,
        value: Option<&Value>,
    ) -> Option<Option<String>> {
        let node_type = state.graph.node(node_id)?.node_type.clone();
        let prototype = self.instantiate(state, &node_type).ok()?;
        let outputs = prototype.output_pins();

        if let Some(value) = value {
            let target = outputs
                .iter()
                .find(|p| p.id == "result")
                .or_else(|| outputs.iter().find(|p| !p.is_exec()));
            if let Some(pin) = target {
                state.write_output(node_id, &pin.id, value.clone());
            }
        }

        let next = outputs
            .iter()
            .find(|p| p.is_exec() && !ERROR_PINS.contains(&p.id.as_str()))
            .map(|p| p.id.clone());
        Some(next)
    }

    /// The node's error output, only when something is wired to it
    fn error_pin(&self, state: &RunState, node_id: &str) -> Option<String> {
        let node_type = &state.graph.node(node_id)?.node_type;
        let prototype = self.instantiate(state, node_type).ok()?;
        prototype
            .output_pins()
            .iter()
            .filter(|p| p.is_exec() && ERROR_PINS.contains(&p.id.as_str()))
            .find(|p| state.graph.exec_successors(node_id, &p.id).next().is_some())
            .map(|p| p.id.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Invocation
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one node's execute. `pure` evaluates it for data only.
    pub(crate) fn invoke_node<'s>(
        &'s self,
        state: &'s mut RunState,
        node_id: &'s str,
        arriving_pin: Option<&'s str>,
        pure: bool,
    ) -> BoxFuture<'s, Result<Invocation>> {
        Box::pin(async move {
            let graph = Arc::clone(&state.graph);
            let blueprint_node = graph.node(node_id).ok_or_else(|| {
                BlueprintError::validation(
                    ErrorCode::InvalidBlueprint,
                    format!("node '{}' does not exist", node_id),
                )
            })?;
            let node_type = blueprint_node.node_type.as_str();

            let mut node = self
                .instantiate(state, node_type)
                .map_err(|e| e.with_node(node_id))?;
            for (name, value) in &blueprint_node.properties {
                node.set_property(name, value.clone());
            }
            if let Some(function) = state.function.clone() {
                configure_function_io(node.as_mut(), &function);
            }

            state.sandbox.monitor().begin_node()?;
            state
                .sandbox
                .check_node(node_type, &node.metadata().capabilities)
                .map_err(|e| e.with_node(node_id))?;

            let inputs = self.resolve_inputs(state, node_id, node.as_ref()).await?;

            if !pure {
                state.pure_stamps.remove(node_id);
            }
            state.activation_order.push(node_id.to_string());
            state.record(node_id, node_type).executions += 1;
            state.hooks.node_start(node_id, node_type);
            state.debug(
                node_id,
                "node start",
                serde_json::json!({ "type": node_type, "pure": pure, "arrivingPin": arriving_pin }),
            );
            debug!(
                execution_id = %state.execution_id,
                node_id = %node_id,
                node_type = %node_type,
                pure,
                "Executing node"
            );

            let monitor = Arc::clone(state.sandbox.monitor());
            let (outcome, flows, written) = {
                let mut ctx = ExecutionContext::new(
                    self,
                    state,
                    ContextParts {
                        node_id,
                        node_type,
                        properties: node.properties(),
                        output_pins: node.output_pins(),
                        arriving_pin,
                        pure,
                    },
                );
                for (pin_id, value) in inputs {
                    ctx.set_input(&pin_id, value);
                }
                // A node blocked past the deadline is dropped
                let result = tokio::select! {
                    biased;
                    result = node.execute(&mut ctx) => result,
                    cause = monitor.interrupted() => Err(cause),
                };
                let flows = ctx.get_activated_output_flows();
                let mut written: Vec<String> = ctx.get_all_outputs().into_keys().collect();
                written.sort();
                (result.map(|()| ctx.finish()), flows, written)
            };
            let outcome = outcome.map_err(|e| e.or_node(node_id))?;
            if let Some(fault) = outcome.fault {
                return Err(fault);
            }

            monitor.sample_memory(state.approx_size())?;
            monitor.check()?;

            if !pure {
                state.generation += 1;
            }
            state.hooks.node_complete(node_id, node_type);
            state.debug(
                node_id,
                "node complete",
                serde_json::json!({ "activated": flows, "outputs": written }),
            );

            Ok(Invocation {
                activated: outcome.activated,
                loop_context: outcome.loop_context,
            })
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Data resolution
    // ─────────────────────────────────────────────────────────────────────────

    async fn resolve_inputs(
        &self,
        state: &mut RunState,
        node_id: &str,
        node: &dyn Node,
    ) -> Result<HashMap<String, Value>> {
        let mut inputs = HashMap::new();
        for pin in node.input_pins().iter().filter(|p| !p.is_exec()) {
            if let Some(value) = self
                .resolve_input(state, node_id, pin, node.properties())
                .await?
            {
                inputs.insert(pin.id.clone(), value);
            }
        }
        Ok(inputs)
    }

    /// Connected producer, then entry data, then a same-named property, then the pin default
    async fn resolve_input(
        &self,
        state: &mut RunState,
        node_id: &str,
        pin: &Pin,
        properties: &BTreeMap<String, Value>,
    ) -> Result<Option<Value>> {
        let graph = Arc::clone(&state.graph);
        let connected = match graph.data_source(node_id, &pin.id) {
            Some(conn) => {
                self.evaluate_source(state, &conn.source_node_id, &conn.source_pin_id)
                    .await
                    .map_err(|e| e.or_node(node_id))?
            }
            None => None,
        };

        let raw = connected
            .or_else(|| {
                state
                    .entry_points
                    .contains(node_id)
                    .then(|| state.initial_data.get(&pin.id).cloned())
                    .flatten()
            })
            .or_else(|| properties.get(&pin.id).cloned())
            .or_else(|| pin.default.clone());

        let Some(raw) = raw else {
            return Ok(None);
        };
        if raw.is_null() {
            return Ok(Some(raw));
        }

        match pin.pin_type.coerce(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(conversion) if pin.is_recoverable() => {
                debug!(
                    node_id = %node_id,
                    pin = %pin.id,
                    "Input not convertible ({}), using pin default",
                    conversion
                );
                Ok(pin.default.clone())
            }
            Err(conversion) => Err(BlueprintError::from(conversion)
                .with_detail("pin", pin.id.as_str())
                .with_node(node_id)),
        }
    }

    /// Value of a producer's output pin, evaluating the producer on demand.
    ///
    /// Outputs written during execution flow are authoritative. Data-only
    /// evaluations are reused until any node writes outputs through flow.
    pub(crate) fn evaluate_source<'s>(
        &'s self,
        state: &'s mut RunState,
        source_id: &'s str,
        pin_id: &'s str,
    ) -> BoxFuture<'s, Result<Option<Value>>> {
        Box::pin(async move {
            match state.pure_stamps.get(source_id) {
                None if state.outputs.contains_key(source_id) => {
                    return Ok(state.output(source_id, pin_id).cloned());
                }
                Some(&stamp) if stamp == state.generation => {
                    return Ok(state.output(source_id, pin_id).cloned());
                }
                _ => {}
            }

            if state.resolving.iter().any(|id| id == source_id) {
                let mut chain = state.resolving.join(" -> ");
                chain.push_str(" -> ");
                chain.push_str(source_id);
                return Err(BlueprintError::execution(
                    ErrorCode::DataCycle,
                    format!("data dependency cycle: {}", chain),
                )
                .with_node(source_id));
            }

            state.resolving.push(source_id.to_string());
            let result = self.invoke_node(state, source_id, None, true).await;
            state.resolving.pop();
            result?;

            state.pure_stamps.insert(source_id.to_string(), state.generation);
            Ok(state.output(source_id, pin_id).cloned())
        })
    }
}
