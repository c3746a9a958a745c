// Execution Context - The per-invocation facade a node talks to
//
// A context lives on the worker's stack for exactly one node execute. It holds
// a capability-scoped handle to engine services and a borrow of the run state;
// the engine never keeps a pointer back to it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use blueprint_types::{FunctionDef, Pin, Value};

use crate::engine::{DebugRecord, Engine, RunState};
use crate::error::{BlueprintError, ErrorCode, ErrorKind, Result};
use crate::functions::FunctionCall;
use crate::hooks::NodeLogger;
use crate::loop_actor::LoopContext;
use crate::recovery::{RecoveryOutcome, RecoveryStrategy};
use crate::sandbox::Sandbox;

/// Lookup of schema components held outside the engine
pub trait SchemaStore: Send + Sync {
    fn get_schema_component(&self, id: &str) -> Option<Value>;
}

/// What the engine takes back from a finished context
pub(crate) struct ContextOutcome {
    pub activated: Option<String>,
    pub loop_context: Option<LoopContext>,
    pub fault: Option<BlueprintError>,
}

pub struct ExecutionContext<'a> {
    engine: &'a Engine,
    state: &'a mut RunState,
    node_id: &'a str,
    node_type: &'a str,
    properties: &'a BTreeMap<String, Value>,
    output_pins: &'a [Pin],
    arriving_pin: Option<&'a str>,
    inputs: HashMap<String, Value>,
    pure: bool,
    activated: Option<String>,
    /// Execution outputs continued through during this execute, in order
    flows: Vec<String>,
    fault: Option<BlueprintError>,
    loop_context: Option<LoopContext>,
}

pub(crate) struct ContextParts<'a> {
    pub node_id: &'a str,
    pub node_type: &'a str,
    pub properties: &'a BTreeMap<String, Value>,
    pub output_pins: &'a [Pin],
    pub arriving_pin: Option<&'a str>,
    pub pure: bool,
}

impl<'a> ExecutionContext<'a> {
    pub(crate) fn new(engine: &'a Engine, state: &'a mut RunState, parts: ContextParts<'a>) -> Self {
        Self {
            engine,
            state,
            node_id: parts.node_id,
            node_type: parts.node_type,
            properties: parts.properties,
            output_pins: parts.output_pins,
            arriving_pin: parts.arriving_pin,
            inputs: HashMap::new(),
            pure: parts.pure,
            activated: None,
            flows: Vec::new(),
            fault: None,
            loop_context: None,
        }
    }

    pub(crate) fn finish(self) -> ContextOutcome {
        ContextOutcome {
            activated: self.activated,
            loop_context: self.loop_context,
            fault: self.fault,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identity
    // ─────────────────────────────────────────────────────────────────────────

    pub fn node_id(&self) -> &str {
        self.node_id
    }

    pub fn node_type(&self) -> &str {
        self.node_type
    }

    pub fn blueprint_id(&self) -> &str {
        self.state.graph.id()
    }

    pub fn execution_id(&self) -> &str {
        &self.state.execution_id
    }

    /// True while the node is being driven only to produce data
    pub fn is_pure_evaluation(&self) -> bool {
        self.pure
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inputs, properties and outputs
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolved data input; `None` when nothing is connected and no default exists
    pub fn get_input_value(&self, pin_id: &str) -> Option<Value> {
        self.inputs.get(pin_id).cloned()
    }

    /// Resolved data input, failing with `missing_required_input`
    pub fn require_input(&self, pin_id: &str) -> Result<Value> {
        self.get_input_value(pin_id)
            .filter(|v| !v.is_null())
            .ok_or_else(|| BlueprintError::missing_input(pin_id).with_node(self.node_id))
    }

    /// Whether this activation arrived through the given execution pin
    pub fn is_input_pin_active(&self, pin_id: &str) -> bool {
        self.arriving_pin == Some(pin_id)
    }

    pub fn get_property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn set_output_value(&mut self, pin_id: &str, value: impl Into<Value>) {
        self.state.write_output(self.node_id, pin_id, value.into());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Flow control
    // ─────────────────────────────────────────────────────────────────────────

    /// Continue along one execution output. At most one per execute.
    pub fn activate_output_flow(&mut self, pin_id: &str) -> Result<()> {
        if self.pure {
            debug!(node_id = %self.node_id, pin = %pin_id, "Ignoring activation during data evaluation");
            return Ok(());
        }
        if !self.output_pins.iter().any(|p| p.id == pin_id && p.is_exec()) {
            return Err(BlueprintError::validation(
                ErrorCode::InvalidInput,
                format!("'{}' is not an execution output of '{}'", pin_id, self.node_type),
            )
            .with_node(self.node_id));
        }
        if let Some(previous) = &self.activated {
            let err = BlueprintError::execution(
                ErrorCode::MultipleActivation,
                format!(
                    "node activated '{}' after already activating '{}'",
                    pin_id, previous
                ),
            )
            .with_node(self.node_id);
            self.fault = Some(err.clone());
            return Err(err);
        }
        self.activated = Some(pin_id.to_string());
        self.flows.push(pin_id.to_string());
        Ok(())
    }

    /// Run everything connected to an execution output to completion before returning
    pub async fn execute_connected_nodes(&mut self, pin_id: &str) -> Result<()> {
        if self.pure {
            debug!(node_id = %self.node_id, pin = %pin_id, "Ignoring connected execution during data evaluation");
            return Ok(());
        }
        self.state.record_flow(self.node_id, pin_id);
        self.flows.push(pin_id.to_string());
        let seeds = self.engine.successors(self.state, self.node_id, pin_id);
        self.engine.run_frame(self.state, seeds).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Variables
    // ─────────────────────────────────────────────────────────────────────────

    pub fn get_variable(&self, name: &str) -> Option<Value> {
        self.state.variables.get(name).cloned()
    }

    pub fn set_variable(&mut self, name: &str, value: impl Into<Value>) {
        self.state.variables.insert(name.to_string(), value.into());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observability
    // ─────────────────────────────────────────────────────────────────────────

    pub fn logger(&self) -> NodeLogger {
        NodeLogger::new(&self.state.execution_id, self.node_id, self.state.hooks.clone())
    }

    pub fn record_debug_info(&mut self, description: &str, value: impl Serialize) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.state.debug(self.node_id, description, value);
    }

    pub fn get_debug_data(&self) -> &[DebugRecord] {
        &self.state.debug
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loops
    // ─────────────────────────────────────────────────────────────────────────

    /// Loop sub-context for body-driving nodes. `None` when loops cannot run here.
    pub fn create_loop_context(
        &mut self,
        variable: &str,
        max_iterations: i64,
        start_index: i64,
    ) -> Option<&mut LoopContext> {
        if self.pure {
            return None;
        }
        Some(
            self.loop_context
                .get_or_insert_with(|| LoopContext::new(variable, max_iterations, start_index)),
        )
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Errors and recovery
    // ─────────────────────────────────────────────────────────────────────────

    /// Whether nodes may report errors here and ask for recovery
    pub fn is_error_aware(&self) -> bool {
        true
    }

    pub fn report_error(
        &mut self,
        kind: ErrorKind,
        code: ErrorCode,
        message: &str,
        cause: Option<&str>,
    ) -> BlueprintError {
        let mut err = BlueprintError::new(kind, code, message);
        if let Some(cause) = cause {
            err = err.with_cause(cause);
        }
        self.report(err)
    }

    /// Record an error against this node without failing it
    pub fn report(&mut self, err: BlueprintError) -> BlueprintError {
        let err = err.or_node(self.node_id);
        warn!(
            execution_id = %self.state.execution_id,
            node_id = %self.node_id,
            code = %err.code,
            "Node reported error: {}",
            err.message
        );
        self.state.record_error(self.node_id, &err);
        self.state.hooks.node_error(self.node_id, &err);
        self.state.debug(
            self.node_id,
            "error reported",
            serde_json::json!({ "kind": err.kind, "code": err.code, "message": err.message }),
        );
        err
    }

    /// Ask the recovery manager for a strategy. Retries wait out their backoff
    /// here; the node then retries and reports the result with [`Self::settle_retry`].
    pub async fn attempt_recovery(&mut self, err: &BlueprintError) -> RecoveryOutcome {
        let outcome = self.state.recovery.attempt(self.node_id, err);
        self.state.debug(
            self.node_id,
            "recovery attempted",
            serde_json::json!({
                "code": err.code,
                "success": outcome.success,
                "strategy": outcome.strategy.as_ref().map(|s| s.kind()),
            }),
        );

        if let Some(RecoveryStrategy::Retry { delay }) = &outcome.strategy {
            let monitor = Arc::clone(self.state.sandbox.monitor());
            tokio::select! {
                biased;
                _ = monitor.interrupted() => {
                    self.state.recovery.settle(self.node_id, outcome.attempt, false);
                    return RecoveryOutcome::failed();
                }
                _ = tokio::time::sleep(*delay) => {}
            }
        }
        outcome
    }

    /// Record whether a retry granted by [`Self::attempt_recovery`] succeeded
    pub fn settle_retry(&mut self, outcome: &RecoveryOutcome, success: bool) {
        if outcome.is_retry() {
            self.state.recovery.settle(self.node_id, outcome.attempt, success);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Capabilities
    // ─────────────────────────────────────────────────────────────────────────

    pub fn sandbox(&self) -> &Sandbox {
        &self.state.sandbox
    }

    /// Cancelled when the run is aborted or a limit fires
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.sandbox.monitor().token()
    }

    pub fn schema_access(&self) -> Option<&dyn SchemaStore> {
        self.engine.schema_store()
    }

    pub(crate) async fn call_function(&mut self, function: Arc<FunctionDef>) -> Result<FunctionCall> {
        let args = self.inputs.clone();
        self.engine
            .run_function(self.state, self.node_id, function, args)
            .await
    }

    pub(crate) fn function_arguments(&self) -> &HashMap<String, Value> {
        &self.state.function_args
    }
}

/// Engine-side access used when driving nodes directly
pub trait ExtendedContext {
    /// Seed a resolved data input before execute
    fn set_input(&mut self, pin_id: &str, value: Value);

    fn get_output_value(&self, pin_id: &str) -> Option<Value>;

    fn get_all_outputs(&self) -> HashMap<String, Value>;

    /// Execution outputs continued through by the current execute
    fn get_activated_output_flows(&self) -> Vec<String>;
}

impl ExtendedContext for ExecutionContext<'_> {
    fn set_input(&mut self, pin_id: &str, value: Value) {
        self.inputs.insert(pin_id.to_string(), value);
    }

    fn get_output_value(&self, pin_id: &str) -> Option<Value> {
        self.state.output(self.node_id, pin_id).cloned()
    }

    fn get_all_outputs(&self) -> HashMap<String, Value> {
        self.state
            .outputs
            .get(self.node_id)
            .cloned()
            .unwrap_or_default()
    }

    fn get_activated_output_flows(&self) -> Vec<String> {
        self.flows.clone()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use blueprint_types::{Blueprint, BlueprintNode, Connection, PinType};

    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::ExecutionRequest;
    use crate::node::{BaseNode, Node, NodeMetadata};
    use crate::recovery::{RecoveryConfig, StrategyKind};
    use crate::registry::NodeRegistry;

    /// Reports a dropped connection, waits for a retry and settles it from `recovers`
    struct ReconnectNode {
        base: BaseNode,
    }

    impl ReconnectNode {
        fn new() -> Self {
            Self {
                base: BaseNode::new(NodeMetadata::new("reconnect", "Reconnect", "Testing"))
                    .input(Pin::exec("exec"))
                    .input(Pin::data_with_default("recovers", PinType::Boolean, true))
                    .output(Pin::exec("then")),
            }
        }
    }

    #[async_trait]
    impl Node for ReconnectNode {
        fn base(&self) -> &BaseNode {
            &self.base
        }

        fn base_mut(&mut self) -> &mut BaseNode {
            &mut self.base
        }

        async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
            let err = ctx.report_error(
                ErrorKind::Connection,
                ErrorCode::ConnectionFailed,
                "connection reset",
                None,
            );
            let outcome = ctx.attempt_recovery(&err).await;
            if !outcome.is_retry() {
                return Err(err);
            }
            let recovers = ctx.require_input("recovers")?.as_boolean()?;
            ctx.settle_retry(&outcome, recovers);
            if !recovers {
                return Err(err);
            }
            ctx.activate_output_flow("then")
        }
    }

    async fn run(recovers: bool) -> crate::engine::ExecutionResult {
        let mut registry = NodeRegistry::with_builtins();
        registry.register(|| -> Box<dyn Node> { Box::new(ReconnectNode::new()) });
        let config = EngineConfig {
            recovery: RecoveryConfig {
                base_backoff_ms: 1,
                jitter: false,
                ..RecoveryConfig::default()
            },
            ..EngineConfig::default()
        };
        let bp = Blueprint::new("reconnect", "Reconnect")
            .with_node(BlueprintNode::new("r", "reconnect").with_property("recovers", recovers))
            .with_node(BlueprintNode::new("p", "print").with_property("message", "up"))
            .with_connection(Connection::execution("r", "then", "p", "exec"));
        Engine::new(Arc::new(registry), config)
            .execute(Arc::new(bp), ExecutionRequest::new("tester"))
            .await
    }

    #[tokio::test]
    async fn test_settled_retry_is_recorded_as_successful() {
        let result = run(true).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.executions("p"), 1);

        let attempt = &result.recovery_attempts[0];
        assert_eq!(attempt.strategy, Some(StrategyKind::Retry));
        assert!(attempt.success);
    }

    #[tokio::test]
    async fn test_unsettled_retry_stays_failed() {
        let result = run(false).await;
        assert!(!result.success);
        assert_eq!(result.executions("p"), 0);

        let first = &result.recovery_attempts[0];
        assert_eq!(first.strategy, Some(StrategyKind::Retry));
        assert!(!first.success);
    }
}
