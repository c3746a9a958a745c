//! Engine - Runs blueprints
//!
//! The engine is built once with a registry and configuration and then shared
//! between executions. Each [`Engine::execute`] call owns its run state for its
//! whole lifetime; only the registry, the security checker and the rate
//! limiter are shared between concurrent runs.

mod result;
mod scheduler;
mod state;
mod validate;

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blueprint_types::{Blueprint, Value};

use crate::config::EngineConfig;
use crate::context::SchemaStore;
use crate::error::{BlueprintError, ErrorCode};
use crate::hooks::HookSet;
use crate::registry::NodeRegistry;
use crate::sandbox::{RateLimiter, RateScope, ResourceMonitor, Sandbox, SecurityChecker};

pub use result::{ExecutionRequest, ExecutionResult};
pub use scheduler::LAST_ERROR_PIN;
pub use state::{DebugRecord, NodeExecutionResult};

pub(crate) use state::{RunState, RunStateInit};

pub struct Engine {
    registry: Arc<NodeRegistry>,
    config: EngineConfig,
    security: Arc<SecurityChecker>,
    rate_limiter: Arc<RateLimiter>,
    schema_store: Option<Arc<dyn SchemaStore>>,
    /// Monitors of in-flight executions, for abort
    running: DashMap<String, Arc<ResourceMonitor>>,
}

impl Engine {
    pub fn new(registry: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        Self {
            security: Arc::new(SecurityChecker::new(config.security.clone())),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limits.clone())),
            registry,
            config,
            schema_store: None,
            running: DashMap::new(),
        }
    }

    /// Engine with the built-in catalog and default configuration
    pub fn with_builtins() -> Self {
        Self::new(Arc::new(NodeRegistry::with_builtins()), EngineConfig::default())
    }

    pub fn with_schema_store(mut self, store: Arc<dyn SchemaStore>) -> Self {
        self.schema_store = Some(store);
        self
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub(crate) fn schema_store(&self) -> Option<&dyn SchemaStore> {
        self.schema_store.as_deref()
    }

    /// Ids of executions currently running
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Cancel a running execution. Returns false if it is not running.
    pub fn abort(&self, execution_id: &str) -> bool {
        match self.running.get(execution_id) {
            Some(monitor) => {
                info!(execution_id = %execution_id, "Aborting execution");
                monitor.cancel(BlueprintError::execution(
                    ErrorCode::Cancelled,
                    "execution aborted",
                ));
                true
            }
            None => false,
        }
    }

    /// Run a blueprint to completion.
    ///
    /// Rejections (rate limits, invalid blueprints) come back as a failed
    /// result without any node having run.
    pub async fn execute(&self, blueprint: Arc<Blueprint>, request: ExecutionRequest) -> ExecutionResult {
        let execution_id = request
            .execution_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let user_id = request.user_id.as_str();
        let permission = request
            .permission_override
            .unwrap_or_else(|| self.config.permissions.resolve(user_id, &blueprint.id));

        info!(
            execution_id = %execution_id,
            blueprint_id = %blueprint.id,
            user_id = %user_id,
            permission = %permission,
            "Starting execution"
        );

        let scopes = [RateScope::UserBlueprint, RateScope::Blueprint]
            .map(|scope| (scope, scope.key(user_id, &blueprint.id, "execute")));
        if let Err(err) = self.rate_limiter.check_all(&scopes) {
            warn!(execution_id = %execution_id, "Execution rejected: {}", err.message);
            return ExecutionResult::rejected(execution_id, err);
        }

        let functions = validate::function_table(&blueprint);
        let graph = match self.validate_with(&blueprint, &functions) {
            Ok(graph) => Arc::new(graph),
            Err(err) => {
                warn!(execution_id = %execution_id, "Invalid blueprint: {}", err);
                let err = BlueprintError::validation(ErrorCode::InvalidBlueprint, err.to_string());
                return ExecutionResult::rejected(execution_id, err);
            }
        };

        let monitor = Arc::new(ResourceMonitor::new(self.config.limits.clone()));
        self.running
            .insert(execution_id.clone(), Arc::clone(&monitor));

        let sandbox = Sandbox::new(
            user_id,
            &blueprint.id,
            permission,
            Arc::clone(&monitor),
            Arc::clone(&self.security),
            Arc::clone(&self.rate_limiter),
        );
        let mut variables = blueprint.variable_defaults();
        variables.extend(request.variable_overrides);

        let mut state = RunState::new(RunStateInit {
            execution_id: execution_id.clone(),
            graph,
            functions: Arc::new(functions),
            sandbox,
            hooks: HookSet::new(request.hooks),
            variables,
            initial_data: request.initial_data,
            recovery: self.config.recovery.clone(),
        });

        let seeds = self.entry_points(&mut state);
        if seeds.is_empty() {
            debug!(execution_id = %execution_id, "No entry points, evaluating declared outputs");
        } else if let Err(err) = self.run_frame(&mut state, seeds).await {
            state.fail(err);
        }

        let outputs = self.collect_outputs(&mut state, &blueprint).await;

        let cancelled = match monitor.cancellation() {
            Some(err) => {
                state.fail(err);
                true
            }
            None => false,
        };
        self.running.remove(&execution_id);
        debug_assert_eq!(state.active_loops, 0);

        let success = state.failure.is_none();
        if success {
            info!(execution_id = %execution_id, "Execution completed");
        } else {
            warn!(execution_id = %execution_id, cancelled, "Execution failed");
        }

        ExecutionResult {
            execution_id,
            success,
            outputs,
            error: state.failure.take(),
            node_results: state.take_records(),
            recovery_attempts: state.recovery.take_history(),
            debug: std::mem::take(&mut state.debug),
            warnings: std::mem::take(&mut state.warnings),
            activation_order: std::mem::take(&mut state.activation_order),
            cancelled,
            usage: monitor.usage(),
        }
    }

    /// Final values of the declared outputs.
    ///
    /// Data-only producers are evaluated on demand; nodes with execution pins
    /// only report what they wrote while running.
    async fn collect_outputs(&self, state: &mut RunState, blueprint: &Blueprint) -> BTreeMap<String, Value> {
        let mut outputs = BTreeMap::new();
        for output in &blueprint.outputs {
            let value = if self.is_data_only(state, &output.node_id) {
                match self.evaluate_source(state, &output.node_id, &output.pin_id).await {
                    Ok(value) => value,
                    Err(err) => {
                        debug!(output = %output.name, "Output could not be evaluated: {}", err.message);
                        state.record_error(&output.node_id, &err);
                        state.fail(err);
                        None
                    }
                }
            } else {
                state.output(&output.node_id, &output.pin_id).cloned()
            };
            if let Some(value) = value {
                outputs.insert(output.name.clone(), value);
            }
        }
        outputs
    }

    fn is_data_only(&self, state: &RunState, node_id: &str) -> bool {
        state
            .graph
            .node(node_id)
            .and_then(|node| self.instantiate(state, &node.node_type).ok())
            .is_some_and(|node| !node.base().has_exec_pins())
    }
}
