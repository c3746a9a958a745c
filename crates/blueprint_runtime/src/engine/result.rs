// Request and result types for Engine::execute

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;

use blueprint_types::Value;

use crate::error::BlueprintError;
use crate::hooks::ExecutionHooks;
use crate::recovery::RecoveryAttempt;
use crate::sandbox::{PermissionLevel, ResourceUsage};

use super::state::{DebugRecord, NodeExecutionResult};

/// Everything the caller supplies for one execution
#[derive(Clone, Default)]
pub struct ExecutionRequest {
    /// Generated when absent
    pub execution_id: Option<String>,
    pub user_id: String,
    /// Values for entry-point input pins (pin id -> value)
    pub initial_data: HashMap<String, Value>,
    /// Replace declared variable defaults
    pub variable_overrides: HashMap<String, Value>,
    pub hooks: Vec<Arc<dyn ExecutionHooks>>,
    /// Blueprint-specific permission (wins over configured levels)
    pub permission_override: Option<PermissionLevel>,
}

impl ExecutionRequest {
    pub fn new(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            ..Default::default()
        }
    }

    pub fn with_execution_id(mut self, id: &str) -> Self {
        self.execution_id = Some(id.to_string());
        self
    }

    pub fn with_input(mut self, pin_id: &str, value: impl Into<Value>) -> Self {
        self.initial_data.insert(pin_id.to_string(), value.into());
        self
    }

    pub fn with_variable(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.variable_overrides.insert(name.to_string(), value.into());
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ExecutionHooks>) -> Self {
        self.hooks.push(hooks);
        self
    }

    pub fn with_permission(mut self, level: PermissionLevel) -> Self {
        self.permission_override = Some(level);
        self
    }
}

impl std::fmt::Debug for ExecutionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionRequest")
            .field("execution_id", &self.execution_id)
            .field("user_id", &self.user_id)
            .field("initial_data", &self.initial_data)
            .field("variable_overrides", &self.variable_overrides)
            .field("hooks", &self.hooks.len())
            .field("permission_override", &self.permission_override)
            .finish()
    }
}

/// Outcome of one execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub success: bool,
    /// Final values of the blueprint's declared outputs
    pub outputs: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BlueprintError>,
    pub node_results: Vec<NodeExecutionResult>,
    pub recovery_attempts: Vec<RecoveryAttempt>,
    pub debug: Vec<DebugRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Node ids in the order their execute ran
    pub activation_order: Vec<String>,
    pub cancelled: bool,
    pub usage: ResourceUsage,
}

impl ExecutionResult {
    /// A run rejected before any node executed
    pub(crate) fn rejected(execution_id: String, error: BlueprintError) -> Self {
        Self {
            execution_id,
            success: false,
            outputs: BTreeMap::new(),
            error: Some(error),
            node_results: Vec::new(),
            recovery_attempts: Vec::new(),
            debug: Vec::new(),
            warnings: Vec::new(),
            activation_order: Vec::new(),
            cancelled: false,
            usage: ResourceUsage::default(),
        }
    }

    pub fn node_result(&self, node_id: &str) -> Option<&NodeExecutionResult> {
        self.node_results.iter().find(|r| r.node_id == node_id)
    }

    /// Latest value of a node's output pin
    pub fn node_output(&self, node_id: &str, pin_id: &str) -> Option<&Value> {
        self.node_result(node_id).and_then(|r| r.outputs.get(pin_id))
    }

    /// Number of times a node executed (0 if it never ran)
    pub fn executions(&self, node_id: &str) -> u32 {
        self.node_result(node_id).map(|r| r.executions).unwrap_or(0)
    }
}
