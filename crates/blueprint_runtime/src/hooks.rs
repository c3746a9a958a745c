// Hooks - Lifecycle callbacks and node-facing logging
//
// Hooks are registered per execution and called from the scheduler worker.
// They receive copies of engine data and must not re-enter the engine.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use blueprint_types::Value;

use crate::error::BlueprintError;

// ─────────────────────────────────────────────────────────────────────────────
// Execution Hooks
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle callbacks for a single execution. All methods default to no-ops.
pub trait ExecutionHooks: Send + Sync {
    fn on_node_start(&self, _node_id: &str, _node_type: &str) {}

    fn on_node_complete(&self, _node_id: &str, _node_type: &str) {}

    fn on_node_error(&self, _node_id: &str, _error: &BlueprintError) {}

    fn on_pin_value(&self, _node_id: &str, _pin_id: &str, _value: &Value) {}

    fn on_log(&self, _node_id: &str, _level: LogLevel, _message: &str) {}
}

/// Fan-out over the hooks registered for an execution
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<Arc<dyn ExecutionHooks>>,
}

impl HookSet {
    pub fn new(hooks: Vec<Arc<dyn ExecutionHooks>>) -> Self {
        Self { hooks }
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn node_start(&self, node_id: &str, node_type: &str) {
        for hook in &self.hooks {
            hook.on_node_start(node_id, node_type);
        }
    }

    pub fn node_complete(&self, node_id: &str, node_type: &str) {
        for hook in &self.hooks {
            hook.on_node_complete(node_id, node_type);
        }
    }

    pub fn node_error(&self, node_id: &str, error: &BlueprintError) {
        for hook in &self.hooks {
            hook.on_node_error(node_id, error);
        }
    }

    pub fn pin_value(&self, node_id: &str, pin_id: &str, value: &Value) {
        for hook in &self.hooks {
            hook.on_pin_value(node_id, pin_id, value);
        }
    }

    pub fn log(&self, node_id: &str, level: LogLevel, message: &str) {
        for hook in &self.hooks {
            hook.on_log(node_id, level, message);
        }
    }
}

impl std::fmt::Debug for HookSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSet")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Node Logger
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Logger handed to nodes. Writes under the `blueprint` tracing target and
/// forwards every line to the `on_log` hook.
#[derive(Debug, Clone)]
pub struct NodeLogger {
    execution_id: String,
    node_id: String,
    hooks: HookSet,
}

impl NodeLogger {
    pub(crate) fn new(execution_id: &str, node_id: &str, hooks: HookSet) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            node_id: node_id.to_string(),
            hooks,
        }
    }

    pub fn debug(&self, message: &str) {
        debug!(target: "blueprint", execution_id = %self.execution_id, node_id = %self.node_id, "{}", message);
        self.hooks.log(&self.node_id, LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        info!(target: "blueprint", execution_id = %self.execution_id, node_id = %self.node_id, "{}", message);
        self.hooks.log(&self.node_id, LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        warn!(target: "blueprint", execution_id = %self.execution_id, node_id = %self.node_id, "{}", message);
        self.hooks.log(&self.node_id, LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        error!(target: "blueprint", execution_id = %self.execution_id, node_id = %self.node_id, "{}", message);
        self.hooks.log(&self.node_id, LogLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        lines: Mutex<Vec<String>>,
    }

    impl ExecutionHooks for Recorder {
        fn on_log(&self, node_id: &str, level: LogLevel, message: &str) {
            self.lines
                .lock()
                .push(format!("{:?}:{}:{}", level, node_id, message));
        }
    }

    #[test]
    fn test_logger_forwards_to_hooks() {
        let recorder = Arc::new(Recorder::default());
        let hook: Arc<dyn ExecutionHooks> = recorder.clone();
        let hooks = HookSet::new(vec![hook]);
        let logger = NodeLogger::new("exec-1", "print1", hooks);

        logger.info("hello");
        logger.warn("careful");

        let lines = recorder.lines.lock();
        assert_eq!(lines.as_slice(), ["Info:print1:hello", "Warn:print1:careful"]);
    }

    #[test]
    fn test_default_hooks_are_noops() {
        struct Silent;
        impl ExecutionHooks for Silent {}

        let hook: Arc<dyn ExecutionHooks> = Arc::new(Silent);
        let hooks = HookSet::new(vec![hook]);
        hooks.node_start("n", "print");
        hooks.pin_value("n", "out", &Value::Null);
        assert!(!hooks.is_empty());
    }
}
