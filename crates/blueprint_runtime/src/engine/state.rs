// Run State - The single owned record of one execution
//
// Only the scheduler's worker mutates it. Contexts borrow it for the duration
// of one node's execute; nothing else holds a reference.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use blueprint_types::{BlueprintGraph, FunctionDef, Value};

use crate::error::BlueprintError;
use crate::hooks::HookSet;
use crate::recovery::{RecoveryConfig, RecoveryManager};
use crate::sandbox::Sandbox;

/// A timestamped observation made during an execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DebugRecord {
    pub node_id: String,
    pub description: String,
    pub value: serde_json::Value,
    /// Milliseconds since the execution started (monotonic)
    pub timestamp_ms: u64,
}

/// Per-node summary reported in the execution result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeExecutionResult {
    pub node_id: String,
    pub node_type: String,
    /// Number of times execute was invoked
    pub executions: u32,
    /// Execution outputs activated, in order
    pub activated_flows: Vec<String>,
    /// Latest value written to each output pin
    pub outputs: BTreeMap<String, Value>,
    /// Errors raised or reported by this node
    pub errors: Vec<BlueprintError>,
}

impl NodeExecutionResult {
    pub fn last_flow(&self) -> Option<&str> {
        self.activated_flows.last().map(|s| s.as_str())
    }
}

pub(crate) struct RunState {
    pub execution_id: String,
    pub graph: Arc<BlueprintGraph>,
    /// Functions callable from this run (declared on the root blueprint)
    pub functions: Arc<HashMap<String, Arc<FunctionDef>>>,
    pub sandbox: Sandbox,
    pub hooks: HookSet,
    /// node id -> pin id -> value
    pub outputs: HashMap<String, HashMap<String, Value>>,
    pub variables: HashMap<String, Value>,
    /// Caller-supplied values for entry-point input pins
    pub initial_data: HashMap<String, Value>,
    pub entry_points: HashSet<String>,
    records: Vec<NodeExecutionResult>,
    record_index: HashMap<String, usize>,
    pub debug: Vec<DebugRecord>,
    pub recovery: RecoveryManager,
    started: Instant,
    /// Producers currently being evaluated for data (cycle detection)
    pub resolving: Vec<String>,
    /// Bumped whenever a node writes outputs through execution flow
    pub generation: u64,
    /// Generation at which a data-only evaluation was cached
    pub pure_stamps: HashMap<String, u64>,
    /// Function ids on the call stack of this run
    pub call_stack: Vec<String>,
    /// Set for child runs of an inlined function
    pub function: Option<Arc<FunctionDef>>,
    pub function_args: HashMap<String, Value>,
    child_seq: u32,
    /// First unrecovered error
    pub failure: Option<BlueprintError>,
    pub warnings: Vec<String>,
    pub activation_order: Vec<String>,
    pub active_loops: usize,
}

pub(crate) struct RunStateInit {
    pub execution_id: String,
    pub graph: Arc<BlueprintGraph>,
    pub functions: Arc<HashMap<String, Arc<FunctionDef>>>,
    pub sandbox: Sandbox,
    pub hooks: HookSet,
    pub variables: HashMap<String, Value>,
    pub initial_data: HashMap<String, Value>,
    pub recovery: RecoveryConfig,
}

impl RunState {
    pub fn new(init: RunStateInit) -> Self {
        Self {
            execution_id: init.execution_id,
            graph: init.graph,
            functions: init.functions,
            sandbox: init.sandbox,
            hooks: init.hooks,
            outputs: HashMap::new(),
            variables: init.variables,
            initial_data: init.initial_data,
            entry_points: HashSet::new(),
            records: Vec::new(),
            record_index: HashMap::new(),
            debug: Vec::new(),
            recovery: RecoveryManager::new(init.recovery),
            started: Instant::now(),
            resolving: Vec::new(),
            generation: 0,
            pure_stamps: HashMap::new(),
            call_stack: Vec::new(),
            function: None,
            function_args: HashMap::new(),
            child_seq: 0,
            failure: None,
            warnings: Vec::new(),
            activation_order: Vec::new(),
            active_loops: 0,
        }
    }

    pub fn next_child_seq(&mut self) -> u32 {
        self.child_seq += 1;
        self.child_seq
    }

    /// Record for a node, created on first use (preserves first-execution order)
    pub fn record(&mut self, node_id: &str, node_type: &str) -> &mut NodeExecutionResult {
        let index = match self.record_index.get(node_id) {
            Some(&i) => i,
            None => {
                self.records.push(NodeExecutionResult {
                    node_id: node_id.to_string(),
                    node_type: node_type.to_string(),
                    ..Default::default()
                });
                let i = self.records.len() - 1;
                self.record_index.insert(node_id.to_string(), i);
                i
            }
        };
        &mut self.records[index]
    }

    fn node_type_of(&self, node_id: &str) -> String {
        self.graph
            .node(node_id)
            .map(|n| n.node_type.clone())
            .unwrap_or_default()
    }

    pub fn record_flow(&mut self, node_id: &str, pin_id: &str) {
        let node_type = self.node_type_of(node_id);
        self.record(node_id, &node_type)
            .activated_flows
            .push(pin_id.to_string());
    }

    pub fn record_error(&mut self, node_id: &str, err: &BlueprintError) {
        let node_type = self.node_type_of(node_id);
        self.record(node_id, &node_type).errors.push(err.clone());
    }

    pub fn take_records(&mut self) -> Vec<NodeExecutionResult> {
        self.record_index.clear();
        std::mem::take(&mut self.records)
    }

    /// Store an output value, firing the pin hook
    pub fn write_output(&mut self, node_id: &str, pin_id: &str, value: Value) {
        self.hooks.pin_value(node_id, pin_id, &value);
        let node_type = self.node_type_of(node_id);
        self.record(node_id, &node_type)
            .outputs
            .insert(pin_id.to_string(), value.clone());
        self.outputs
            .entry(node_id.to_string())
            .or_default()
            .insert(pin_id.to_string(), value);
    }

    pub fn output(&self, node_id: &str, pin_id: &str) -> Option<&Value> {
        self.outputs.get(node_id).and_then(|pins| pins.get(pin_id))
    }

    pub fn debug(&mut self, node_id: &str, description: &str, value: serde_json::Value) {
        self.debug.push(DebugRecord {
            node_id: node_id.to_string(),
            description: description.to_string(),
            value,
            timestamp_ms: self.started.elapsed().as_millis() as u64,
        });
    }

    /// Mark the run failed; the first failure is the one reported
    pub fn fail(&mut self, err: BlueprintError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    /// Fold a finished child run (an inlined function) into this one.
    /// Child node ids are prefixed with the id of the calling node.
    pub fn absorb_child(&mut self, call_node_id: &str, mut child: RunState) {
        let prefix = |id: &str| format!("{}/{}", call_node_id, id);
        let offset_ms = child
            .started
            .saturating_duration_since(self.started)
            .as_millis() as u64;

        for record in child.take_records() {
            let merged = self.record(&prefix(&record.node_id), &record.node_type);
            merged.executions += record.executions;
            merged.activated_flows.extend(record.activated_flows);
            merged.outputs.extend(record.outputs);
            merged.errors.extend(record.errors);
        }

        self.debug.extend(child.debug.drain(..).map(|mut entry| {
            entry.node_id = prefix(&entry.node_id);
            entry.timestamp_ms += offset_ms;
            entry
        }));

        let attempts = child
            .recovery
            .take_history()
            .into_iter()
            .map(|mut attempt| {
                attempt.node_id = prefix(&attempt.node_id);
                attempt
            })
            .collect();
        self.recovery.absorb(attempts);

        self.warnings.append(&mut child.warnings);
        self.activation_order
            .extend(child.activation_order.iter().map(|id| prefix(id)));
    }

    /// Rough size of values held by this run
    pub fn approx_size(&self) -> u64 {
        let outputs: usize = self
            .outputs
            .values()
            .flat_map(|pins| pins.values())
            .map(Value::approx_size)
            .sum();
        let variables: usize = self.variables.values().map(Value::approx_size).sum();
        (outputs + variables) as u64
    }
}
