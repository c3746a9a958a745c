//! Blueprint Runtime - Execution engine for visual scripts
//!
//! A blueprint is a graph of nodes joined by execution and data connections.
//! The [`Engine`] validates a blueprint against a [`NodeRegistry`], then walks
//! its execution flow from the entry points, pulling data inputs on demand.
//! Every run is sandboxed: permissions, resource limits and rate limits are
//! enforced per execution.

pub use blueprint_types;

pub mod config;
mod context;
mod engine;
mod error;
mod functions;
mod hooks;
mod loop_actor;
mod node;
pub mod nodes;
pub mod recovery;
mod registry;
pub mod sandbox;

pub use config::EngineConfig;
pub use context::{ExecutionContext, ExtendedContext, SchemaStore};
pub use engine::{
    DebugRecord, Engine, ExecutionRequest, ExecutionResult, LAST_ERROR_PIN, NodeExecutionResult,
};
pub use error::{BlueprintError, ConfigError, ErrorCode, ErrorKind, Result};
pub use functions::{
    FUNCTION_INPUT, FUNCTION_OUTPUT, FUNCTION_PREFIX, FunctionCall, FunctionCallNode,
    FunctionInputNode, FunctionOutputNode,
};
pub use hooks::{ExecutionHooks, HookSet, LogLevel, NodeLogger};
pub use loop_actor::{LoopContext, LoopMessage, LoopOutcome, OneShotSignal};
pub use node::{BaseNode, FnNode, Node, NodeFactory, NodeMetadata};
pub use recovery::{RecoveryAttempt, RecoveryOutcome, RecoveryStrategy, StrategyKind};
pub use registry::{NodeDefinition, NodeRegistry};
pub use sandbox::{
    Capability, PermissionLevel, RateLimiter, RateScope, ResourceLimits, ResourceUsage, Sandbox,
};
