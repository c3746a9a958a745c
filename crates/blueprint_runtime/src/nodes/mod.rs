//! Built-in node catalog
//!
//! Only the nodes the engine's own control constructs need, plus a few data
//! helpers. Applications register their own node types next to these.

mod constants;
mod data;
mod flow;
mod loops;
mod math;
mod utility;
mod variables;

pub use flow::SequenceNode;
pub use loops::{ForEachNode, LoopNode};
pub use math::SafeDivideNode;
pub use utility::DelayNode;

use blueprint_types::Value;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::functions::{FunctionInputNode, FunctionOutputNode};
use crate::node::Node;
use crate::registry::NodeRegistry;

/// Register every built-in node type
pub fn register_builtins(registry: &mut NodeRegistry) {
    constants::register(registry);
    math::register(registry);
    flow::register(registry);
    loops::register(registry);
    variables::register(registry);
    data::register(registry);
    utility::register(registry);
    registry.register(|| -> Box<dyn Node> { Box::new(FunctionInputNode::new()) });
    registry.register(|| -> Box<dyn Node> { Box::new(FunctionOutputNode::new()) });
}

// ─────────────────────────────────────────────────────────────────────────────
// Input helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Numeric input, or `default` when nothing was resolved
pub(crate) fn number_input(ctx: &ExecutionContext<'_>, pin: &str, default: f64) -> Result<f64> {
    match ctx.get_input_value(pin) {
        Some(value) if !value.is_null() => Ok(value.as_number()?),
        _ => Ok(default),
    }
}

pub(crate) fn integer_input(ctx: &ExecutionContext<'_>, pin: &str, default: i64) -> Result<i64> {
    match ctx.get_input_value(pin) {
        Some(value) if !value.is_null() => Ok(value.as_integer()?),
        _ => Ok(default),
    }
}

pub(crate) fn string_input(ctx: &ExecutionContext<'_>, pin: &str) -> Result<String> {
    Ok(ctx.require_input(pin)?.as_string()?)
}

/// Integral results stay integers
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        Value::Int(n as i64)
    } else {
        Value::Float(n)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use blueprint_types::Blueprint;

    use crate::engine::{Engine, ExecutionRequest, ExecutionResult};

    pub async fn run(blueprint: Blueprint) -> ExecutionResult {
        Engine::with_builtins()
            .execute(Arc::new(blueprint), ExecutionRequest::new("tester"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(8.0), Value::Int(8));
        assert_eq!(number_value(2.5), Value::Float(2.5));
        assert_eq!(number_value(-3.0), Value::Int(-3));
    }

    #[test]
    fn test_catalog_categories() {
        let registry = NodeRegistry::with_builtins();
        let categories = registry.categories();
        for category in ["Constants", "Math", "Flow Control", "Variables", "Data", "Utilities", "Functions"] {
            assert!(categories.iter().any(|c| c == category), "missing {}", category);
        }
        assert!(registry.get_definition("number-constant").is_some_and(|d| d.metadata.pure));
        assert!(registry.get_definition("loop").is_some_and(|d| d.has_exec_pins()));
    }
}
