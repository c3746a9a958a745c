// Loop nodes - Counted and list iteration
//
// Both nodes only set up a loop context; the scheduler runs the body chain
// once per iteration after execute returns.

use async_trait::async_trait;

use blueprint_types::{Pin, PinType};

use super::integer_input;
use crate::context::ExecutionContext;
use crate::error::{BlueprintError, ErrorCode, Result};
use crate::loop_actor::{BODY_PIN, COMPLETED_PIN};
use crate::node::{BaseNode, Node, NodeMetadata};
use crate::registry::NodeRegistry;

fn loop_not_supported(node_type: &str) -> BlueprintError {
    BlueprintError::execution(
        ErrorCode::LoopNotSupported,
        format!("'{}' cannot run during data evaluation", node_type),
    )
}

/// Runs its `loop` output `iterations` times, publishing `index`
pub struct LoopNode {
    base: BaseNode,
}

impl LoopNode {
    pub fn new() -> Self {
        Self {
            base: BaseNode::new(
                NodeMetadata::new("loop", "Loop", "Flow Control")
                    .description("Repeats its body a fixed number of times"),
            )
            .input(Pin::exec("exec"))
            .input(Pin::data("iterations", PinType::Number))
            .input(Pin::data_with_default("startValue", PinType::Number, 0))
            .output(Pin::exec(BODY_PIN))
            .output(Pin::exec(COMPLETED_PIN))
            .output(Pin::data("index", PinType::Number)),
        }
    }
}

impl Default for LoopNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for LoopNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let iterations = ctx.require_input("iterations")?.as_integer()?;
        let start = integer_input(ctx, "startValue", 0)?;
        let node_type = ctx.node_type().to_string();

        let Some(lp) = ctx.create_loop_context("index", iterations, start) else {
            return Err(loop_not_supported(&node_type));
        };
        lp.initialize_loop(start, iterations)
    }
}

/// Runs its `loop` output once per array element
pub struct ForEachNode {
    base: BaseNode,
}

impl ForEachNode {
    pub fn new() -> Self {
        Self {
            base: BaseNode::new(
                NodeMetadata::new("for-each", "For Each", "Flow Control")
                    .description("Repeats its body for every element of an array"),
            )
            .input(Pin::exec("exec"))
            .input(Pin::data("array", PinType::Array))
            .output(Pin::exec(BODY_PIN))
            .output(Pin::exec(COMPLETED_PIN))
            .output(Pin::data("element", PinType::Any))
            .output(Pin::data("index", PinType::Number)),
        }
    }
}

impl Default for ForEachNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for ForEachNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let items = ctx.require_input("array")?.as_array()?;
        let count = items.len() as i64;
        let node_type = ctx.node_type().to_string();

        let Some(lp) = ctx.create_loop_context("element", count, 0) else {
            return Err(loop_not_supported(&node_type));
        };
        lp.with_items(items).initialize_loop(0, count)
    }
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.register(|| -> Box<dyn Node> { Box::new(LoopNode::new()) });
    registry.register(|| -> Box<dyn Node> { Box::new(ForEachNode::new()) });
}

#[cfg(test)]
mod tests {
    use blueprint_types::{Blueprint, BlueprintNode, Connection, Value};

    use super::*;
    use crate::nodes::testing::run;

    fn counted(iterations: i64) -> Blueprint {
        Blueprint::new("loop", "Loop")
            .with_node(
                BlueprintNode::new("loop", "loop")
                    .with_property("iterations", iterations)
                    .with_property("startValue", 0),
            )
            .with_node(BlueprintNode::new("body", "print"))
            .with_node(BlueprintNode::new("after", "print").with_property("message", "done"))
            .with_connection(Connection::execution("loop", "loop", "body", "exec"))
            .with_connection(Connection::data("loop", "index", "body", "message"))
            .with_connection(Connection::execution("loop", "completed", "after", "exec"))
    }

    #[tokio::test]
    async fn test_loop_runs_body_per_iteration() {
        let result = run(counted(3)).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.executions("body"), 3);
        assert_eq!(result.executions("after"), 1);
        assert_eq!(result.node_output("loop", "index"), Some(&Value::Int(2)));
        assert_eq!(result.node_result("loop").and_then(|r| r.last_flow()), Some("completed"));

        let printed: Vec<_> = result
            .debug
            .iter()
            .filter(|d| d.node_id == "body" && d.description == "print")
            .map(|d| d.value.clone())
            .collect();
        assert_eq!(printed, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn test_zero_iterations_completes_immediately() {
        let result = run(counted(0)).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.executions("body"), 0);
        assert_eq!(result.executions("after"), 1);
    }

    #[tokio::test]
    async fn test_loop_requires_iterations() {
        let bp = Blueprint::new("loop", "Loop")
            .with_node(BlueprintNode::new("loop", "loop"))
            .with_node(BlueprintNode::new("body", "print"))
            .with_connection(Connection::execution("loop", "loop", "body", "exec"));

        let result = run(bp).await;
        assert!(!result.success);
        let err = result.error.as_ref().unwrap();
        assert_eq!(err.code, ErrorCode::MissingRequiredInput);
        assert_eq!(err.node_id.as_deref(), Some("loop"));
        assert_eq!(result.executions("body"), 0);
    }

    #[tokio::test]
    async fn test_for_each_publishes_elements() {
        let bp = Blueprint::new("each", "For Each")
            .with_node(
                BlueprintNode::new("each", "for-each")
                    .with_property("array", vec![Value::from("a"), Value::from("b")]),
            )
            .with_node(BlueprintNode::new("body", "print"))
            .with_connection(Connection::execution("each", "loop", "body", "exec"))
            .with_connection(Connection::data("each", "element", "body", "message"));

        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.executions("body"), 2);
        assert_eq!(result.node_output("each", "element"), Some(&Value::from("b")));
        assert_eq!(result.node_output("each", "index"), Some(&Value::Int(1)));
    }
}
