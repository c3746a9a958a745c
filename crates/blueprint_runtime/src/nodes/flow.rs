// Flow control nodes - Branch, If and Sequence

use async_trait::async_trait;

use blueprint_types::{Pin, PinType, Value};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::node::{BaseNode, Node, NodeMetadata};
use crate::registry::NodeRegistry;

const CASES: usize = 4;
const SEQUENCE_PINS: [&str; 4] = ["then1", "then2", "then3", "then4"];

fn branch_base() -> BaseNode {
    let mut base = BaseNode::new(
        NodeMetadata::new("branch", "Branch", "Flow Control")
            .description("Continues through the first case equal to the value"),
    )
    .input(Pin::exec("exec"))
    .input(Pin::data("value", PinType::Any).optional());
    for i in 1..=CASES {
        base = base.input(Pin::data(&format!("case{}", i), PinType::Any).optional());
    }
    for i in 1..=CASES {
        base = base.output(Pin::exec(&format!("case{}_out", i)));
    }
    base.output(Pin::exec("default"))
        .output(Pin::data("matched_case", PinType::Number))
}

/// First case loosely equal to the value. Null never matches.
fn matching_case(value: &Value, cases: &[Option<Value>]) -> Option<usize> {
    if value.is_null() {
        return None;
    }
    cases
        .iter()
        .position(|case| case.as_ref().is_some_and(|c| !c.is_null() && value.loose_eq(c)))
        .map(|i| i + 1)
}

fn branch(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let value = ctx.get_input_value("value").unwrap_or_default();
    let cases: Vec<Option<Value>> = (1..=CASES)
        .map(|i| ctx.get_input_value(&format!("case{}", i)))
        .collect();

    match matching_case(&value, &cases) {
        Some(i) => {
            ctx.set_output_value("matched_case", i);
            ctx.activate_output_flow(&format!("case{}_out", i))
        }
        None => {
            ctx.set_output_value("matched_case", 0);
            ctx.activate_output_flow("default")
        }
    }
}

fn if_node(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let condition = ctx.require_input("condition")?.as_boolean()?;
    ctx.activate_output_flow(if condition { "true" } else { "false" })
}

// ─────────────────────────────────────────────────────────────────────────────
// Sequence
// ─────────────────────────────────────────────────────────────────────────────

/// Runs each `thenN` branch to completion in order, then `completed`
pub struct SequenceNode {
    base: BaseNode,
}

impl SequenceNode {
    pub fn new() -> Self {
        let mut base = BaseNode::new(
            NodeMetadata::new("sequence", "Sequence", "Flow Control")
                .description("Runs its outputs one after another"),
        )
        .input(Pin::exec("exec"));
        for pin in SEQUENCE_PINS {
            base = base.output(Pin::exec(pin));
        }
        Self {
            base: base.output(Pin::exec("completed")),
        }
    }
}

impl Default for SequenceNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for SequenceNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        for pin in SEQUENCE_PINS {
            ctx.execute_connected_nodes(pin).await?;
        }
        ctx.activate_output_flow("completed")
    }
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.register_fn(branch_base(), branch);
    registry.register_fn(
        BaseNode::new(NodeMetadata::new("if", "If", "Flow Control"))
            .input(Pin::exec("exec"))
            .input(Pin::data_with_default("condition", PinType::Boolean, false))
            .output(Pin::exec("true"))
            .output(Pin::exec("false")),
        if_node,
    );
    registry.register(|| -> Box<dyn Node> { Box::new(SequenceNode::new()) });
}

#[cfg(test)]
mod tests {
    use blueprint_types::{Blueprint, BlueprintNode, Connection};

    use super::*;
    use crate::nodes::testing::run;

    #[test]
    fn test_matching_case() {
        let cases = vec![Some(Value::Int(1)), None, Some(Value::Float(8.0)), None];
        assert_eq!(matching_case(&Value::Int(8), &cases), Some(3));
        assert_eq!(matching_case(&Value::Int(1), &cases), Some(1));
        assert_eq!(matching_case(&Value::Int(5), &cases), None);
        assert_eq!(matching_case(&Value::Null, &cases), None);
    }

    #[tokio::test]
    async fn test_branch_without_value_takes_default() {
        let bp = Blueprint::new("branch", "Branch")
            .with_node(BlueprintNode::new("b", "branch").with_property("case1", 1));

        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.node_output("b", "matched_case"), Some(&Value::Int(0)));
        assert_eq!(result.node_result("b").and_then(|r| r.last_flow()), Some("default"));
    }

    #[tokio::test]
    async fn test_if_routes_on_condition() {
        let bp = Blueprint::new("if", "If")
            .with_node(BlueprintNode::new("check", "if").with_property("condition", "true"))
            .with_node(BlueprintNode::new("yes", "print").with_property("message", "yes"))
            .with_node(BlueprintNode::new("no", "print").with_property("message", "no"))
            .with_connection(Connection::execution("check", "true", "yes", "exec"))
            .with_connection(Connection::execution("check", "false", "no", "exec"));

        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.executions("yes"), 1);
        assert_eq!(result.executions("no"), 0);
    }

    #[tokio::test]
    async fn test_sequence_runs_branches_in_order() {
        let bp = Blueprint::new("seq", "Sequence")
            .with_node(BlueprintNode::new("seq", "sequence"))
            .with_node(BlueprintNode::new("first", "print").with_property("message", "1"))
            .with_node(BlueprintNode::new("first_next", "print").with_property("message", "1b"))
            .with_node(BlueprintNode::new("second", "print").with_property("message", "2"))
            .with_node(BlueprintNode::new("done", "print").with_property("message", "done"))
            .with_connection(Connection::execution("seq", "then1", "first", "exec"))
            .with_connection(Connection::execution("first", "then", "first_next", "exec"))
            .with_connection(Connection::execution("seq", "then2", "second", "exec"))
            .with_connection(Connection::execution("seq", "completed", "done", "exec"));

        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            result.activation_order,
            vec!["seq", "first", "first_next", "second", "done"]
        );
        assert_eq!(result.node_result("seq").and_then(|r| r.last_flow()), Some("completed"));
    }

    #[tokio::test]
    async fn test_sequence_halts_on_error() {
        let bp = Blueprint::new("seq", "Sequence")
            .with_node(BlueprintNode::new("seq", "sequence"))
            .with_node(
                BlueprintNode::new("boom", "divide")
                    .with_property("a", 1)
                    .with_property("b", 0),
            )
            .with_node(BlueprintNode::new("second", "print").with_property("message", "2"))
            .with_connection(Connection::execution("seq", "then1", "boom", "exec"))
            .with_connection(Connection::execution("seq", "then2", "second", "exec"));

        let result = run(bp).await;
        assert!(!result.success);
        assert_eq!(result.executions("second"), 0);
    }
}
