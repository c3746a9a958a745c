// Utility nodes - Print, Delay and schema lookup

use std::time::Duration;

use async_trait::async_trait;

use blueprint_types::{Pin, PinType, Value};

use super::{number_input, string_input};
use crate::context::ExecutionContext;
use crate::error::{BlueprintError, ErrorCode, Result};
use crate::node::{BaseNode, Node, NodeMetadata};
use crate::registry::NodeRegistry;

fn print(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let message = ctx
        .get_input_value("message")
        .map(|v| v.as_string())
        .transpose()?
        .unwrap_or_default();
    ctx.logger().info(&message);
    ctx.record_debug_info("print", &message);
    ctx.activate_output_flow("then")
}

fn schema_component(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let id = string_input(ctx, "componentId")?;
    let component = ctx
        .schema_access()
        .and_then(|store| store.get_schema_component(&id));
    if component.is_none() {
        ctx.logger().debug(&format!("schema component '{}' not found", id));
    }
    ctx.set_output_value("found", component.is_some());
    ctx.set_output_value("component", component.unwrap_or(Value::Null));
    ctx.activate_output_flow("then")
}

// ─────────────────────────────────────────────────────────────────────────────
// Delay
// ─────────────────────────────────────────────────────────────────────────────

/// Waits `duration` milliseconds. Aborting the run interrupts the wait.
pub struct DelayNode {
    base: BaseNode,
}

impl DelayNode {
    pub fn new() -> Self {
        Self {
            base: BaseNode::new(
                NodeMetadata::new("delay", "Delay", "Utilities")
                    .description("Pauses the flow for a number of milliseconds"),
            )
            .input(Pin::exec("exec"))
            .input(Pin::data_with_default("duration", PinType::Number, 0))
            .output(Pin::exec("then")),
        }
    }
}

impl Default for DelayNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for DelayNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let millis = number_input(ctx, "duration", 0.0)?.max(0.0) as u64;
        let token = ctx.cancellation_token();

        tokio::select! {
            _ = token.cancelled() => {
                return Err(BlueprintError::execution(ErrorCode::Cancelled, "delay interrupted"));
            }
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
        }
        ctx.activate_output_flow("then")
    }
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.register_fn(
        BaseNode::new(
            NodeMetadata::new("print", "Print", "Utilities")
                .description("Logs a message through the node logger"),
        )
        .input(Pin::exec("exec"))
        .input(Pin::data_with_default("message", PinType::String, ""))
        .output(Pin::exec("then")),
        print,
    );
    registry.register_fn(
        BaseNode::new(
            NodeMetadata::new("schema-component", "Schema Component", "Data")
                .description("Looks up a component in the attached schema store"),
        )
        .input(Pin::exec("exec"))
        .input(Pin::data("componentId", PinType::String))
        .output(Pin::exec("then"))
        .output(Pin::data("component", PinType::Any))
        .output(Pin::data("found", PinType::Boolean)),
        schema_component,
    );
    registry.register(|| -> Box<dyn Node> { Box::new(DelayNode::new()) });
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blueprint_types::{Blueprint, BlueprintNode};

    use super::*;
    use crate::context::SchemaStore;
    use crate::engine::{Engine, ExecutionRequest};
    use crate::nodes::testing::run;

    struct OneComponent;

    impl SchemaStore for OneComponent {
        fn get_schema_component(&self, id: &str) -> Option<Value> {
            (id == "button").then(|| Value::from("<button>"))
        }
    }

    fn lookup(id: &str) -> Arc<Blueprint> {
        Arc::new(
            Blueprint::new("schema", "Schema")
                .with_node(BlueprintNode::new("lookup", "schema-component").with_property("componentId", id)),
        )
    }

    #[tokio::test]
    async fn test_schema_component_lookup() {
        let engine = Engine::with_builtins().with_schema_store(Arc::new(OneComponent));

        let found = engine.execute(lookup("button"), ExecutionRequest::new("u")).await;
        assert!(found.success, "{:?}", found.error);
        assert_eq!(found.node_output("lookup", "found"), Some(&Value::Bool(true)));
        assert_eq!(found.node_output("lookup", "component"), Some(&Value::from("<button>")));

        let missing = engine.execute(lookup("slider"), ExecutionRequest::new("u")).await;
        assert_eq!(missing.node_output("lookup", "found"), Some(&Value::Bool(false)));
    }

    #[tokio::test]
    async fn test_schema_component_without_store() {
        let result = Engine::with_builtins()
            .execute(lookup("button"), ExecutionRequest::new("u"))
            .await;
        assert!(result.success);
        assert_eq!(result.node_output("lookup", "component"), Some(&Value::Null));
    }

    #[tokio::test]
    async fn test_print_records_message() {
        let bp = Blueprint::new("print", "Print")
            .with_node(BlueprintNode::new("p", "print").with_property("message", 42));

        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert!(result
            .debug
            .iter()
            .any(|d| d.node_id == "p" && d.description == "print" && d.value == "42"));
    }

    #[tokio::test]
    async fn test_delay_waits() {
        let bp = Blueprint::new("delay", "Delay")
            .with_node(BlueprintNode::new("wait", "delay").with_property("duration", 20));

        let started = std::time::Instant::now();
        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
