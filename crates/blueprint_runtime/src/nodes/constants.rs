// Constant nodes - Literal values taken from the node's `value` property

use blueprint_types::{Pin, PinType, Value};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::node::{BaseNode, NodeMetadata};
use crate::registry::NodeRegistry;

fn constant_base(type_id: &str, name: &str, pin_type: PinType, default: Value) -> BaseNode {
    BaseNode::new(
        NodeMetadata::new(type_id, name, "Constants")
            .description("Outputs the literal in its value property")
            .pure(),
    )
    .output(Pin::data("value", pin_type))
    .property("value", default)
}

fn emit(ctx: &mut ExecutionContext<'_>, pin_type: PinType) -> Result<()> {
    let raw = ctx.get_property("value").cloned().unwrap_or_default();
    let value = pin_type.coerce(&raw)?;
    ctx.set_output_value("value", value);
    Ok(())
}

fn number_constant(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    emit(ctx, PinType::Number)
}

fn string_constant(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    emit(ctx, PinType::String)
}

fn boolean_constant(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    emit(ctx, PinType::Boolean)
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.register_fn(
        constant_base("number-constant", "Number", PinType::Number, Value::Int(0)),
        number_constant,
    );
    registry.register_fn(
        constant_base("string-constant", "String", PinType::String, Value::from("")),
        string_constant,
    );
    registry.register_fn(
        constant_base("boolean-constant", "Boolean", PinType::Boolean, Value::Bool(false)),
        boolean_constant,
    );
}

#[cfg(test)]
mod tests {
    use blueprint_types::{Blueprint, BlueprintNode};

    use super::*;
    use crate::error::ErrorCode;
    use crate::nodes::testing::run;

    #[tokio::test]
    async fn test_constants_coerce_their_property() {
        let bp = Blueprint::new("constants", "Constants")
            .with_node(BlueprintNode::new("n", "number-constant").with_property("value", "2.5"))
            .with_node(BlueprintNode::new("s", "string-constant").with_property("value", 12))
            .with_node(BlueprintNode::new("b", "boolean-constant").with_property("value", "yes"))
            .with_output("n", "n", "value")
            .with_output("s", "s", "value")
            .with_output("b", "b", "value");

        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.outputs["n"], Value::Float(2.5));
        assert_eq!(result.outputs["s"], Value::from("12"));
        assert_eq!(result.outputs["b"], Value::Bool(true));
    }

    #[tokio::test]
    async fn test_bad_literal_fails() {
        let bp = Blueprint::new("constants", "Constants")
            .with_node(BlueprintNode::new("n", "number-constant").with_property("value", "abc"))
            .with_output("n", "n", "value");

        let result = run(bp).await;
        assert!(!result.success);
        assert_eq!(result.error.map(|e| e.code), Some(ErrorCode::TypeMismatch));
    }
}
