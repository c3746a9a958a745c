// Variable nodes - Read and write the execution's variables

use blueprint_types::{Pin, PinType, Value};

use super::string_input;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::node::{BaseNode, NodeMetadata};
use crate::registry::NodeRegistry;

fn set_variable(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let name = string_input(ctx, "name")?;
    let value = ctx.get_input_value("value").unwrap_or_default();
    ctx.logger().debug(&format!("{} = {:?}", name, value));
    ctx.set_variable(&name, value);
    ctx.set_output_value("result", true);
    ctx.activate_output_flow("then")
}

fn get_variable(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let name = string_input(ctx, "name")?;
    let value = ctx.get_variable(&name).unwrap_or(Value::Null);
    ctx.set_output_value("value", value);
    ctx.activate_output_flow("then")
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.register_fn(
        BaseNode::new(NodeMetadata::new("set-variable", "Set Variable", "Variables"))
            .input(Pin::exec("exec"))
            .input(Pin::data("name", PinType::String))
            .input(Pin::data("value", PinType::Any).optional())
            .output(Pin::exec("then"))
            .output(Pin::data("result", PinType::Boolean)),
        set_variable,
    );
    registry.register_fn(
        BaseNode::new(NodeMetadata::new("get-variable", "Get Variable", "Variables"))
            .input(Pin::exec("exec"))
            .input(Pin::data("name", PinType::String))
            .output(Pin::exec("then"))
            .output(Pin::data("value", PinType::Any)),
        get_variable,
    );
}
