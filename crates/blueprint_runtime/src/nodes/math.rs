// Math nodes - Arithmetic, comparison and guarded division

use std::cmp::Ordering;

use async_trait::async_trait;

use blueprint_types::{Pin, PinType, Value};

use super::{number_input, number_value};
use crate::context::ExecutionContext;
use crate::error::{BlueprintError, ErrorCode, Result};
use crate::engine::LAST_ERROR_PIN;
use crate::node::{BaseNode, Node, NodeMetadata};
use crate::registry::NodeRegistry;

#[derive(Debug, Clone, Copy)]
enum Op {
    Add,
    Subtract,
    Multiply,
    Divide,
}

fn binary_base(type_id: &str, name: &str) -> BaseNode {
    BaseNode::new(NodeMetadata::new(type_id, name, "Math"))
        .input(Pin::exec("exec"))
        .input(Pin::data_with_default("a", PinType::Number, 0))
        .input(Pin::data_with_default("b", PinType::Number, 0))
        .output(Pin::exec("then"))
        .output(Pin::data("result", PinType::Number))
}

/// Integer operands stay integers unless the result would overflow or divide unevenly
fn apply(op: Op, a: &Value, b: &Value) -> Result<Value> {
    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        let exact = match op {
            Op::Add => x.checked_add(*y),
            Op::Subtract => x.checked_sub(*y),
            Op::Multiply => x.checked_mul(*y),
            Op::Divide if *y != 0 && x % y == 0 => x.checked_div(*y),
            Op::Divide => None,
        };
        if let Some(n) = exact {
            return Ok(Value::Int(n));
        }
    }

    let (x, y) = (a.as_number()?, b.as_number()?);
    let n = match op {
        Op::Add => x + y,
        Op::Subtract => x - y,
        Op::Multiply => x * y,
        Op::Divide if y == 0.0 => return Err(division_by_zero(x)),
        Op::Divide => x / y,
    };
    Ok(Value::Float(n))
}

fn division_by_zero(dividend: f64) -> BlueprintError {
    BlueprintError::execution(ErrorCode::DivisionByZero, "division by zero")
        .with_detail("dividend", number_value(dividend))
}

fn arithmetic(ctx: &mut ExecutionContext<'_>, op: Op) -> Result<()> {
    let a = ctx.require_input("a")?;
    let b = ctx.require_input("b")?;
    let result = apply(op, &a, &b)?;
    ctx.set_output_value("result", result);
    ctx.activate_output_flow("then")
}

fn add(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    arithmetic(ctx, Op::Add)
}

fn subtract(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    arithmetic(ctx, Op::Subtract)
}

fn multiply(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    arithmetic(ctx, Op::Multiply)
}

fn divide(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    arithmetic(ctx, Op::Divide)
}

// ─────────────────────────────────────────────────────────────────────────────
// Compare
// ─────────────────────────────────────────────────────────────────────────────

fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn compare(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let a = ctx.get_input_value("a").unwrap_or_default();
    let b = ctx.get_input_value("b").unwrap_or_default();
    let operator = ctx
        .get_input_value("operator")
        .map(|v| v.as_string())
        .transpose()?
        .unwrap_or_else(|| "==".to_string());

    let result = match operator.as_str() {
        "==" => a.loose_eq(&b),
        "!=" => !a.loose_eq(&b),
        "<" | "<=" | ">" | ">=" => {
            let ord = ordering(&a, &b).ok_or_else(|| {
                BlueprintError::validation(
                    ErrorCode::TypeMismatch,
                    format!("cannot order {} and {}", a.type_name(), b.type_name()),
                )
            })?;
            match operator.as_str() {
                "<" => ord == Ordering::Less,
                "<=" => ord != Ordering::Greater,
                ">" => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }
        }
        other => {
            return Err(BlueprintError::validation(
                ErrorCode::InvalidInput,
                format!("unknown comparison operator '{}'", other),
            )
            .with_detail("pin", "operator"));
        }
    };
    ctx.set_output_value("result", result);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Safe Divide
// ─────────────────────────────────────────────────────────────────────────────

/// Division that asks for recovery instead of failing on a zero divisor.
///
/// With `errorHandlingMode = "auto"` the error is reported, a recovery
/// strategy supplies the result and execution continues through `then`.
/// In `strict` mode the error is raised and routed to the `error` pin.
pub struct SafeDivideNode {
    base: BaseNode,
}

impl SafeDivideNode {
    pub fn new() -> Self {
        Self {
            base: BaseNode::new(
                NodeMetadata::new("safe-divide", "Safe Divide", "Math")
                    .description("Divides, substituting a default for a zero divisor"),
            )
            .input(Pin::exec("exec"))
            .input(Pin::data("dividend", PinType::Number))
            .input(Pin::data("divisor", PinType::Number))
            .input(Pin::data_with_default("default", PinType::Number, 0))
            .output(Pin::exec("then"))
            .output(Pin::exec("error"))
            .output(Pin::data("result", PinType::Number))
            .output(Pin::data(LAST_ERROR_PIN, PinType::Object))
            .property("errorHandlingMode", "auto"),
        }
    }
}

impl Default for SafeDivideNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Node for SafeDivideNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseNode {
        &mut self.base
    }

    async fn execute(&self, ctx: &mut ExecutionContext<'_>) -> Result<()> {
        let dividend = ctx.require_input("dividend")?.as_number()?;
        let divisor = ctx.require_input("divisor")?.as_number()?;

        if divisor != 0.0 {
            ctx.set_output_value("result", number_value(dividend / divisor));
            return ctx.activate_output_flow("then");
        }

        let auto = ctx
            .get_property("errorHandlingMode")
            .and_then(Value::as_str)
            .is_none_or(|mode| mode != "strict");
        let err = division_by_zero(dividend);
        if !auto || !ctx.is_error_aware() {
            return Err(err);
        }

        let default = number_input(ctx, "default", 0.0)?;
        let err = ctx.report(err.with_detail("default", number_value(default)));
        let outcome = ctx.attempt_recovery(&err).await;
        match outcome.value() {
            Some(value) if outcome.success => {
                ctx.set_output_value("result", value.clone());
                ctx.activate_output_flow("then")
            }
            _ => {
                ctx.set_output_value(LAST_ERROR_PIN, err.to_value());
                ctx.activate_output_flow("error")
            }
        }
    }
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.register_fn(binary_base("add", "Add"), add);
    registry.register_fn(binary_base("subtract", "Subtract"), subtract);
    registry.register_fn(binary_base("multiply", "Multiply"), multiply);
    registry.register_fn(binary_base("divide", "Divide"), divide);
    registry.register_fn(
        BaseNode::new(NodeMetadata::new("compare", "Compare", "Math").pure())
            .input(Pin::data("a", PinType::Any).optional())
            .input(Pin::data("b", PinType::Any).optional())
            .input(Pin::data_with_default("operator", PinType::String, "=="))
            .output(Pin::data("result", PinType::Boolean)),
        compare,
    );
    registry.register(|| -> Box<dyn Node> { Box::new(SafeDivideNode::new()) });
}

#[cfg(test)]
mod tests {
    use blueprint_types::{Blueprint, BlueprintNode, Connection};

    use super::*;
    use crate::error::ErrorKind;
    use crate::nodes::testing::run;
    use crate::recovery::StrategyKind;

    #[test]
    fn test_integer_arithmetic_stays_integral() {
        assert_eq!(apply(Op::Add, &Value::Int(5), &Value::Int(3)).ok(), Some(Value::Int(8)));
        assert_eq!(apply(Op::Divide, &Value::Int(9), &Value::Int(3)).ok(), Some(Value::Int(3)));
        assert_eq!(apply(Op::Divide, &Value::Int(7), &Value::Int(2)).ok(), Some(Value::Float(3.5)));
        assert_eq!(
            apply(Op::Multiply, &Value::Float(1.5), &Value::Int(2)).ok(),
            Some(Value::Float(3.0))
        );
    }

    #[test]
    fn test_divide_by_zero() {
        let err = apply(Op::Divide, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Execution);
        assert_eq!(err.code, ErrorCode::DivisionByZero);
    }

    #[test]
    fn test_ordering() {
        assert_eq!(ordering(&Value::Int(1), &Value::Float(1.5)), Some(Ordering::Less));
        assert_eq!(ordering(&Value::from("b"), &Value::from("a")), Some(Ordering::Greater));
        assert_eq!(ordering(&Value::from("b"), &Value::Null), None);
    }

    #[tokio::test]
    async fn test_compare_is_pure() {
        let bp = Blueprint::new("cmp", "Compare")
            .with_node(
                BlueprintNode::new("c", "compare")
                    .with_property("a", 3)
                    .with_property("b", 4)
                    .with_property("operator", "<"),
            )
            .with_output("less", "c", "result");

        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.outputs["less"], Value::Bool(true));
    }

    fn safe_divide(mode: &str) -> Blueprint {
        Blueprint::new("sd", "Safe Divide")
            .with_node(
                BlueprintNode::new("div", "safe-divide")
                    .with_property("dividend", 10)
                    .with_property("divisor", 0)
                    .with_property("default", 42)
                    .with_property("errorHandlingMode", mode),
            )
            .with_node(BlueprintNode::new("after", "print").with_property("message", "ok"))
            .with_node(BlueprintNode::new("failed", "print").with_property("message", "failed"))
            .with_connection(Connection::execution("div", "then", "after", "exec"))
            .with_connection(Connection::execution("div", "error", "failed", "exec"))
            .with_output("result", "div", "result")
    }

    #[tokio::test]
    async fn test_safe_divide_auto_recovers() {
        let result = run(safe_divide("auto")).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.outputs["result"], Value::Int(42));

        let div = result.node_result("div").unwrap();
        assert_eq!(div.activated_flows, vec!["then".to_string()]);
        assert_eq!(div.errors.len(), 1);
        assert_eq!(div.errors[0].code, ErrorCode::DivisionByZero);
        assert!(result.node_result("after").is_some());
        assert!(result.node_result("failed").is_none());

        assert_eq!(result.recovery_attempts.len(), 1);
        assert!(result.recovery_attempts[0].success);
        assert_eq!(
            result.recovery_attempts[0].strategy,
            Some(StrategyKind::SubstituteDefault)
        );
    }

    #[tokio::test]
    async fn test_safe_divide_strict_routes_to_error() {
        let result = run(safe_divide("strict")).await;
        assert!(result.success, "{:?}", result.error);
        assert!(result.node_result("failed").is_some());
        assert!(result.node_result("after").is_none());

        let last_error = result.node_output("div", LAST_ERROR_PIN).unwrap();
        assert_eq!(last_error.get("code"), Some(&Value::from("division_by_zero")));
    }

    #[tokio::test]
    async fn test_safe_divide_plain() {
        let bp = Blueprint::new("sd", "Safe Divide")
            .with_node(
                BlueprintNode::new("div", "safe-divide")
                    .with_property("dividend", 10)
                    .with_property("divisor", 4),
            )
            .with_output("result", "div", "result");

        let result = run(bp).await;
        assert_eq!(result.outputs["result"], Value::Float(2.5));
        assert!(result.recovery_attempts.is_empty());
    }
}
