// Data nodes - Array operations over values and object properties

use std::cmp::Ordering;

use blueprint_types::{Pin, PinType, Value};

use super::string_input;
use crate::context::ExecutionContext;
use crate::error::{BlueprintError, ErrorCode, Result};
use crate::node::{BaseNode, NodeMetadata};
use crate::registry::NodeRegistry;

/// Operations understood by `array-ops`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArrayOp {
    Filter,
    Map,
    Find,
    Sort,
    Reverse,
    Length,
}

impl ArrayOp {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "filter" => ArrayOp::Filter,
            "map" => ArrayOp::Map,
            "find" => ArrayOp::Find,
            "sort" => ArrayOp::Sort,
            "reverse" => ArrayOp::Reverse,
            "length" | "count" => ArrayOp::Length,
            _ => return None,
        })
    }
}

/// Value at `path` inside `item`; an empty path is the item itself
fn project<'v>(item: &'v Value, path: &str) -> Option<&'v Value> {
    item.get_path(path)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order for sorting: numbers numerically, strings lexically, otherwise by type
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ if a.is_number() && b.is_number() => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .unwrap_or(Ordering::Equal),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Apply an operation. Returns the result and the length reported with it.
fn apply(op: ArrayOp, items: Vec<Value>, path: &str, filter: Option<&Value>) -> (Value, usize) {
    let matches = |item: &Value| match filter {
        Some(expected) => project(item, path).is_some_and(|v| v.loose_eq(expected)),
        None => project(item, path).is_some_and(|v| !v.is_null()),
    };

    match op {
        ArrayOp::Filter => {
            let kept: Vec<Value> = items.into_iter().filter(|item| matches(item)).collect();
            let len = kept.len();
            (Value::Array(kept), len)
        }
        ArrayOp::Map => {
            let mapped: Vec<Value> = items
                .iter()
                .map(|item| project(item, path).cloned().unwrap_or(Value::Null))
                .collect();
            let len = mapped.len();
            (Value::Array(mapped), len)
        }
        ArrayOp::Find => match items.into_iter().find(|item| matches(item)) {
            Some(found) => (found, 1),
            None => (Value::Null, 0),
        },
        ArrayOp::Sort => {
            let mut sorted = items;
            sorted.sort_by(|a, b| {
                let null = Value::Null;
                compare_values(project(a, path).unwrap_or(&null), project(b, path).unwrap_or(&null))
            });
            let len = sorted.len();
            (Value::Array(sorted), len)
        }
        ArrayOp::Reverse => {
            let mut reversed = items;
            reversed.reverse();
            let len = reversed.len();
            (Value::Array(reversed), len)
        }
        ArrayOp::Length => (Value::from(items.len()), items.len()),
    }
}

fn array_ops(ctx: &mut ExecutionContext<'_>) -> Result<()> {
    let name = string_input(ctx, "operation")?;
    let op = ArrayOp::parse(&name).ok_or_else(|| {
        BlueprintError::validation(
            ErrorCode::InvalidInput,
            format!("unknown array operation '{}'", name),
        )
        .with_detail("pin", "operation")
    })?;
    let items = ctx.require_input("array")?.as_array()?;
    let path = ctx
        .get_input_value("propertyPath")
        .map(|v| v.as_string())
        .transpose()?
        .unwrap_or_default();
    let filter = ctx.get_input_value("filterValue").filter(|v| !v.is_null());

    let (result, length) = apply(op, items, &path, filter.as_ref());
    ctx.set_output_value("result", result);
    ctx.set_output_value("length", length);
    ctx.activate_output_flow("then")
}

pub(super) fn register(registry: &mut NodeRegistry) {
    registry.register_fn(
        BaseNode::new(
            NodeMetadata::new("array-ops", "Array Operations", "Data")
                .description("Filter, map, find, sort, reverse or count an array"),
        )
        .input(Pin::exec("exec"))
        .input(Pin::data_with_default("operation", PinType::String, "length"))
        .input(Pin::data("array", PinType::Array))
        .input(Pin::data("propertyPath", PinType::String).optional())
        .input(Pin::data("filterValue", PinType::Any).optional())
        .output(Pin::exec("then"))
        .output(Pin::data("result", PinType::Any))
        .output(Pin::data("length", PinType::Number)),
        array_ops,
    );
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use blueprint_types::{Blueprint, BlueprintNode};

    use super::*;
    use crate::nodes::testing::run;

    fn record(k: i64, name: &str) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("k".to_string(), Value::Int(k));
        fields.insert("name".to_string(), Value::from(name));
        Value::Object(fields)
    }

    fn records() -> Vec<Value> {
        vec![record(1, "a"), record(2, "b"), record(1, "c")]
    }

    #[test]
    fn test_filter_and_find() {
        let (result, len) = apply(ArrayOp::Filter, records(), "k", Some(&Value::Int(1)));
        assert_eq!(len, 2);
        assert_eq!(result, Value::Array(vec![record(1, "a"), record(1, "c")]));

        let (found, len) = apply(ArrayOp::Find, records(), "k", Some(&Value::Int(2)));
        assert_eq!(len, 1);
        assert_eq!(found, record(2, "b"));

        let (missing, len) = apply(ArrayOp::Find, records(), "k", Some(&Value::Int(9)));
        assert_eq!((missing, len), (Value::Null, 0));
    }

    #[test]
    fn test_map_and_sort() {
        let (names, _) = apply(ArrayOp::Map, records(), "name", None);
        assert_eq!(names, Value::from(vec!["a", "b", "c"]));

        let (sorted, _) = apply(ArrayOp::Sort, records(), "k", None);
        let keys: Vec<_> = sorted
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.get("name").cloned().unwrap())
            .collect();
        assert_eq!(keys, vec![Value::from("a"), Value::from("c"), Value::from("b")]);
    }

    #[test]
    fn test_mixed_sort_orders_by_type() {
        let items = vec![Value::from("x"), Value::Int(3), Value::Null, Value::Float(1.5)];
        let (sorted, len) = apply(ArrayOp::Sort, items, "", None);
        assert_eq!(len, 4);
        assert_eq!(
            sorted,
            Value::Array(vec![Value::Null, Value::Float(1.5), Value::Int(3), Value::from("x")])
        );
    }

    #[tokio::test]
    async fn test_filter_node() {
        let bp = Blueprint::new("arrays", "Arrays")
            .with_node(
                BlueprintNode::new("ops", "array-ops")
                    .with_property("operation", "filter")
                    .with_property("array", records())
                    .with_property("propertyPath", "k")
                    .with_property("filterValue", 1),
            )
            .with_output("items", "ops", "result")
            .with_output("count", "ops", "length");

        let result = run(bp).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.outputs["count"], Value::Int(2));
        assert_eq!(result.outputs["items"].as_array().map(|a| a.len()).ok(), Some(2));
        assert_eq!(result.node_result("ops").and_then(|r| r.last_flow()), Some("then"));
    }

    #[tokio::test]
    async fn test_unknown_operation() {
        let bp = Blueprint::new("arrays", "Arrays").with_node(
            BlueprintNode::new("ops", "array-ops")
                .with_property("operation", "explode")
                .with_property("array", Vec::<Value>::new()),
        );

        let result = run(bp).await;
        assert!(!result.success);
        assert_eq!(result.error.map(|e| e.code), Some(ErrorCode::InvalidInput));
    }
}
