//! Blueprint CLI support
//!
//! File loading and argument parsing shared by the `blueprint` binary.

use std::path::Path;

use anyhow::{Context, Result, bail};

use blueprint_runtime::EngineConfig;
use blueprint_types::{Blueprint, Value};

/// Read a blueprint from a `.json` or `.toml` file
pub fn load_blueprint(path: &Path) -> Result<Blueprint> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read blueprint {}", path.display()))?;

    let blueprint: Blueprint = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text)
            .with_context(|| format!("invalid blueprint TOML in {}", path.display()))?,
        Some("json") | None => serde_json::from_str(&text)
            .with_context(|| format!("invalid blueprint JSON in {}", path.display()))?,
        Some(other) => bail!("unsupported blueprint format '.{}'", other),
    };

    blueprint
        .validate()
        .with_context(|| format!("malformed blueprint {}", path.display()))?;
    Ok(blueprint)
}

/// Engine configuration: a file when given, otherwise defaults plus environment
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::from_env()?,
    };
    Ok(config)
}

/// Parse `key=value`. The value is read as JSON when it parses, else as a string.
pub fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected key=value, got '{}'", raw);
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in '{}'", raw);
    }
    let value = serde_json::from_str::<serde_json::Value>(value)
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(value));
    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("n=3").unwrap(), ("n".to_string(), Value::Int(3)));
        assert_eq!(
            parse_assignment("name=alice").unwrap(),
            ("name".to_string(), Value::from("alice"))
        );
        assert_eq!(
            parse_assignment("flag = true").unwrap(),
            ("flag".to_string(), Value::Bool(true))
        );
        assert_eq!(
            parse_assignment("expr=a=b").unwrap(),
            ("expr".to_string(), Value::from("a=b"))
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }

    #[test]
    fn test_load_json_blueprint() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "id": "hello",
                "name": "Hello",
                "nodes": [{{ "id": "p", "type": "print", "properties": {{ "message": "hi" }} }}],
                "connections": []
            }}"#
        )
        .unwrap();

        let blueprint = load_blueprint(file.path()).unwrap();
        assert_eq!(blueprint.id, "hello");
        assert_eq!(blueprint.nodes[0].node_type, "print");
        assert_eq!(blueprint.nodes[0].properties["message"], Value::from("hi"));
    }

    #[test]
    fn test_load_toml_blueprint() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
id = "sum"
name = "Sum"

[[nodes]]
id = "add"
type = "add"
properties = {{ a = 1, b = 2 }}

[[outputs]]
name = "total"
nodeID = "add"
pinID = "result"
"#
        )
        .unwrap();

        let blueprint = load_blueprint(file.path()).unwrap();
        assert_eq!(blueprint.outputs[0].name, "total");
        assert_eq!(blueprint.nodes[0].properties["b"], Value::Int(2));
    }

    #[test]
    fn test_rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(load_blueprint(file.path()).is_err());
    }

    #[test]
    fn test_duplicate_nodes_are_malformed() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "id": "dup", "name": "Dup", "nodes": [{{ "id": "a", "type": "print" }}, {{ "id": "a", "type": "print" }}] }}"#
        )
        .unwrap();
        assert!(load_blueprint(file.path()).is_err());
    }
}
