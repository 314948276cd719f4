//! Variable substitution engine for templates

use super::{Node, TemplateError, TemplateResult};

/// Render parsed nodes into `out`, resolving fields against `data`
pub(super) fn render_nodes(
    name: &str,
    nodes: &[Node],
    data: &serde_json::Value,
    out: &mut String,
) -> TemplateResult<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Field(field) => {
                let value = lookup(name, data, field)?;
                out.push_str(&value_to_string(value));
            }
            Node::If {
                field,
                then,
                otherwise,
            } => {
                let value = lookup(name, data, field)?;
                let branch = if is_truthy(value) { then } else { otherwise };
                render_nodes(name, branch, data, out)?;
            }
        }
    }

    Ok(())
}

fn lookup<'a>(
    name: &str,
    data: &'a serde_json::Value,
    field: &str,
) -> TemplateResult<&'a serde_json::Value> {
    field
        .split('.')
        .try_fold(data, |current, segment| match current {
            serde_json::Value::Object(map) => map.get(segment),
            _ => None,
        })
        .ok_or_else(|| TemplateError::Execute {
            name: name.to_string(),
            reason: format!("can't evaluate field {:?}", field),
        })
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "".to_string(),
        // For arrays and objects, use JSON representation
        _ => value.to_string(),
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        serde_json::Value::Array(arr) => !arr.is_empty(),
        serde_json::Value::Object(obj) => !obj.is_empty(),
    }
}
