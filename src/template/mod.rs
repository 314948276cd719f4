//! Mail template system.
//!
//! This module provides:
//! - Template parsing with `{{field}}` placeholders and `{{#if field}}...{{else}}...{{/if}}` blocks
//! - Up-front validation, so a broken template source is reported once at startup
//! - Variable substitution against any `Serialize` view
//!
//! # Example
//!
//! ```ignore
//! let template = Template::parse("greeting", "Hello{{#if name}}, {{name}}{{/if}}!")?;
//!
//! let rendered = template.render(&json!({ "name": "World" }))?;
//! assert_eq!(rendered, "Hello, World!");
//! ```

mod substitution;

use serde::Serialize;
use thiserror::Error;

/// Template-specific error type
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template: {name}:{line}: {reason}")]
    Parse {
        name: String,
        line: usize,
        reason: String,
    },

    #[error("template: {name}: {reason}")]
    Execute { name: String, reason: String },
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// A parsed template node
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Text(String),
    Field(String),
    If {
        field: String,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// A block that is still being parsed
struct Block {
    field: Option<String>,
    line: usize,
    then: Vec<Node>,
    otherwise: Option<Vec<Node>>,
}

impl Block {
    fn new(field: Option<String>, line: usize) -> Self {
        Self {
            field,
            line,
            then: Vec::new(),
            otherwise: None,
        }
    }

    fn push(&mut self, node: Node) {
        match self.otherwise.as_mut() {
            Some(otherwise) => otherwise.push(node),
            None => self.then.push(node),
        }
    }
}

/// A parsed, validated template
#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse a template source.
    ///
    /// Every action is checked here: unclosed `{{`, malformed field names and
    /// unbalanced `#if` blocks are all parse errors.
    pub fn parse(name: &str, source: &str) -> TemplateResult<Self> {
        let parse_error = |offset: usize, reason: String| TemplateError::Parse {
            name: name.to_string(),
            line: line_at(source, offset),
            reason,
        };

        let mut stack = vec![Block::new(None, 1)];
        let mut offset = 0;

        while let Some(start) = source[offset..].find("{{") {
            let start = offset + start;
            if start > offset {
                push_node(&mut stack, Node::Text(source[offset..start].to_string()));
            }

            let body_start = start + 2;
            let end = match source[body_start..].find("}}") {
                Some(end) => body_start + end,
                None => {
                    return Err(parse_error(
                        start,
                        "unexpected unclosed action".to_string(),
                    ))
                }
            };
            let action = source[body_start..end].trim();

            let condition = action
                .strip_prefix("#if")
                .filter(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace));

            if let Some(field) = condition {
                let field = validate_field(field.trim())
                    .map_err(|reason| parse_error(start, reason))?;
                stack.push(Block::new(Some(field), line_at(source, start)));
            } else if action == "else" {
                let top = stack
                    .last_mut()
                    .filter(|block| block.field.is_some() && block.otherwise.is_none())
                    .ok_or_else(|| parse_error(start, "unexpected {{else}}".to_string()))?;
                top.otherwise = Some(Vec::new());
            } else if action == "/if" {
                if stack.len() == 1 {
                    return Err(parse_error(start, "unexpected {{/if}}".to_string()));
                }
                if let Some(block) = stack.pop() {
                    push_node(
                        &mut stack,
                        Node::If {
                            field: block.field.unwrap_or_default(),
                            then: block.then,
                            otherwise: block.otherwise.unwrap_or_default(),
                        },
                    );
                }
            } else {
                let field = validate_field(action).map_err(|reason| parse_error(start, reason))?;
                push_node(&mut stack, Node::Field(field));
            }

            offset = end + 2;
        }

        if offset < source.len() {
            push_node(&mut stack, Node::Text(source[offset..].to_string()));
        }

        if stack.len() > 1 {
            let line = stack.last().map(|block| block.line).unwrap_or(1);
            return Err(TemplateError::Parse {
                name: name.to_string(),
                line,
                reason: "unclosed {{#if}} block".to_string(),
            });
        }

        let nodes = stack.pop().map(|root| root.then).unwrap_or_default();

        Ok(Self {
            name: name.to_string(),
            nodes,
        })
    }

    /// Template name used in error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the template against a serializable view.
    ///
    /// Referencing a field the view does not have is an execution error.
    pub fn render<T: Serialize>(&self, data: &T) -> TemplateResult<String> {
        let value = serde_json::to_value(data).map_err(|e| TemplateError::Execute {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let mut out = String::new();
        substitution::render_nodes(&self.name, &self.nodes, &value, &mut out)?;
        Ok(out)
    }
}

fn push_node(stack: &mut [Block], node: Node) {
    if let Some(top) = stack.last_mut() {
        top.push(node);
    }
}

fn validate_field(field: &str) -> Result<String, String> {
    let valid = !field.is_empty()
        && field.split('.').all(|segment| {
            !segment.is_empty() && segment.chars().all(|c| c.is_alphanumeric() || c == '_')
        });

    if valid {
        Ok(field.to_string())
    } else {
        Err(format!("bad field name {:?} in action", field))
    }
}

fn line_at(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}
