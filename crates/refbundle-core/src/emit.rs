//! Serialization of output trees to JSON or YAML text.
//!
//! JSON goes through serde_json. YAML uses a small block-style writer over
//! the JSON data model; serde_yaml decides how each plain scalar is quoted.

use std::string::FromUtf8Error;

use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::{EmitOptions, OutputFormat};
use crate::tree::Tree;

/// Failure to serialize an output tree.
#[derive(Debug, Error)]
pub enum EmitError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("output is not valid UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
}

/// Render `tree` as text. The result has no trailing newline.
pub fn emit(tree: &Tree, options: &EmitOptions) -> Result<String, EmitError> {
    match options.format {
        OutputFormat::Json => emit_json(tree, options.indent),
        OutputFormat::Yaml => {
            let mut writer = YamlWriter::new(options.indent, options.wrap);
            writer.value(&tree.to_value(), 0)?;
            Ok(writer.lines.join("\n"))
        }
    }
}

fn emit_json(tree: &Tree, indent: usize) -> Result<String, EmitError> {
    if indent == 0 {
        return Ok(serde_json::to_string(tree)?);
    }
    let indent = vec![b' '; indent];
    let mut ser = serde_json::Serializer::with_formatter(Vec::new(), PrettyFormatter::with_indent(&indent));
    tree.serialize(&mut ser)?;
    Ok(String::from_utf8(ser.into_inner())?)
}

// ---------------------------------------------------------------------------
// YAML
// ---------------------------------------------------------------------------

struct YamlWriter {
    /// Columns per mapping level.
    indent: usize,
    /// Sequence item marker, `-` padded to the indent width.
    dash: String,
    wrap: Option<usize>,
    lines: Vec<String>,
}

fn spaces(n: usize) -> String {
    " ".repeat(n)
}

impl YamlWriter {
    fn new(indent: usize, wrap: Option<usize>) -> Self {
        let indent = indent.max(1);
        Self {
            indent,
            dash: format!("{:<width$}", "-", width = indent.max(2)),
            wrap,
            lines: Vec::new(),
        }
    }

    /// Write a node whose lines start at `col`.
    fn value(&mut self, value: &Value, col: usize) -> Result<(), EmitError> {
        match value {
            Value::Object(obj) if !obj.is_empty() => self.mapping(obj, col),
            Value::Array(items) if !items.is_empty() => self.sequence(items, col),
            scalar => {
                let (head, body) = self.scalar(scalar, col + self.indent)?;
                self.lines.push(format!("{}{}", spaces(col), head));
                self.lines.extend(body);
                Ok(())
            }
        }
    }

    fn mapping(&mut self, obj: &Map<String, Value>, col: usize) -> Result<(), EmitError> {
        for (key, value) in obj {
            let lead = format!("{}{}:", spaces(col), quote(key)?);
            let child_col = col + self.indent;
            match value {
                Value::Object(inner) if !inner.is_empty() => {
                    self.lines.push(lead);
                    self.mapping(inner, child_col)?;
                }
                Value::Array(items) if !items.is_empty() => {
                    self.lines.push(lead);
                    self.sequence(items, child_col)?;
                }
                scalar => {
                    let (head, body) = self.scalar(scalar, child_col)?;
                    self.lines.push(format!("{} {}", lead, head));
                    self.lines.extend(body);
                }
            }
        }
        Ok(())
    }

    fn sequence(&mut self, items: &[Value], col: usize) -> Result<(), EmitError> {
        let inner = col + self.dash.len();
        for item in items {
            let nested = match item {
                Value::Object(obj) => !obj.is_empty(),
                Value::Array(items) => !items.is_empty(),
                _ => false,
            };

            if nested {
                // Render at the item's content column, then put the dash
                // into the first line's indentation.
                let start = self.lines.len();
                self.value(item, inner)?;
                let rest = self.lines[start][inner..].to_string();
                self.lines[start] = format!("{}{}{}", spaces(col), self.dash, rest);
            } else {
                let (head, body) = self.scalar(item, inner)?;
                self.lines.push(format!("{}{}{}", spaces(col), self.dash, head));
                self.lines.extend(body);
            }
        }
        Ok(())
    }

    /// Inline text of a scalar, plus the body lines of a block scalar
    /// indented at `content_col`.
    fn scalar(&self, value: &Value, content_col: usize) -> Result<(String, Vec<String>), EmitError> {
        let inline = match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Object(_) => "{}".to_string(),
            Value::Array(_) => "[]".to_string(),
            Value::String(s) => {
                if let Some(block) = literal_block(s, content_col) {
                    return Ok(block);
                }
                if let Some(block) = self.wrap.and_then(|wrap| folded_block(s, content_col, wrap)) {
                    return Ok(block);
                }
                quote(s)?
            }
        };
        Ok((inline, Vec::new()))
    }
}

/// serde_yaml's quoting of a single-line string, or JSON double quotes for
/// anything serde_yaml would spread over several lines.
fn quote(s: &str) -> Result<String, EmitError> {
    let rendered = serde_yaml::to_string(s)?;
    let rendered = rendered.trim_end_matches('\n');
    if rendered.contains('\n') {
        return Ok(serde_json::to_string(s)?);
    }
    Ok(rendered.to_string())
}

fn has_control(s: &str) -> bool {
    s.chars().any(|c| c.is_control() && c != '\n' && c != '\t')
}

/// `|`, `|-` or `|+` block for a multi-line string.
fn literal_block(s: &str, content_col: usize) -> Option<(String, Vec<String>)> {
    if !s.contains('\n') || has_control(s) {
        return None;
    }
    let content = s.trim_end_matches('\n');
    // Indentation is detected from the first non-empty line.
    match content.lines().find(|line| !line.is_empty()) {
        Some(line) if !line.starts_with([' ', '\t']) => {}
        _ => return None,
    }

    let trailing = s.len() - content.len();
    let header = match trailing {
        0 => "|-",
        1 => "|",
        _ => "|+",
    };

    let pad = spaces(content_col);
    let mut body: Vec<String> = content
        .split('\n')
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{}{}", pad, line)
            }
        })
        .collect();
    body.extend(std::iter::repeat(String::new()).take(trailing.saturating_sub(1)));
    Some((header.to_string(), body))
}

/// `>-` block for a long run of single-space separated words.
fn folded_block(s: &str, content_col: usize, wrap: usize) -> Option<(String, Vec<String>)> {
    let width = wrap.saturating_sub(content_col).max(1);
    let foldable = s.chars().count() > width
        && s.contains(' ')
        && !s.contains("  ")
        && !s.starts_with(char::is_whitespace)
        && !s.ends_with(char::is_whitespace)
        && !s.chars().any(char::is_control);
    if !foldable {
        return None;
    }

    let pad = spaces(content_col);
    let mut body = Vec::new();
    let mut line = String::new();
    let mut line_width = 0;
    for word in s.split(' ') {
        let word_width = word.chars().count();
        if !line.is_empty() && line_width + 1 + word_width > width {
            body.push(format!("{}{}", pad, line));
            line.clear();
            line_width = 0;
        }
        if !line.is_empty() {
            line.push(' ');
            line_width += 1;
        }
        line.push_str(word);
        line_width += word_width;
    }
    body.push(format!("{}{}", pad, line));
    Some((">-".to_string(), body))
}

// ===========================================================================
// Tests
// ===========================================================================
