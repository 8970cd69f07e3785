//! Block-style YAML writer for exported documents.
//!
//! Every string scalar is written double-quoted and never folded, so values
//! such as `"on"`, `"0123"` or long descriptions read back exactly as they
//! were stored. Reading goes through `serde_yaml`.

use serde_json::Value;

const INDENT: usize = 2;

/// Keys that a YAML 1.1 reader would resolve to something other than a string.
const RESERVED_KEYS: &[&str] = &["true", "false", "null", "yes", "no", "on", "off", "y", "n", "~"];

/// Renders `value` as block YAML with double-quoted strings.
pub fn to_quoted_yaml(value: &Value) -> Result<String, serde_json::Error> {
    let mut out = String::new();
    match value {
        Value::Object(map) if !map.is_empty() => write_mapping(map, 0, &mut out)?,
        Value::Array(items) if !items.is_empty() => write_sequence(items, 0, &mut out)?,
        other => {
            out.push_str(&scalar(other)?);
            out.push('\n');
        }
    }
    Ok(out)
}

fn write_mapping(
    map: &serde_json::Map<String, Value>,
    indent: usize,
    out: &mut String,
) -> Result<(), serde_json::Error> {
    for (key, value) in map {
        out.push_str(&" ".repeat(indent));
        out.push_str(&mapping_key(key)?);
        out.push(':');
        write_nested(value, indent, out)?;
    }
    Ok(())
}

fn write_sequence(items: &[Value], indent: usize, out: &mut String) -> Result<(), serde_json::Error> {
    for item in items {
        match item {
            Value::Object(map) if !map.is_empty() => {
                // The first entry shares the line with the dash.
                let mut nested = String::new();
                write_mapping(map, indent + INDENT, &mut nested)?;
                push_as_item(&nested, indent, out);
            }
            Value::Array(inner) if !inner.is_empty() => {
                let mut nested = String::new();
                write_sequence(inner, indent + INDENT, &mut nested)?;
                push_as_item(&nested, indent, out);
            }
            other => {
                out.push_str(&" ".repeat(indent));
                out.push_str("- ");
                out.push_str(&scalar(other)?);
                out.push('\n');
            }
        }
    }
    Ok(())
}

fn write_nested(value: &Value, indent: usize, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) if !map.is_empty() => {
            out.push('\n');
            write_mapping(map, indent + INDENT, out)
        }
        Value::Array(items) if !items.is_empty() => {
            out.push('\n');
            write_sequence(items, indent + INDENT, out)
        }
        other => {
            out.push(' ');
            out.push_str(&scalar(other)?);
            out.push('\n');
            Ok(())
        }
    }
}

/// `nested` starts with `indent + INDENT` spaces; swap them for the dash.
fn push_as_item(nested: &str, indent: usize, out: &mut String) {
    out.push_str(&" ".repeat(indent));
    out.push_str("- ");
    out.push_str(&nested[indent + INDENT..]);
}

fn scalar(value: &Value) -> Result<String, serde_json::Error> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // JSON escapes are a subset of YAML double-quoted escapes.
        Value::String(s) => serde_json::to_string(s)?,
        Value::Array(_) => "[]".to_string(),
        Value::Object(_) => "{}".to_string(),
    })
}

fn mapping_key(key: &str) -> Result<String, serde_json::Error> {
    if is_plain_key(key) {
        Ok(key.to_string())
    } else {
        serde_json::to_string(key)
    }
}

fn is_plain_key(key: &str) -> bool {
    let mut chars = key.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    starts_ok
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !RESERVED_KEYS.iter().any(|r| r.eq_ignore_ascii_case(key))
}
