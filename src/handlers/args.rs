//! Modifier argument parsing.
//!
//! Raw argument strings are split on `_` into tokens and each token runs
//! through a permissive literal parser: booleans, null, numbers and JSON
//! fragments parse to their value, everything else stays a string.

use image::Rgba;
use serde_json::Value;

/// Permissive literal parser shared by modifier arguments and the flat
/// environment configuration values.
pub fn parse_literal(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Splits a raw modifier value into parsed argument tokens.
pub fn parse_args(value: &str) -> Vec<Value> {
    if value.is_empty() {
        return Vec::new();
    }
    value.split('_').map(parse_literal).collect()
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

pub fn int_arg(args: &[Value], index: usize) -> Option<i64> {
    match args.get(index)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn uint_arg(args: &[Value], index: usize) -> Option<u32> {
    int_arg(args, index).and_then(|v| u32::try_from(v).ok())
}

pub fn float_arg(args: &[Value], index: usize) -> Option<f32> {
    match args.get(index)? {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// String form of an argument; numeric tokens round-trip through their
/// decimal representation so all-digit values (like the hex color
/// `123456`) stay usable.
pub fn string_arg(args: &[Value], index: usize) -> Option<String> {
    match args.get(index)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Color values: 3 or 6 hex characters gain a `#` prefix, then parse as
/// RGB; an existing `#` prefix is accepted as-is.
pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    let hex = value.strip_prefix('#').unwrap_or(value);
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(&expanded[i * 2..i * 2 + 2], 16).ok();
    Some(Rgba([channel(0)?, channel(1)?, channel(2)?, 255]))
}

/// `WxH` size pairs; a missing height equals the width.
pub fn parse_size_pair(value: &str) -> (Option<u32>, Option<u32>) {
    let mut parts = value.splitn(2, 'x');
    let width: Option<u32> = parts.next().and_then(|p| p.parse().ok());
    let height: Option<u32> = parts.next().and_then(|p| p.parse().ok());
    (width, height.or(width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_literal_shapes() {
        assert_eq!(parse_literal("true"), json!(true));
        assert_eq!(parse_literal("null"), json!(null));
        assert_eq!(parse_literal("42"), json!(42));
        assert_eq!(parse_literal("1.5"), json!(1.5));
        assert_eq!(parse_literal("cover"), json!("cover"));
        assert_eq!(parse_literal("[1,2]"), json!([1, 2]));
        assert_eq!(parse_literal("{\"a\":1}"), json!({"a": 1}));
    }

    #[test]
    fn test_parse_args_splits_tokens() {
        let args = parse_args("10_20_30");
        assert_eq!(uint_arg(&args, 0), Some(10));
        assert_eq!(uint_arg(&args, 1), Some(20));
        assert_eq!(uint_arg(&args, 2), Some(30));
        assert!(parse_args("").is_empty());
    }

    #[test]
    fn test_numeric_coercions() {
        let args = parse_args("50_1.5_-3");
        assert_eq!(uint_arg(&args, 0), Some(50));
        assert_eq!(float_arg(&args, 1), Some(1.5));
        assert_eq!(int_arg(&args, 2), Some(-3));
        assert_eq!(uint_arg(&args, 2), None);
    }

    #[test]
    fn test_parse_color_hex() {
        assert_eq!(parse_color("fff"), Some(Rgba([255, 255, 255, 255])));
        assert_eq!(parse_color("f00"), Some(Rgba([255, 0, 0, 255])));
        assert_eq!(parse_color("00ff00"), Some(Rgba([0, 255, 0, 255])));
        assert_eq!(parse_color("#0000ff"), Some(Rgba([0, 0, 255, 255])));
        // All-digit six-char values are colors too.
        assert_eq!(parse_color("123456"), Some(Rgba([0x12, 0x34, 0x56, 255])));
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color("ffff"), None);
    }

    #[test]
    fn test_parse_size_pair() {
        assert_eq!(parse_size_pair("200x300"), (Some(200), Some(300)));
        assert_eq!(parse_size_pair("200"), (Some(200), Some(200)));
        assert_eq!(parse_size_pair("x300"), (None, Some(300)));
        assert_eq!(parse_size_pair("abc"), (None, None));
    }
}
