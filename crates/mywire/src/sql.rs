//! Client-side SQL text helpers: literal escaping, `?` interpolation and
//! named-placeholder rewriting.
//!
//! Interpolation is used when server-side prepare is disabled. Escaping
//! follows the session's `NO_BACKSLASH_ESCAPES` status: with it set, a
//! backslash is an ordinary character and only quotes are doubled.

use mywire_core::{Error, Value};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Quote and escape a string literal.
pub fn escape_string(s: &str, no_backslash_escapes: bool) -> String {
    let mut result = String::with_capacity(s.len() + 2);
    result.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => result.push_str("''"),
            _ if no_backslash_escapes => result.push(ch),
            '\\' => result.push_str("\\\\"),
            '\0' => result.push_str("\\0"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            // Ctrl+Z
            '\x1a' => result.push_str("\\Z"),
            _ => result.push(ch),
        }
    }
    result.push('\'');
    result
}

/// Hex literal for binary data.
pub fn escape_bytes(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2 + 3);
    result.push_str("X'");
    for byte in data {
        let _ = write!(result, "{byte:02X}");
    }
    result.push('\'');
    result
}

/// Render a value as a SQL literal.
pub fn format_value(value: &Value, no_backslash_escapes: bool) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::TinyInt(v) => v.to_string(),
        Value::UTinyInt(v) => v.to_string(),
        Value::SmallInt(v) => v.to_string(),
        Value::USmallInt(v) | Value::Year(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::BigInt(v) => v.to_string(),
        Value::UBigInt(v) | Value::Bit(v) => v.to_string(),
        Value::Float(f) => format_float(f64::from(*f)),
        Value::Double(f) => format_float(*f),
        Value::Decimal(s) => s.clone(),
        Value::Text(s) => escape_string(s, no_backslash_escapes),
        Value::Bytes(b) => escape_bytes(b),
        Value::Json(j) => escape_string(&j.to_string(), no_backslash_escapes),
        Value::Date(d) => format!("'{d}'"),
        Value::DateTime(dt) => format!("'{dt}'"),
        Value::Time(t) => format!("'{t}'"),
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "NULL".to_string()
    } else if f.is_infinite() {
        if f.is_sign_positive() { "1e308" } else { "-1e308" }.to_string()
    } else {
        f.to_string()
    }
}

/// Walk `sql`, calling `on_char` for every character outside quoted
/// literals and identifiers. Quoted sections are copied verbatim.
type Chars<'a> = std::iter::Peekable<std::str::Chars<'a>>;

fn scan_unquoted(sql: &str, mut on_char: impl FnMut(char, &mut Chars<'_>, &mut String)) -> String {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' => {
                out.push(ch);
                while let Some(next) = chars.next() {
                    out.push(next);
                    if next == '\\' && ch != '`' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if next == ch {
                        if chars.peek() == Some(&ch) {
                            out.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '#' => copy_line(ch, &mut chars, &mut out),
            '-' if chars.peek() == Some(&'-') => {
                out.push(ch);
                out.push('-');
                chars.next();
                // `--` starts a comment only when followed by whitespace.
                if chars.peek().is_none_or(|c| c.is_whitespace()) {
                    copy_line('\0', &mut chars, &mut out);
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                out.push(ch);
                out.push('*');
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    out.push(next);
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => on_char(ch, &mut chars, &mut out),
        }
    }
    out
}

fn copy_line(first: char, chars: &mut Chars<'_>, out: &mut String) {
    if first != '\0' {
        out.push(first);
    }
    for next in chars.by_ref() {
        out.push(next);
        if next == '\n' {
            break;
        }
    }
}

/// Count `?` placeholders outside literals.
pub fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    scan_unquoted(sql, |ch, _, _| {
        if ch == '?' {
            count += 1;
        }
    });
    count
}

/// Substitute `?` placeholders with escaped literals.
///
/// The number of placeholders must equal `params.len()`.
pub fn interpolate_params(
    sql: &str,
    params: &[Value],
    no_backslash_escapes: bool,
) -> Result<String, Error> {
    let expected = count_placeholders(sql);
    if expected != params.len() {
        return Err(Error::usage(format!(
            "statement has {expected} placeholders but {} parameters were given",
            params.len()
        )));
    }
    if params.is_empty() {
        return Ok(sql.to_string());
    }
    let mut next = params.iter();
    Ok(scan_unquoted(sql, |ch, _, out| {
        if ch != '?' {
            out.push(ch);
        } else if let Some(value) = next.next() {
            out.push_str(&format_value(value, no_backslash_escapes));
        }
    }))
}

/// Rewrite `@name` and `:name` placeholders to `?`.
///
/// Only names accepted by `is_param` are rewritten, so session variables
/// such as `@@autocommit` or `@counter` survive untouched. Returns the
/// rewritten SQL and the parameter names in positional order.
pub fn rewrite_named_placeholders(
    sql: &str,
    is_param: impl Fn(&str) -> bool,
) -> (String, Vec<String>) {
    let mut names = Vec::new();
    let mut prev: Option<char> = None;
    let rewritten = scan_unquoted(sql, |ch, chars, out| {
        let after_word = prev.is_some_and(|p| p.is_alphanumeric() || p == '_' || p == '@' || p == ':');
        prev = Some(ch);
        if !matches!(ch, '@' | ':') || after_word {
            out.push(ch);
            return;
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                name.push(c);
                chars.next();
            } else {
                break;
            }
        }
        if !name.is_empty() && is_param(&name) {
            out.push('?');
            names.push(name);
            prev = Some('?');
        } else {
            out.push(ch);
            if let Some(last) = name.chars().last() {
                prev = Some(last);
            }
            out.push_str(&name);
        }
    });
    (rewritten, names)
}

/// Order the values of a named parameter map by `names`.
pub fn bind_named(
    names: &[String],
    params: &HashMap<String, Value>,
) -> Result<Vec<Value>, Error> {
    names
        .iter()
        .map(|name| {
            params
                .get(name)
                .cloned()
                .ok_or_else(|| Error::usage(format!("missing value for parameter '{name}'")))
        })
        .collect()
}
