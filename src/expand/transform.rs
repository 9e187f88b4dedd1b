//! Bash-like `${NAME<op>ARG}` operators.

use regex::Regex;
use serde_json::Value;

use crate::params::ParamValue;

type Transform = fn(Option<&ParamValue>, &str) -> Option<Value>;

/// Tried in order; longer tokens sit before their prefixes so that `##` is
/// never read as `#` followed by a pattern starting with `#`.
const TRANSFORMS: &[(&str, Transform)] = &[
    (":-", default_if_empty),
    ("##", strip_longest_prefix),
    ("%%", strip_longest_suffix),
    ("#", strip_shortest_prefix),
    ("%", strip_shortest_suffix),
    ("^^", upper_all),
    (",,", lower_all),
    ("^", upper_first),
    (",", lower_first),
    (":", substring),
    ("//", replace_all),
    ("/", replace_first),
];

/// Applies the operator at the start of `rest` to `value`.
///
/// `None` means the reference cannot be expanded now and stays literal.
pub(crate) fn apply(value: Option<&ParamValue>, rest: &str) -> Option<Value> {
    if rest.is_empty() {
        return value.and_then(ParamValue::resolved).cloned();
    }
    let (token, transform) = TRANSFORMS
        .iter()
        .find(|(token, _)| rest.starts_with(token))?;
    transform(value, &rest[token.len()..])
}

/// Scalar text of a resolved value; structured and unavailable values have none.
pub(crate) fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn text(value: Option<&ParamValue>) -> Option<String> {
    value.and_then(ParamValue::resolved).and_then(text_of)
}

fn default_if_empty(value: Option<&ParamValue>, arg: &str) -> Option<Value> {
    match value {
        None => Some(Value::String(arg.to_string())),
        Some(ParamValue::Unavailable) => None,
        Some(ParamValue::Resolved(Value::Null)) => Some(Value::String(arg.to_string())),
        Some(ParamValue::Resolved(Value::String(s))) if s.is_empty() => {
            Some(Value::String(arg.to_string()))
        }
        Some(ParamValue::Resolved(resolved)) => Some(resolved.clone()),
    }
}

fn glob(pattern: &str) -> Option<Regex> {
    let mut expr = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    expr.push('$');
    Regex::new(&expr).ok()
}

fn boundaries(s: &str) -> Vec<usize> {
    s.char_indices().map(|(i, _)| i).chain([s.len()]).collect()
}

fn strip_prefix(value: Option<&ParamValue>, pattern: &str, longest: bool) -> Option<Value> {
    let s = text(value)?;
    let matcher = glob(pattern)?;
    let mut ends = boundaries(&s);
    if longest {
        ends.reverse();
    }
    let stripped = ends
        .into_iter()
        .find(|&end| matcher.is_match(&s[..end]))
        .map_or(s.as_str(), |end| &s[end..]);
    Some(Value::String(stripped.to_string()))
}

fn strip_suffix(value: Option<&ParamValue>, pattern: &str, longest: bool) -> Option<Value> {
    let s = text(value)?;
    let matcher = glob(pattern)?;
    let mut starts = boundaries(&s);
    if !longest {
        starts.reverse();
    }
    let stripped = starts
        .into_iter()
        .find(|&start| matcher.is_match(&s[start..]))
        .map_or(s.as_str(), |start| &s[..start]);
    Some(Value::String(stripped.to_string()))
}

fn strip_shortest_prefix(value: Option<&ParamValue>, arg: &str) -> Option<Value> {
    strip_prefix(value, arg, false)
}

fn strip_longest_prefix(value: Option<&ParamValue>, arg: &str) -> Option<Value> {
    strip_prefix(value, arg, true)
}

fn strip_shortest_suffix(value: Option<&ParamValue>, arg: &str) -> Option<Value> {
    strip_suffix(value, arg, false)
}

fn strip_longest_suffix(value: Option<&ParamValue>, arg: &str) -> Option<Value> {
    strip_suffix(value, arg, true)
}

fn upper_all(value: Option<&ParamValue>, _arg: &str) -> Option<Value> {
    text(value).map(|s| Value::String(s.to_uppercase()))
}

fn lower_all(value: Option<&ParamValue>, _arg: &str) -> Option<Value> {
    text(value).map(|s| Value::String(s.to_lowercase()))
}

fn map_first(s: &str, f: impl Fn(char) -> String) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => f(first) + chars.as_str(),
        None => String::new(),
    }
}

fn upper_first(value: Option<&ParamValue>, _arg: &str) -> Option<Value> {
    text(value).map(|s| Value::String(map_first(&s, |c| c.to_uppercase().collect())))
}

fn lower_first(value: Option<&ParamValue>, _arg: &str) -> Option<Value> {
    text(value).map(|s| Value::String(map_first(&s, |c| c.to_lowercase().collect())))
}

/// `:start` or `:start:length`, counted in characters. Negative values
/// count from the end, as in bash.
fn substring(value: Option<&ParamValue>, arg: &str) -> Option<Value> {
    let s = text(value)?;
    let (start, length) = match arg.split_once(':') {
        Some((start, length)) => (start, Some(length)),
        None => (arg, None),
    };
    let start: i64 = start.trim().parse().ok()?;
    let length: Option<i64> = match length {
        Some(length) => Some(length.trim().parse().ok()?),
        None => None,
    };
    let chars: Vec<char> = s.chars().collect();
    let n = chars.len() as i64;
    let from = if start < 0 {
        n.saturating_add(start).max(0)
    } else {
        start.min(n)
    };
    let to = match length {
        None => n,
        Some(len) if len >= 0 => from.saturating_add(len).min(n),
        Some(len) => n.saturating_add(len).max(from),
    };
    Some(Value::String(chars[from as usize..to as usize].iter().collect()))
}

fn replace(value: Option<&ParamValue>, arg: &str, count: Option<usize>) -> Option<Value> {
    let s = text(value)?;
    let (old, new) = arg.split_once('/').unwrap_or((arg, ""));
    if old.is_empty() {
        return Some(Value::String(s));
    }
    let replaced = match count {
        Some(count) => s.replacen(old, new, count),
        None => s.replace(old, new),
    };
    Some(Value::String(replaced))
}

fn replace_first(value: Option<&ParamValue>, arg: &str) -> Option<Value> {
    replace(value, arg, Some(1))
}

fn replace_all(value: Option<&ParamValue>, arg: &str) -> Option<Value> {
    replace(value, arg, None)
}
