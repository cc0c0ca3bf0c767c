//! Helper functions callable from templates.
//!
//! The template engine has no arithmetic on loosely-typed JSON numbers and no
//! mutable containers, so the [`Library`] fills those gaps: numeric coercion,
//! arithmetic, string and path helpers, regex substitution, quoting, and
//! builders for maps and arrays.
//!
//! The library is a plain table of [`Function`]s built once with
//! [`Library::standard`] and handed to the renderer. Nothing is registered
//! globally.
//!
//! ## Catalog
//!
//! | Name | Arguments | Result |
//! |------|-----------|--------|
//! | `toInt` | number | integer, floats truncated toward zero |
//! | `toFloat` | number | float |
//! | `add` | `b, a` | `a + b`, float if either operand is a float |
//! | `sub` `mul` `div` `mod` | `a, b` integers | integer arithmetic, `div`/`mod` by zero fail |
//! | `regexReplace` | pattern, replacement, subject | all matches replaced, `$1` expands groups |
//! | `strQuote` | string | escaped body of the quoted string, no delimiters |
//! | `createMap` / `pushToMap` | `map, key, value` | shared map, mutated in place |
//! | `createArray` / `pushToArray` | `array, value` | new array with `value` appended |
//! | `split` `join` | `s, sep` / `array, sep` | split into / join from strings |
//! | `base` `dir` | path | last element / parent, lexically cleaned |
//! | `toUpper` `toLower` | string | case folded string |
//! | `contains` | `s, substr` | bool |
//! | `replace` | `s, old, new, n` | first `n` occurrences replaced, all if `n < 0` |
//! | `trimSuffix` | `s, suffix` | `s` without the suffix |
//! | `datetime` | — | current local [`Timestamp`] |

use crate::value::{Number, SharedMap, Timestamp, Value};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FuncError {
    #[error("{func}: {detail}")]
    Type { func: &'static str, detail: String },
    #[error("{func}: invalid pattern: {source}")]
    Pattern {
        func: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("{func}: division by zero")]
    DivideByZero { func: &'static str },
    #[error("{func}: value already contains the map, inserting it would create a cycle")]
    Cycle { func: &'static str },
    #[error("unknown function `{0}`")]
    Unknown(String),
}

pub type FuncResult = Result<Value, FuncError>;

/// A named, fixed-arity helper.
#[derive(Clone, Copy)]
pub struct Function {
    name: &'static str,
    arity: usize,
    body: fn(&[Value]) -> FuncResult,
}

impl Function {
    pub const fn new(name: &'static str, arity: usize, body: fn(&[Value]) -> FuncResult) -> Self {
        Self { name, arity, body }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check the argument count, then run the function.
    pub fn call(&self, args: &[Value]) -> FuncResult {
        if args.len() != self.arity {
            return Err(FuncError::Type {
                func: self.name,
                detail: format!(
                    "expected {} argument(s), got {}",
                    self.arity,
                    args.len()
                ),
            });
        }
        (self.body)(args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Immutable table of helpers, keyed by the name templates call them by.
#[derive(Debug, Clone)]
pub struct Library {
    functions: BTreeMap<&'static str, Function>,
}

const STANDARD: &[Function] = &[
    Function::new("toInt", 1, to_int),
    Function::new("toFloat", 1, to_float),
    Function::new("add", 2, add),
    Function::new("sub", 2, sub),
    Function::new("mul", 2, mul),
    Function::new("div", 2, div),
    Function::new("mod", 2, modulo),
    Function::new("regexReplace", 3, regex_replace),
    Function::new("strQuote", 1, str_quote),
    Function::new("createMap", 0, create_map),
    Function::new("pushToMap", 3, push_to_map),
    Function::new("createArray", 0, create_array),
    Function::new("pushToArray", 2, push_to_array),
    Function::new("split", 2, split),
    Function::new("join", 2, join),
    Function::new("base", 1, base),
    Function::new("dir", 1, dir),
    Function::new("toUpper", 1, to_upper),
    Function::new("toLower", 1, to_lower),
    Function::new("contains", 2, contains),
    Function::new("replace", 4, replace),
    Function::new("trimSuffix", 2, trim_suffix),
    Function::new("datetime", 0, datetime),
];

impl Library {
    pub fn new(functions: impl IntoIterator<Item = Function>) -> Self {
        Self {
            functions: functions.into_iter().map(|f| (f.name, f)).collect(),
        }
    }

    /// The full catalog listed in the module docs.
    pub fn standard() -> Self {
        Self::new(STANDARD.iter().copied())
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Function> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn call(&self, name: &str, args: &[Value]) -> FuncResult {
        match self.get(name) {
            Some(function) => function.call(args),
            None => Err(FuncError::Unknown(name.to_string())),
        }
    }
}

impl Default for Library {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// Argument classification
// =============================================================================

fn type_error(func: &'static str, expected: &str, got: &Value) -> FuncError {
    FuncError::Type {
        func,
        detail: format!("expected {expected}, got {}", got.kind()),
    }
}

fn number(func: &'static str, value: &Value) -> Result<Number, FuncError> {
    value
        .as_number()
        .ok_or_else(|| type_error(func, "a number", value))
}

fn integer(func: &'static str, value: &Value) -> Result<i64, FuncError> {
    match value {
        Value::Int(i) => Ok(*i),
        other => Err(type_error(func, "an integer", other)),
    }
}

fn string<'a>(func: &'static str, value: &'a Value) -> Result<&'a str, FuncError> {
    value
        .as_str()
        .ok_or_else(|| type_error(func, "a string", value))
}

// =============================================================================
// Numeric coercion and arithmetic
// =============================================================================

fn to_int(args: &[Value]) -> FuncResult {
    Ok(match number("toInt", &args[0])? {
        Number::Int(i) => Value::Int(i),
        Number::Float(f) => Value::Int(f.trunc() as i64),
    })
}

fn to_float(args: &[Value]) -> FuncResult {
    Ok(Value::Float(number("toFloat", &args[0])?.as_f64()))
}

/// `add(b, a)` computes `a + b`. Integer overflow promotes to float.
fn add(args: &[Value]) -> FuncResult {
    let b = number("add", &args[0])?;
    let a = number("add", &args[1])?;
    Ok(match (a, b) {
        (Number::Int(a), Number::Int(b)) => match a.checked_add(b) {
            Some(sum) => Value::Int(sum),
            None => Value::Float(a as f64 + b as f64),
        },
        (a, b) => Value::Float(a.as_f64() + b.as_f64()),
    })
}

fn sub(args: &[Value]) -> FuncResult {
    let a = integer("sub", &args[0])?;
    let b = integer("sub", &args[1])?;
    Ok(Value::Int(a.wrapping_sub(b)))
}

fn mul(args: &[Value]) -> FuncResult {
    let a = integer("mul", &args[0])?;
    let b = integer("mul", &args[1])?;
    Ok(Value::Int(a.wrapping_mul(b)))
}

fn div(args: &[Value]) -> FuncResult {
    let a = integer("div", &args[0])?;
    let b = integer("div", &args[1])?;
    if b == 0 {
        return Err(FuncError::DivideByZero { func: "div" });
    }
    Ok(Value::Int(a.wrapping_div(b)))
}

fn modulo(args: &[Value]) -> FuncResult {
    let a = integer("mod", &args[0])?;
    let b = integer("mod", &args[1])?;
    if b == 0 {
        return Err(FuncError::DivideByZero { func: "mod" });
    }
    Ok(Value::Int(a.wrapping_rem(b)))
}

// =============================================================================
// Strings
// =============================================================================

fn regex_replace(args: &[Value]) -> FuncResult {
    let pattern = string("regexReplace", &args[0])?;
    let replacement = string("regexReplace", &args[1])?;
    let subject = string("regexReplace", &args[2])?;
    let re = Regex::new(pattern).map_err(|source| FuncError::Pattern {
        func: "regexReplace",
        source,
    })?;
    Ok(Value::Str(re.replace_all(subject, replacement).into_owned()))
}

fn str_quote(args: &[Value]) -> FuncResult {
    Ok(Value::Str(quote_body(string("strQuote", &args[0])?)))
}

/// Body of the double-quoted, escaped form of `s`.
///
/// Quotes, backslashes and non-printable characters are escaped; printable
/// Unicode passes through.
pub fn quote_body(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{07}' => out.push_str("\\a"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{0b}' => out.push_str("\\v"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            c if !is_printable(c) => {
                if (c as u32) <= 0xffff {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                } else {
                    out.push_str(&format!("\\U{:08x}", c as u32));
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn is_printable(c: char) -> bool {
    if c == ' ' {
        return true;
    }
    !(c.is_control()
        || c.is_whitespace()
        || matches!(c, '\u{ad}' | '\u{200b}'..='\u{200f}' | '\u{2028}'..='\u{202e}' | '\u{2060}'..='\u{2064}' | '\u{feff}'))
}

fn split(args: &[Value]) -> FuncResult {
    let s = string("split", &args[0])?;
    let sep = string("split", &args[1])?;
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::Str(c.to_string())).collect()
    } else {
        s.split(sep).map(Value::from).collect()
    };
    Ok(Value::from(parts))
}

fn join(args: &[Value]) -> FuncResult {
    let Value::Seq(items) = &args[0] else {
        return Err(type_error("join", "an array", &args[0]));
    };
    let sep = string("join", &args[1])?;
    let parts = items
        .iter()
        .map(|item| string("join", item))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Str(parts.join(sep)))
}

fn to_upper(args: &[Value]) -> FuncResult {
    Ok(Value::Str(string("toUpper", &args[0])?.to_uppercase()))
}

fn to_lower(args: &[Value]) -> FuncResult {
    Ok(Value::Str(string("toLower", &args[0])?.to_lowercase()))
}

fn contains(args: &[Value]) -> FuncResult {
    let s = string("contains", &args[0])?;
    let needle = string("contains", &args[1])?;
    Ok(Value::Bool(s.contains(needle)))
}

fn replace(args: &[Value]) -> FuncResult {
    let s = string("replace", &args[0])?;
    let old = string("replace", &args[1])?;
    let new = string("replace", &args[2])?;
    let n = integer("replace", &args[3])?;
    Ok(Value::Str(match usize::try_from(n) {
        Ok(n) => s.replacen(old, new, n),
        Err(_) => s.replace(old, new),
    }))
}

fn trim_suffix(args: &[Value]) -> FuncResult {
    let s = string("trimSuffix", &args[0])?;
    let suffix = string("trimSuffix", &args[1])?;
    Ok(Value::from(s.strip_suffix(suffix).unwrap_or(s)))
}

// =============================================================================
// Paths
// =============================================================================

fn base(args: &[Value]) -> FuncResult {
    Ok(Value::Str(base_name(string("base", &args[0])?)))
}

fn dir(args: &[Value]) -> FuncResult {
    Ok(Value::Str(dir_name(string("dir", &args[0])?)))
}

/// Last element of a slash-separated path. Trailing slashes are ignored.
///
/// - `""` → `"."`
/// - `"/"` → `"/"`
/// - `"a/b/"` → `"b"`
pub fn base_name(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/".to_string();
    }
    match trimmed.rfind('/') {
        Some(i) => trimmed[i + 1..].to_string(),
        None => trimmed.to_string(),
    }
}

/// Everything before the last element, lexically cleaned.
///
/// - `"a/b/c"` → `"a/b"`
/// - `"file"` → `"."`
/// - `"/a"` → `"/"`
pub fn dir_name(path: &str) -> String {
    let head = match path.rfind('/') {
        Some(i) => &path[..=i],
        None => "",
    };
    clean_path(head)
}

/// Lexical path cleanup: collapses `//`, drops `.`, resolves `..` where possible.
pub fn clean_path(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            _ => parts.push(part),
        }
    }
    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

// =============================================================================
// Builders
// =============================================================================

fn create_map(_args: &[Value]) -> FuncResult {
    Ok(Value::Map(SharedMap::new()))
}

/// Inserts in place and returns the same map, so every holder sees the entry.
fn push_to_map(args: &[Value]) -> FuncResult {
    let Value::Map(map) = &args[0] else {
        return Err(type_error("pushToMap", "a map", &args[0]));
    };
    let key = string("pushToMap", &args[1])?;
    if args[2].contains_map(map) {
        return Err(FuncError::Cycle { func: "pushToMap" });
    }
    map.insert(key, args[2].clone());
    Ok(Value::Map(map.clone()))
}

fn create_array(_args: &[Value]) -> FuncResult {
    Ok(Value::from(Vec::new()))
}

/// Returns a new array; the input is never modified. Null counts as empty.
fn push_to_array(args: &[Value]) -> FuncResult {
    let mut items = match &args[0] {
        Value::Seq(items) => Vec::clone(items),
        Value::Null => Vec::new(),
        other => return Err(type_error("pushToArray", "an array", other)),
    };
    items.push(args[1].clone());
    Ok(Value::from(items))
}

// =============================================================================
// Time
// =============================================================================

fn datetime(_args: &[Value]) -> FuncResult {
    Ok(Value::from(Timestamp::now()))
}
