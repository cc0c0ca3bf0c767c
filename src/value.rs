//! Dynamic value model shared by templates and helper functions.
//!
//! Fetched JSON has no static shape, so everything a template touches is a
//! [`Value`]: a tagged union classified at runtime through [`Value::kind`].
//! Helper functions in [`funcs`](crate::funcs) inspect the tag on every call
//! and fail with a type error instead of guessing.
//!
//! ## Numbers
//!
//! JSON numbers without a fractional part or exponent that fit in `i64`
//! decode as [`Value::Int`]. Everything else (fractions, exponents, integers
//! beyond `i64`) decodes as [`Value::Float`]. Arithmetic helpers rely on this
//! split to decide between integer and float results.
//!
//! ## Container semantics
//!
//! Mappings and sequences deliberately behave differently:
//!
//! - A mapping is a [`SharedMap`], a reference-counted container. Cloning a
//!   `Value::Map` clones the handle, so `pushToMap` mutates the one container
//!   every holder sees.
//! - A sequence is an immutable, reference-counted `Vec`. Cloning is cheap,
//!   and `pushToArray` returns a new sequence while the original stays
//!   untouched.
//!
//! Inserting a map into itself, directly or through nested containers, is
//! rejected by [`SharedMap::reaches`] checks in the builders, so values are
//! always acyclic.
//!
//! ## Engine bridge
//!
//! [`Value::to_engine`] and [`Value::from_engine`] convert to and from
//! MiniJinja's value type. A [`SharedMap`] crosses the bridge as a MiniJinja
//! object wrapping the same container, so map identity survives a round trip
//! through the template. Sequences cross as a lazy view: indexing converts a
//! single element, never the whole list.

use chrono::{DateTime, Datelike, Local, Timelike};
use minijinja::value::{Enumerator, Object, ObjectRepr, ValueKind, from_args};
use minijinja::{Error, ErrorKind, State, Value as EngineValue};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;

/// Runtime tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Seq,
    Map,
    External,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "integer",
            Kind::Float => "float",
            Kind::Str => "string",
            Kind::Seq => "array",
            Kind::Map => "map",
            Kind::External => "object",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Numeric view of a value: either integer-kind or float-kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

/// A dynamically typed value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Arc<Vec<Value>>),
    Map(SharedMap),
    /// Opaque engine object (timestamps, loop state, ...). Passed through as is.
    External(EngineValue),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Bool(_) => Kind::Bool,
            Value::Int(_) => Kind::Int,
            Value::Float(_) => Kind::Float,
            Value::Str(_) => Kind::Str,
            Value::Seq(_) => Kind::Seq,
            Value::Map(_) => Kind::Map,
            Value::External(_) => Kind::External,
        }
    }

    /// True when `target` is this value or nested anywhere inside it.
    pub fn contains_map(&self, target: &SharedMap) -> bool {
        match self {
            Value::Map(map) => map.reaches(target),
            Value::Seq(items) => items.iter().any(|item| item.contains_map(target)),
            _ => false,
        }
    }

    /// Integer-kind or float-kind view; `None` for every other kind.
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Convert into MiniJinja's value type.
    pub fn to_engine(&self) -> EngineValue {
        match self {
            Value::Null => EngineValue::from(()),
            Value::Bool(b) => EngineValue::from(*b),
            Value::Int(i) => EngineValue::from(*i),
            Value::Float(f) => EngineValue::from(*f),
            Value::Str(s) => EngineValue::from(s.as_str()),
            Value::Seq(items) => EngineValue::from_object(SeqView(items.clone())),
            Value::Map(map) => EngineValue::from_object(map.clone()),
            Value::External(v) => v.clone(),
        }
    }

    /// Classify a MiniJinja value.
    ///
    /// Maps created by this crate come back as the same [`SharedMap`]. Maps
    /// built by the engine itself (dict literals, `dict()`) are copied into a
    /// fresh container.
    pub fn from_engine(value: &EngineValue) -> Self {
        match value.kind() {
            ValueKind::Undefined | ValueKind::None => Value::Null,
            ValueKind::Bool => Value::Bool(value.is_true()),
            ValueKind::Number => engine_number(value),
            ValueKind::String => Value::Str(value.as_str().unwrap_or_default().to_string()),
            ValueKind::Bytes => Value::Str(
                String::from_utf8_lossy(value.as_bytes().unwrap_or_default()).into_owned(),
            ),
            ValueKind::Seq | ValueKind::Iterable => match value.downcast_object_ref::<SeqView>() {
                Some(view) => Value::Seq(view.0.clone()),
                None => Value::from(
                    value
                        .try_iter()
                        .map(|items| items.map(|item| Value::from_engine(&item)).collect::<Vec<Value>>())
                        .unwrap_or_default(),
                ),
            },
            ValueKind::Map => match value.downcast_object_ref::<SharedMap>() {
                Some(map) => Value::Map(map.clone()),
                None => Value::Map(engine_map(value)),
            },
            _ => Value::External(value.clone()),
        }
    }
}

fn engine_number(value: &EngineValue) -> Value {
    if value.is_integer()
        && let Ok(i) = i64::try_from(value.clone())
    {
        return Value::Int(i);
    }
    match f64::try_from(value.clone()) {
        Ok(f) => Value::Float(f),
        Err(_) => Value::External(value.clone()),
    }
}

fn engine_map(value: &EngineValue) -> SharedMap {
    let map = SharedMap::new();
    if let Ok(keys) = value.try_iter() {
        for key in keys {
            let item = value.get_item(&key).unwrap_or_default();
            let key = match key.as_str() {
                Some(s) => s.to_string(),
                None => key.to_string(),
            };
            map.insert(key, Value::from_engine(&item));
        }
    }
    map
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::External(a), Value::External(b)) => a == b,
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::from(items.into_iter().map(Value::from).collect::<Vec<_>>())
            }
            serde_json::Value::Object(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Seq(Arc::new(items))
    }
}

impl From<SharedMap> for Value {
    fn from(map: SharedMap) -> Self {
        Value::Map(map)
    }
}

// =============================================================================
// SharedMap
// =============================================================================

/// String-keyed mapping with shared-by-reference semantics.
///
/// Clones are handles to the same container. Keys iterate in sorted order.
#[derive(Clone, Default)]
pub struct SharedMap(Arc<Mutex<BTreeMap<String, Value>>>);

impl SharedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.lock().insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.lock().keys().cloned().collect()
    }

    /// True when both handles point at the same container.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True when `target` is this map or is nested anywhere inside it.
    pub fn reaches(&self, target: &SharedMap) -> bool {
        self.ptr_eq(target) || self.snapshot().values().any(|v| v.contains_map(target))
    }

    /// Shallow copy of the current entries. Nested maps stay shared.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.0.lock().clone()
    }
}

impl PartialEq for SharedMap {
    fn eq(&self, other: &Self) -> bool {
        // Never hold both locks at once: `a == a` would deadlock.
        self.ptr_eq(other) || self.snapshot() == other.snapshot()
    }
}

impl fmt::Debug for SharedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.snapshot()).finish()
    }
}

impl FromIterator<(String, Value)> for SharedMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(Arc::new(Mutex::new(iter.into_iter().collect())))
    }
}

impl Object for SharedMap {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &EngineValue) -> Option<EngineValue> {
        self.get(key.as_str()?).map(|v| v.to_engine())
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.keys().into_iter().map(EngineValue::from).collect())
    }

    fn enumerator_len(self: &Arc<Self>) -> Option<usize> {
        Some(self.len())
    }
}

/// Read-only engine view of a sequence. Elements convert on access.
#[derive(Debug)]
struct SeqView(Arc<Vec<Value>>);

impl Object for SeqView {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Seq
    }

    fn get_value(self: &Arc<Self>, key: &EngineValue) -> Option<EngineValue> {
        self.0.get(key.as_usize()?).map(Value::to_engine)
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Seq(self.0.len())
    }

    fn enumerator_len(self: &Arc<Self>) -> Option<usize> {
        Some(self.0.len())
    }
}

// =============================================================================
// Timestamp
// =============================================================================

/// Local wall-clock timestamp exposed to templates as an opaque object.
///
/// Renders as RFC 3339. Supports `.format("%Y-%m-%d")` (strftime syntax) and
/// the attributes `unix`, `year`, `month`, `day`, `hour`, `minute`, `second`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(DateTime<Local>);

impl Timestamp {
    pub fn now() -> Self {
        Self(Local::now())
    }

    pub fn new(at: DateTime<Local>) -> Self {
        Self(at)
    }

    /// Format with strftime syntax. Invalid specifiers are an error, not a panic.
    pub fn format(&self, pattern: &str) -> Result<String, fmt::Error> {
        let mut out = String::new();
        write!(out, "{}", self.0.format(pattern))?;
        Ok(out)
    }
}

impl From<Timestamp> for Value {
    fn from(ts: Timestamp) -> Self {
        Value::External(EngineValue::from_object(ts))
    }
}

impl Object for Timestamp {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &EngineValue) -> Option<EngineValue> {
        let at = self.0;
        let value = match key.as_str()? {
            "unix" => EngineValue::from(at.timestamp()),
            "year" => EngineValue::from(at.year()),
            "month" => EngineValue::from(at.month()),
            "day" => EngineValue::from(at.day()),
            "hour" => EngineValue::from(at.hour()),
            "minute" => EngineValue::from(at.minute()),
            "second" => EngineValue::from(at.second()),
            _ => return None,
        };
        Some(value)
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State<'_, '_>,
        method: &str,
        args: &[EngineValue],
    ) -> Result<EngineValue, Error> {
        match method {
            "format" => {
                let (pattern,): (&str,) = from_args(args)?;
                self.format(pattern).map(EngineValue::from).map_err(|_| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        format!("invalid timestamp format `{pattern}`"),
                    )
                })
            }
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("timestamp has no method named `{method}`"),
            )),
        }
    }

    fn render(self: &Arc<Self>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    // =========================================================================
    // JSON decoding
    // =========================================================================

    #[test]
    fn json_integers_decode_as_int() {
        assert_eq!(Value::from(json!(42)), Value::Int(42));
        assert_eq!(Value::from(json!(-7)), Value::Int(-7));
    }

    #[test]
    fn json_fractions_and_exponents_decode_as_float() {
        assert_eq!(Value::from(json!(1.5)), Value::Float(1.5));
        assert_eq!(Value::from(json!(1e3)).kind(), Kind::Float);
    }

    #[test]
    fn json_integer_beyond_i64_decodes_as_float() {
        let v = Value::from(json!(u64::MAX));
        assert_eq!(v.kind(), Kind::Float);
    }

    #[test]
    fn json_object_decodes_to_shared_map() {
        let v = Value::from(json!({"a": 1, "b": [true, null]}));
        let Value::Map(map) = v else {
            panic!("expected map");
        };
        assert_eq!(map.get("a"), Some(Value::Int(1)));
        assert_eq!(
            map.get("b"),
            Some(Value::from(vec![Value::Bool(true), Value::Null]))
        );
    }

    #[test]
    fn kind_and_number_views() {
        assert_eq!(Value::from("x").kind(), Kind::Str);
        assert_eq!(Value::Int(3).as_number(), Some(Number::Int(3)));
        assert_eq!(Value::Float(0.5).as_number(), Some(Number::Float(0.5)));
        assert_eq!(Value::from("3").as_number(), None);
        assert_eq!(Value::Null.as_number(), None);
    }

    // =========================================================================
    // SharedMap
    // =========================================================================

    #[test]
    fn shared_map_clones_share_storage() {
        let a = SharedMap::new();
        let b = a.clone();
        b.insert("k", Value::Int(1));
        assert_eq!(a.get("k"), Some(Value::Int(1)));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn shared_map_self_comparison_does_not_deadlock() {
        let a = SharedMap::new();
        a.insert("k", Value::Int(1));
        assert_eq!(a, a.clone());
    }

    #[test]
    fn distinct_maps_compare_by_content() {
        let a: SharedMap = [("k".to_string(), Value::Int(1))].into_iter().collect();
        let b: SharedMap = [("k".to_string(), Value::Int(1))].into_iter().collect();
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);
        b.insert("j", Value::Null);
        assert_ne!(a, b);
    }

    #[test]
    fn keys_are_sorted() {
        let m = SharedMap::new();
        m.insert("b", Value::Null);
        m.insert("a", Value::Null);
        assert_eq!(m.keys(), vec!["a", "b"]);
    }

    // =========================================================================
    // Engine bridge
    // =========================================================================

    #[test]
    fn map_identity_survives_engine_round_trip() {
        let map = SharedMap::new();
        let back = Value::from_engine(&Value::Map(map.clone()).to_engine());
        let Value::Map(back) = back else {
            panic!("expected map");
        };
        assert!(back.ptr_eq(&map));
    }

    #[test]
    fn scalars_round_trip_through_engine() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-3),
            Value::Float(2.5),
            Value::from("hi"),
            Value::from(vec![Value::Int(1), Value::from("a")]),
        ] {
            assert_eq!(Value::from_engine(&v.to_engine()), v);
        }
    }

    #[test]
    fn engine_whole_float_stays_float() {
        assert_eq!(
            Value::from_engine(&EngineValue::from(2.0_f64)),
            Value::Float(2.0)
        );
    }

    #[test]
    fn engine_dict_becomes_fresh_map() {
        let v = Value::from_engine(&EngineValue::from_serialize(serde_json::json!({"x": 1})));
        let Value::Map(map) = v else {
            panic!("expected map");
        };
        assert_eq!(map.get("x"), Some(Value::Int(1)));
    }

    #[test]
    fn sequence_identity_survives_engine_round_trip() {
        let seq = Value::from(vec![Value::Int(1), Value::Int(2)]);
        let Value::Seq(before) = &seq else {
            panic!("expected sequence");
        };
        let Value::Seq(after) = Value::from_engine(&seq.to_engine()) else {
            panic!("expected sequence");
        };
        assert!(Arc::ptr_eq(before, &after));
    }

    #[test]
    fn sequence_view_indexes_lazily() {
        let engine = Value::from(vec![Value::from("a"), Value::from("b")]).to_engine();
        assert_eq!(engine.len(), Some(2));
        assert_eq!(engine.get_item(&EngineValue::from(1)).unwrap().as_str(), Some("b"));
        assert!(engine.get_item(&EngineValue::from(5)).unwrap().is_undefined());
    }

    #[test]
    fn engine_built_list_becomes_sequence() {
        let v = Value::from_engine(&EngineValue::from(vec![1_i64, 2]));
        assert_eq!(v, Value::from(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn reaches_finds_nested_maps() {
        let outer = SharedMap::new();
        let inner = SharedMap::new();
        let unrelated = SharedMap::new();
        outer.insert("list", Value::from(vec![Value::Map(inner.clone())]));
        assert!(outer.reaches(&outer));
        assert!(outer.reaches(&inner));
        assert!(!inner.reaches(&outer));
        assert!(!outer.reaches(&unrelated));
    }

    #[test]
    fn engine_undefined_is_null() {
        assert_eq!(Value::from_engine(&EngineValue::UNDEFINED), Value::Null);
    }

    // =========================================================================
    // Timestamp
    // =========================================================================

    #[test]
    fn timestamp_formats_with_strftime() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let ts = Timestamp::new(at);
        assert_eq!(ts.format("%Y-%m-%d %H:%M").unwrap(), "2024-03-09 14:05");
    }

    #[test]
    fn timestamp_rejects_bad_format() {
        assert!(Timestamp::now().format("%Q").is_err());
    }

    #[test]
    fn timestamp_is_external_kind() {
        assert_eq!(Value::from(Timestamp::now()).kind(), Kind::External);
    }
}
