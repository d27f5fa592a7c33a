//! Argument and result values, and their canonical forms for key derivation
//!
//! Every value that takes part in a cache key must render to a canonical
//! string through [`CacheKeyable`]. Two values that are semantically equal
//! must render identically, so floats are formatted with a fixed precision
//! and unordered containers are sorted before rendering.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Write as _;

/// Significant digits kept when rendering floats into a cache key.
pub const FLOAT_KEY_PRECISION: usize = 15;

/// A value passed to a stage or produced by one.
///
/// The same type carries arguments, dependency results and stage results so
/// that the output of one stage can flow into the parameters of another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Absence of a value
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Opaque binary data
    Bytes(Vec<u8>),
    /// Ordered sequence
    List(Vec<Value>),
    /// Unordered collection, kept sorted and deduplicated by canonical form
    Set(Vec<Value>),
    /// String-keyed mapping with deterministic key order
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Build a normalized set value.
    ///
    /// Members are sorted by their canonical form and duplicates removed, so
    /// insertion order never reaches the cache key.
    pub fn set<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Self>,
    {
        let mut keyed: Vec<(String, Self)> = items
            .into_iter()
            .map(Into::into)
            .map(|v: Self| (v.canonical(), v))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed.dedup_by(|a, b| a.0 == b.0);
        Self::Set(keyed.into_iter().map(|(_, v)| v).collect())
    }

    /// Build a map value from name/value pairs.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
        }
    }

    /// Whether this is [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Boolean payload, if any.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer payload, if any.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value; integers are widened.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// String payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Binary payload, if any.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Elements of a list or set.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) | Self::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Map entries, if any.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Self>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Human-readable JSON rendering used in entry metadata.
    ///
    /// Bytes are rendered as a hex string and sets as arrays; this form is
    /// for inspection only and is never parsed back.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map_or_else(|| serde_json::Value::String(f.to_string()), Into::into),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Bytes(b) => serde_json::Value::String(hex::encode(b)),
            Self::List(items) | Self::Set(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Self>> FromIterator<T> for Value {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::List(iter.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<BTreeMap<String, T>> for Value {
    fn from(v: BTreeMap<String, T>) -> Self {
        Self::map(v)
    }
}

/// Types with a deterministic canonical rendering for cache keys.
///
/// Implementations must render semantically equal values identically and
/// must not depend on memory addresses, hash seeds or insertion order.
pub trait CacheKeyable {
    /// Append the canonical form of `self` to `out`.
    fn write_canonical(&self, out: &mut String);

    /// The canonical form of `self` as an owned string.
    fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }
}

/// Render a float with fixed precision.
///
/// `-0.0` collapses onto `0.0` and all NaN payloads collapse onto one form.
#[must_use]
pub fn canonical_float(v: f64) -> String {
    if v.is_nan() {
        return "f:nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "f:inf" } else { "f:-inf" }.to_string();
    }
    let v = if v == 0.0 { 0.0 } else { v };
    format!("f:{:.*e}", FLOAT_KEY_PRECISION - 1, v)
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{{{:04x}}}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_sorted<I: IntoIterator<Item = String>>(open: &str, items: I, out: &mut String) {
    let mut rendered: Vec<String> = items.into_iter().collect();
    rendered.sort();
    out.push_str(open);
    out.push_str(&rendered.join(","));
    out.push('}');
}

fn write_map<'a, V, I>(entries: I, out: &mut String)
where
    V: CacheKeyable + 'a,
    I: IntoIterator<Item = (&'a String, &'a V)>,
{
    let rendered = entries.into_iter().map(|(k, v)| {
        let mut entry = String::new();
        write_escaped(k, &mut entry);
        entry.push(':');
        v.write_canonical(&mut entry);
        entry
    });
    write_sorted("{", rendered, out);
}

impl CacheKeyable for Value {
    fn write_canonical(&self, out: &mut String) {
        match self {
            Self::Null => out.push('n'),
            Self::Bool(b) => b.write_canonical(out),
            Self::Int(i) => i.write_canonical(out),
            Self::Float(f) => f.write_canonical(out),
            Self::Str(s) => s.write_canonical(out),
            Self::Bytes(b) => {
                out.push_str("x:");
                out.push_str(&hex::encode(b));
            }
            Self::List(items) => items.write_canonical(out),
            // Sets built through `Value::set` are already sorted and unique,
            // but values deserialized or built by hand may be neither.
            Self::Set(items) => {
                let members: BTreeSet<String> = items.iter().map(Self::canonical).collect();
                write_sorted("#{", members, out);
            }
            Self::Map(m) => write_map(m.iter(), out),
        }
    }
}

impl CacheKeyable for bool {
    fn write_canonical(&self, out: &mut String) {
        out.push_str(if *self { "b:true" } else { "b:false" });
    }
}

impl CacheKeyable for i64 {
    fn write_canonical(&self, out: &mut String) {
        let _ = write!(out, "i:{self}");
    }
}

impl CacheKeyable for i32 {
    fn write_canonical(&self, out: &mut String) {
        i64::from(*self).write_canonical(out);
    }
}

impl CacheKeyable for u32 {
    fn write_canonical(&self, out: &mut String) {
        i64::from(*self).write_canonical(out);
    }
}

impl CacheKeyable for f64 {
    fn write_canonical(&self, out: &mut String) {
        out.push_str(&canonical_float(*self));
    }
}

impl CacheKeyable for f32 {
    fn write_canonical(&self, out: &mut String) {
        f64::from(*self).write_canonical(out);
    }
}

impl CacheKeyable for str {
    fn write_canonical(&self, out: &mut String) {
        out.push_str("s:");
        write_escaped(self, out);
    }
}

impl CacheKeyable for String {
    fn write_canonical(&self, out: &mut String) {
        self.as_str().write_canonical(out);
    }
}

impl<T: CacheKeyable> CacheKeyable for Option<T> {
    fn write_canonical(&self, out: &mut String) {
        match self {
            Some(v) => v.write_canonical(out),
            None => out.push('n'),
        }
    }
}

impl<T: CacheKeyable> CacheKeyable for [T] {
    fn write_canonical(&self, out: &mut String) {
        out.push('[');
        for (i, item) in self.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            item.write_canonical(out);
        }
        out.push(']');
    }
}

impl<T: CacheKeyable> CacheKeyable for Vec<T> {
    fn write_canonical(&self, out: &mut String) {
        self.as_slice().write_canonical(out);
    }
}

impl<T: CacheKeyable> CacheKeyable for BTreeSet<T> {
    fn write_canonical(&self, out: &mut String) {
        write_sorted("#{", self.iter().map(CacheKeyable::canonical), out);
    }
}

impl<T: CacheKeyable, S> CacheKeyable for HashSet<T, S> {
    fn write_canonical(&self, out: &mut String) {
        write_sorted("#{", self.iter().map(CacheKeyable::canonical), out);
    }
}

impl<V: CacheKeyable> CacheKeyable for BTreeMap<String, V> {
    fn write_canonical(&self, out: &mut String) {
        write_map(self.iter(), out);
    }
}

impl<V: CacheKeyable, S> CacheKeyable for HashMap<String, V, S> {
    fn write_canonical(&self, out: &mut String) {
        write_map(self.iter(), out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_negative_zero_matches_zero() {
        assert_eq!(canonical_float(-0.0), canonical_float(0.0));
    }

    #[test]
    fn test_float_nan_is_stable() {
        assert_eq!(canonical_float(f64::NAN), "f:nan");
        assert_eq!(canonical_float(-f64::NAN), "f:nan");
        assert_eq!(canonical_float(f64::NEG_INFINITY), "f:-inf");
    }

    #[test]
    fn test_float_fixed_precision() {
        assert_eq!(canonical_float(0.5), "f:5.00000000000000e-1");
        assert_eq!(canonical_float(0.1 + 0.2), canonical_float(0.3));
        assert_ne!(canonical_float(0.3), canonical_float(0.31));
    }

    #[test]
    fn test_int_and_float_are_distinct() {
        assert_ne!(Value::Int(1).canonical(), Value::Float(1.0).canonical());
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(Value::from("a\"b").canonical(), r#"s:"a\"b""#);
        let list: Value = ["a", "b"].into_iter().collect();
        assert_ne!(Value::from("a,b").canonical(), list.canonical());
    }

    #[test]
    fn test_set_is_order_independent() {
        let a = Value::set(["Education", "Biology", "Physics"]);
        let b = Value::set(["Physics", "Education", "Biology", "Physics"]);
        assert_eq!(a, b);
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.as_list().map(<[Value]>::len), Some(3));
    }

    #[test]
    fn test_unsorted_set_still_canonical() {
        let a = Value::Set(vec![Value::Int(2), Value::Int(1)]);
        let b = Value::Set(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_set_with_repeated_members_matches_unique_set() {
        let repeated = Value::Set(vec![Value::Int(1), Value::Int(1), Value::Int(2)]);
        let unique = Value::set([1, 2]);
        assert_eq!(repeated.canonical(), unique.canonical());
    }

    #[test]
    fn test_list_is_order_dependent() {
        let a: Value = vec![1, 2].into_iter().collect();
        let b: Value = vec![2, 1].into_iter().collect();
        assert_ne!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_hash_map_matches_btree_map() {
        let mut h = HashMap::new();
        h.insert("b".to_string(), 2_i64);
        h.insert("a".to_string(), 1_i64);
        let b: BTreeMap<String, i64> = h.clone().into_iter().collect();
        assert_eq!(h.canonical(), b.canonical());
        assert_eq!(b.canonical(), r#"{"a":i:1,"b":i:2}"#);
    }

    #[test]
    fn test_hash_set_matches_value_set() {
        let h: HashSet<String> = ["x".to_string(), "y".to_string()].into_iter().collect();
        assert_eq!(h.canonical(), Value::set(["y", "x"]).canonical());
    }

    #[test]
    fn test_to_json_is_readable() {
        let v = Value::map([
            ("threshold", Value::Float(0.5)),
            ("fields", Value::set(["b", "a"])),
            ("blob", Value::Bytes(vec![0xab, 0x01])),
        ]);
        let json = v.to_json();
        assert_eq!(json["threshold"], serde_json::json!(0.5));
        assert_eq!(json["fields"], serde_json::json!(["a", "b"]));
        assert_eq!(json["blob"], serde_json::json!("ab01"));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::from("x").as_str(), Some("x"));
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::Bool(true).as_i64(), None);
        assert_eq!(Value::Float(1.5).type_name(), "float");
    }
}
