//! Scalar index keys with a total ordering, and dot-path access to
//! document values.

use chrono::{DateTime, SecondsFormat, Utc};
use lexicmp::natural_lexical_cmp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A scalar value used as an ordered index key.
///
/// The ordering is total: values rank by type first (none, then booleans,
/// then numbers, then strings, then datetimes), numbers compare across
/// integer and float representations, and strings compare using natural
/// lexical ordering.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Key {
	Null,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	DateTime(DateTime<Utc>),
}

impl Key {
	/// Derive a key from a JSON scalar value
	///
	/// Arrays and objects have no defined ordering and produce `None`.
	pub fn from_value(v: &Value) -> Option<Self> {
		match v {
			Value::Null => Some(Key::Null),
			Value::Bool(b) => Some(Key::Bool(*b)),
			Value::Number(n) => {
				if let Some(i) = n.as_i64() {
					Some(Key::Int(i))
				} else {
					n.as_f64().map(Key::float)
				}
			}
			Value::String(s) => Some(Key::Str(s.clone())),
			_ => None,
		}
	}

	/// Create a numeric key, normalising whole floats to integers
	pub fn float(f: f64) -> Self {
		if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
			Key::Int(f as i64)
		} else {
			Key::Float(f)
		}
	}

	/// Create a datetime key
	pub fn datetime(dt: DateTime<Utc>) -> Self {
		Key::DateTime(dt)
	}

	/// The type rank used as the primary ordering criterion
	fn rank(&self) -> u8 {
		match self {
			Key::Null => 0,
			Key::Bool(_) => 1,
			Key::Int(_) | Key::Float(_) => 2,
			Key::Str(_) => 3,
			Key::DateTime(_) => 4,
		}
	}
}

impl fmt::Display for Key {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Key::Null => write!(f, "null"),
			Key::Bool(b) => write!(f, "{b}"),
			Key::Int(i) => write!(f, "{i}"),
			Key::Float(x) => write!(f, "{x}"),
			Key::Str(s) => write!(f, "{s}"),
			Key::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
		}
	}
}

impl Eq for Key {}

impl PartialEq for Key {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl PartialOrd for Key {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Key {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Key::Null, Key::Null) => Ordering::Equal,
			(Key::Bool(a), Key::Bool(b)) => a.cmp(b),
			(Key::Int(a), Key::Int(b)) => a.cmp(b),
			(Key::Float(a), Key::Float(b)) => a.total_cmp(b),
			(Key::Int(a), Key::Float(b)) => (*a as f64).total_cmp(b),
			(Key::Float(a), Key::Int(b)) => a.total_cmp(&(*b as f64)),
			(Key::Str(a), Key::Str(b)) => natural_lexical_cmp(a, b),
			(Key::DateTime(a), Key::DateTime(b)) => a.cmp(b),
			(a, b) => a.rank().cmp(&b.rank()),
		}
	}
}

impl Hash for Key {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.rank().hash(state);
		match self {
			Key::Null => {}
			Key::Bool(b) => b.hash(state),
			Key::Int(i) => i.hash(state),
			// Whole floats normalise to Int on construction, so bits are stable
			Key::Float(f) => f.to_bits().hash(state),
			Key::Str(s) => s.hash(state),
			Key::DateTime(dt) => dt.timestamp_nanos_opt().unwrap_or_default().hash(state),
		}
	}
}

impl From<&str> for Key {
	fn from(s: &str) -> Self {
		Key::Str(s.to_owned())
	}
}

impl From<String> for Key {
	fn from(s: String) -> Self {
		Key::Str(s)
	}
}

impl From<i64> for Key {
	fn from(i: i64) -> Self {
		Key::Int(i)
	}
}

impl From<f64> for Key {
	fn from(f: f64) -> Self {
		Key::float(f)
	}
}

/// Split a dot path into segments
fn segments(path: &str) -> impl Iterator<Item = &str> {
	path.split('.').filter(|s| !s.is_empty())
}

/// Fetch the value at a dot path, if present
///
/// Numeric segments index into arrays, so `items.0` resolves to the first
/// element of the `items` array.
pub fn pick<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
	let mut cur = value;
	for seg in segments(path) {
		cur = match cur {
			Value::Object(map) => map.get(seg)?,
			Value::Array(arr) => arr.get(seg.parse::<usize>().ok()?)?,
			_ => return None,
		};
	}
	Some(cur)
}

/// Fetch the value at a dot path for mutation, if present
pub fn pick_mut<'a>(value: &'a mut Value, path: &str) -> Option<&'a mut Value> {
	let mut cur = value;
	for seg in segments(path) {
		cur = match cur {
			Value::Object(map) => map.get_mut(seg)?,
			Value::Array(arr) => arr.get_mut(seg.parse::<usize>().ok()?)?,
			_ => return None,
		};
	}
	Some(cur)
}

/// Set the value at a dot path, creating intermediate objects as needed
pub fn put(value: &mut Value, path: &str, v: Value) {
	let parts: Vec<&str> = segments(path).collect();
	if parts.is_empty() {
		*value = v;
		return;
	}
	let mut cur = value;
	for seg in &parts[..parts.len() - 1] {
		// Descend into arrays by position where the segment is numeric
		let array_idx = match cur {
			Value::Array(arr) => seg.parse::<usize>().ok().filter(|i| *i < arr.len()),
			_ => None,
		};
		if let Some(i) = array_idx {
			cur = match cur {
				Value::Array(arr) => &mut arr[i],
				_ => unreachable!(),
			};
			continue;
		}
		if !cur.is_object() {
			*cur = Value::Object(serde_json::Map::new());
		}
		let map = cur.as_object_mut().unwrap();
		cur = map.entry(seg.to_string()).or_insert(Value::Object(serde_json::Map::new()));
	}
	let last = parts[parts.len() - 1];
	match cur {
		Value::Array(arr) => {
			if let Ok(i) = last.parse::<usize>() {
				if i < arr.len() {
					arr[i] = v;
				}
			}
		}
		other => {
			if !other.is_object() {
				*other = Value::Object(serde_json::Map::new());
			}
			other.as_object_mut().unwrap().insert(last.to_string(), v);
		}
	}
}

/// Remove and return the value at a dot path
pub fn cut(value: &mut Value, path: &str) -> Option<Value> {
	let parts: Vec<&str> = segments(path).collect();
	let (last, init) = parts.split_last()?;
	let mut cur = value;
	for seg in init {
		cur = match cur {
			Value::Object(map) => map.get_mut(*seg)?,
			Value::Array(arr) => arr.get_mut(seg.parse::<usize>().ok()?)?,
			_ => return None,
		};
	}
	match cur {
		Value::Object(map) => map.remove(*last),
		Value::Array(arr) => {
			let i = last.parse::<usize>().ok()?;
			if i < arr.len() {
				Some(arr.remove(i))
			} else {
				None
			}
		}
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn key_type_ranks() {
		let mut keys = vec![
			Key::Str("a".into()),
			Key::Int(1),
			Key::Null,
			Key::Bool(true),
			Key::Bool(false),
			Key::float(0.5),
		];
		keys.sort();
		assert_eq!(
			keys,
			vec![
				Key::Null,
				Key::Bool(false),
				Key::Bool(true),
				Key::float(0.5),
				Key::Int(1),
				Key::Str("a".into()),
			]
		);
	}

	#[test]
	fn key_numbers_unify() {
		assert_eq!(Key::float(3.0), Key::Int(3));
		assert!(Key::float(2.5) < Key::Int(3));
		assert!(Key::Int(3) < Key::float(3.5));
	}

	#[test]
	fn key_natural_string_order() {
		assert!(Key::from("item2") < Key::from("item10"));
	}

	#[test]
	fn pick_nested_paths() {
		let v = json!({"a": {"b": {"c": 42}}, "items": [10, 20]});
		assert_eq!(pick(&v, "a.b.c"), Some(&json!(42)));
		assert_eq!(pick(&v, "items.1"), Some(&json!(20)));
		assert_eq!(pick(&v, "a.missing"), None);
	}

	#[test]
	fn put_creates_intermediates() {
		let mut v = json!({});
		put(&mut v, "a.b.c", json!(1));
		assert_eq!(v, json!({"a": {"b": {"c": 1}}}));
		put(&mut v, "a.b.c", json!(2));
		assert_eq!(v, json!({"a": {"b": {"c": 2}}}));
	}

	#[test]
	fn cut_removes_leaf() {
		let mut v = json!({"a": {"b": 1, "c": 2}});
		assert_eq!(cut(&mut v, "a.b"), Some(json!(1)));
		assert_eq!(v, json!({"a": {"c": 2}}));
		assert_eq!(cut(&mut v, "a.b"), None);
	}
}
