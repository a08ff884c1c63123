//! MongoDB-style update operators.

use crate::err::Error;
use crate::val::{self, Key};
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Check whether an update document uses operator form
pub fn is_operator_update(update: &Value) -> bool {
	update.as_object().map(|m| m.keys().any(|k| k.starts_with('$'))).unwrap_or(false)
}

/// Check whether an update document removes keys
///
/// A `$unset` forces the replacement path in merge updates, since an
/// in-place merge can not express key removal.
pub fn removes_keys(update: &Value) -> bool {
	update.as_object().map(|m| m.contains_key("$unset")).unwrap_or(false)
}

/// Apply an operator update document to a payload
///
/// Returns whether the payload changed. Mixing `$`-operators with plain
/// keys is rejected, as is any attempt to touch the immutable `id`.
pub fn apply_operators(fields: &mut Value, update: &Value) -> Result<bool, Error> {
	let Some(ops) = update.as_object() else {
		return Err(Error::InvalidUpdate("an update must be a JSON object".to_owned()));
	};
	if ops.keys().any(|k| !k.starts_with('$')) {
		return Err(Error::InvalidUpdate(
			"can not mix update operators with plain fields".to_owned(),
		));
	}
	let before = fields.clone();
	for (op, spec) in ops {
		let Some(args) = spec.as_object() else {
			return Err(Error::InvalidUpdate(format!("'{op}' expects an object")));
		};
		for (path, operand) in args {
			if path == "id" {
				return Err(Error::InvalidUpdate("the document id is immutable".to_owned()));
			}
			apply_one(fields, op, path, operand)?;
		}
	}
	Ok(*fields != before)
}

fn apply_one(fields: &mut Value, op: &str, path: &str, operand: &Value) -> Result<(), Error> {
	match op {
		"$set" => {
			val::put(fields, path, operand.clone());
			Ok(())
		}
		"$unset" => {
			val::cut(fields, path);
			Ok(())
		}
		"$inc" => arithmetic(fields, path, operand, |a, b| a + b),
		"$mul" => arithmetic(fields, path, operand, |a, b| a * b),
		"$min" => bound(fields, path, operand, Ordering::Less),
		"$max" => bound(fields, path, operand, Ordering::Greater),
		"$currentDate" => current_date(fields, path, operand),
		"$addToSet" => add_to_set(fields, path, operand),
		"$push" => push(fields, path, operand),
		"$pull" => pull(fields, path, operand),
		"$pullAll" => pull_all(fields, path, operand),
		"$pop" => pop(fields, path, operand),
		other => Err(Error::InvalidUpdate(format!("unknown update operator '{other}'"))),
	}
}

/// Shared `$inc` / `$mul` handling, seeding an absent field with zero
fn arithmetic(
	fields: &mut Value,
	path: &str,
	operand: &Value,
	apply: impl Fn(f64, f64) -> f64,
) -> Result<(), Error> {
	let Some(n) = operand.as_f64() else {
		return Err(Error::InvalidUpdate(format!("'{path}' expects a numeric operand")));
	};
	let current = match val::pick(fields, path) {
		None => 0.0,
		Some(v) => v.as_f64().ok_or_else(|| {
			Error::InvalidUpdate(format!("'{path}' holds a non-numeric value"))
		})?,
	};
	let both_ints = operand.is_i64()
		&& val::pick(fields, path).map(|v| v.is_i64() || v.is_u64()).unwrap_or(true);
	let result = apply(current, n);
	let value = if both_ints && result.fract() == 0.0 {
		Value::from(result as i64)
	} else {
		Value::from(result)
	};
	val::put(fields, path, value);
	Ok(())
}

/// Shared `$min` / `$max` handling
///
/// An absent current value is no constraint, so the operand always wins.
fn bound(fields: &mut Value, path: &str, operand: &Value, keep_when: Ordering) -> Result<(), Error> {
	let replace = match val::pick(fields, path) {
		None => true,
		Some(current) => match (Key::from_value(operand), Key::from_value(current)) {
			(Some(op_key), Some(cur_key)) => op_key.cmp(&cur_key) == keep_when,
			_ => false,
		},
	};
	if replace {
		val::put(fields, path, operand.clone());
	}
	Ok(())
}

fn current_date(fields: &mut Value, path: &str, operand: &Value) -> Result<(), Error> {
	let now = Utc::now();
	let value = match operand {
		Value::Bool(true) => Value::from(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
		Value::Object(spec) => match spec.get("$type").and_then(|t| t.as_str()) {
			Some("date") => Value::from(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
			Some("timestamp") => Value::from(now.timestamp_millis()),
			_ => {
				return Err(Error::InvalidUpdate(format!(
					"'$currentDate' on '{path}' expects true or a $type spec"
				)))
			}
		},
		_ => {
			return Err(Error::InvalidUpdate(format!(
				"'$currentDate' on '{path}' expects true or a $type spec"
			)))
		}
	};
	val::put(fields, path, value);
	Ok(())
}

/// Fetch the array at a path, creating it when absent
fn array_at<'a>(fields: &'a mut Value, path: &str) -> Result<&'a mut Vec<Value>, Error> {
	if val::pick(fields, path).is_none() {
		val::put(fields, path, Value::Array(Vec::new()));
	}
	// The path was just materialised, so a miss here means a non-array
	match val::pick_mut(fields, path) {
		Some(Value::Array(arr)) => Ok(arr),
		_ => Err(Error::InvalidUpdate(format!("'{path}' does not hold an array"))),
	}
}

fn add_to_set(fields: &mut Value, path: &str, operand: &Value) -> Result<(), Error> {
	let items = each_items(operand);
	let arr = array_at(fields, path)?;
	for item in items {
		if !arr.iter().any(|v| super::filter::values_equal(v, &item)) {
			arr.push(item);
		}
	}
	Ok(())
}

/// The `$each` expansion shared by `$addToSet` and `$push`
fn each_items(operand: &Value) -> Vec<Value> {
	match operand.as_object().and_then(|m| m.get("$each")) {
		Some(Value::Array(items)) => items.clone(),
		_ => vec![operand.clone()],
	}
}

fn push(fields: &mut Value, path: &str, operand: &Value) -> Result<(), Error> {
	let (items, modifiers) = match operand.as_object() {
		Some(m) if m.contains_key("$each") => {
			let Some(items) = m.get("$each").and_then(|v| v.as_array()) else {
				return Err(Error::InvalidUpdate("'$each' expects an array".to_owned()));
			};
			(items.clone(), Some(m.clone()))
		}
		_ => (vec![operand.clone()], None),
	};
	let arr = array_at(fields, path)?;
	// Insert at the requested position, then sort, then slice
	let position = modifiers
		.as_ref()
		.and_then(|m| m.get("$position"))
		.and_then(|p| p.as_i64());
	let at = match position {
		None => arr.len(),
		Some(p) if p >= 0 => (p as usize).min(arr.len()),
		Some(p) => arr.len().saturating_sub(p.unsigned_abs() as usize),
	};
	for (i, item) in items.into_iter().enumerate() {
		arr.insert(at + i, item);
	}
	if let Some(sort) = modifiers.as_ref().and_then(|m| m.get("$sort")) {
		sort_array(arr, sort)?;
	}
	if let Some(slice) = modifiers.as_ref().and_then(|m| m.get("$slice")).and_then(|s| s.as_i64()) {
		if slice >= 0 {
			arr.truncate(slice as usize);
		} else {
			let keep = slice.unsigned_abs() as usize;
			let skip = arr.len().saturating_sub(keep);
			arr.drain(..skip);
		}
	}
	Ok(())
}

fn sort_array(arr: &mut [Value], sort: &Value) -> Result<(), Error> {
	match sort {
		Value::Number(n) => {
			let dir = n.as_i64().unwrap_or(1);
			arr.sort_by(|a, b| {
				let o = scalar_order(a, b);
				if dir < 0 {
					o.reverse()
				} else {
					o
				}
			});
			Ok(())
		}
		Value::Object(spec) => {
			let fields: Vec<(String, i64)> = spec
				.iter()
				.map(|(k, v)| (k.clone(), v.as_i64().unwrap_or(1)))
				.collect();
			arr.sort_by(|a, b| {
				for (path, dir) in &fields {
					let av = val::pick(a, path);
					let bv = val::pick(b, path);
					let o = match (av, bv) {
						(Some(x), Some(y)) => scalar_order(x, y),
						(None, Some(_)) => Ordering::Less,
						(Some(_), None) => Ordering::Greater,
						(None, None) => Ordering::Equal,
					};
					let o = if *dir < 0 {
						o.reverse()
					} else {
						o
					};
					if o != Ordering::Equal {
						return o;
					}
				}
				Ordering::Equal
			});
			Ok(())
		}
		_ => Err(Error::InvalidUpdate("'$sort' expects 1, -1 or a field spec".to_owned())),
	}
}

fn scalar_order(a: &Value, b: &Value) -> Ordering {
	match (Key::from_value(a), Key::from_value(b)) {
		(Some(ka), Some(kb)) => ka.cmp(&kb),
		_ => Ordering::Equal,
	}
}

fn pull(fields: &mut Value, path: &str, operand: &Value) -> Result<(), Error> {
	let arr = array_at(fields, path)?;
	match operand.as_object() {
		// A condition object removes every element it matches
		Some(cond) if cond.keys().any(|k| k.starts_with('$')) => {
			let cond = Value::Object(cond.clone());
			arr.retain(|item| !element_matches(item, &cond));
			Ok(())
		}
		_ => {
			arr.retain(|item| !super::filter::values_equal(item, operand));
			Ok(())
		}
	}
}

/// Evaluate a `$pull` condition object against one array element
fn element_matches(item: &Value, cond: &Value) -> bool {
	let Some(ops) = cond.as_object() else {
		return false;
	};
	ops.iter().all(|(op, operand)| {
		let o = scalar_order_checked(item, operand);
		match (op.as_str(), o) {
			("$eq", Some(Ordering::Equal)) => true,
			("$ne", Some(x)) => x != Ordering::Equal,
			("$ne", None) => true,
			("$gt", Some(Ordering::Greater)) => true,
			("$gte", Some(x)) => x != Ordering::Less,
			("$lt", Some(Ordering::Less)) => true,
			("$lte", Some(x)) => x != Ordering::Greater,
			("$in", _) => operand
				.as_array()
				.map(|vs| vs.iter().any(|v| super::filter::values_equal(item, v)))
				.unwrap_or(false),
			("$nin", _) => operand
				.as_array()
				.map(|vs| !vs.iter().any(|v| super::filter::values_equal(item, v)))
				.unwrap_or(false),
			_ => false,
		}
	})
}

fn scalar_order_checked(a: &Value, b: &Value) -> Option<Ordering> {
	match (Key::from_value(a), Key::from_value(b)) {
		(Some(ka), Some(kb)) => Some(ka.cmp(&kb)),
		_ => None,
	}
}

fn pull_all(fields: &mut Value, path: &str, operand: &Value) -> Result<(), Error> {
	let Some(values) = operand.as_array() else {
		return Err(Error::InvalidUpdate("'$pullAll' expects an array".to_owned()));
	};
	let values = values.clone();
	let arr = array_at(fields, path)?;
	arr.retain(|item| !values.iter().any(|v| super::filter::values_equal(item, v)));
	Ok(())
}

fn pop(fields: &mut Value, path: &str, operand: &Value) -> Result<(), Error> {
	let Some(dir) = operand.as_i64() else {
		return Err(Error::InvalidUpdate("'$pop' expects 1 or -1".to_owned()));
	};
	let arr = array_at(fields, path)?;
	if arr.is_empty() {
		return Ok(());
	}
	if dir >= 0 {
		arr.pop();
	} else {
		arr.remove(0);
	}
	Ok(())
}

/// Overlay update fields onto a payload without removing existing keys
pub fn merge_shallow(fields: &mut Value, update: &Value) {
	if let (Some(target), Some(source)) = (fields.as_object_mut(), update.as_object()) {
		for (k, v) in source {
			target.insert(k.clone(), v.clone());
		}
	}
}

/// Build an object value from a list of path assignments
pub fn seed_from(clauses: &[(String, Value)]) -> Value {
	let mut out = Value::Object(Map::new());
	for (path, v) in clauses {
		val::put(&mut out, path, v.clone());
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn apply(fields: Value, update: Value) -> (Value, bool) {
		let mut fields = fields;
		let modified = apply_operators(&mut fields, &update).unwrap();
		(fields, modified)
	}

	#[test]
	fn set_and_unset() {
		let (v, m) = apply(json!({ "a": 1 }), json!({ "$set": { "b.c": 2 } }));
		assert!(m);
		assert_eq!(v, json!({ "a": 1, "b": { "c": 2 } }));
		let (v, m) = apply(v, json!({ "$unset": { "a": "" } }));
		assert!(m);
		assert_eq!(v, json!({ "b": { "c": 2 } }));
	}

	#[test]
	fn inc_seeds_missing_field() {
		let (v, _) = apply(json!({}), json!({ "$inc": { "n": 5 } }));
		assert_eq!(v["n"], json!(5));
		let (v, _) = apply(v, json!({ "$inc": { "n": -2 } }));
		assert_eq!(v["n"], json!(3));
	}

	#[test]
	fn inc_non_numeric_fails() {
		let mut v = json!({ "n": "x" });
		let err = apply_operators(&mut v, &json!({ "$inc": { "n": 1 } })).unwrap_err();
		assert!(matches!(err, Error::InvalidUpdate(_)));
	}

	#[test]
	fn mul_keeps_integer_arithmetic() {
		let (v, _) = apply(json!({ "n": 4 }), json!({ "$mul": { "n": 3 } }));
		assert_eq!(v["n"], json!(12));
		let (v, _) = apply(json!({ "n": 4 }), json!({ "$mul": { "n": 0.5 } }));
		assert_eq!(v["n"], json!(2.0));
	}

	#[test]
	fn min_max_respect_absent_values() {
		let (v, _) = apply(json!({}), json!({ "$min": { "low": 10 } }));
		assert_eq!(v["low"], json!(10));
		let (v, _) = apply(v, json!({ "$min": { "low": 3 } }));
		assert_eq!(v["low"], json!(3));
		let (v, _) = apply(v, json!({ "$max": { "low": 7 } }));
		assert_eq!(v["low"], json!(7));
		let (v, m) = apply(v.clone(), json!({ "$max": { "low": 2 } }));
		assert!(!m);
		assert_eq!(v["low"], json!(7));
	}

	#[test]
	fn current_date_forms() {
		let (v, _) = apply(json!({}), json!({ "$currentDate": { "at": true } }));
		assert!(v["at"].is_string());
		let (v, _) =
			apply(json!({}), json!({ "$currentDate": { "ts": { "$type": "timestamp" } } }));
		assert!(v["ts"].is_number());
	}

	#[test]
	fn add_to_set_deduplicates() {
		let (v, _) = apply(json!({ "tags": ["a"] }), json!({ "$addToSet": { "tags": "a" } }));
		assert_eq!(v["tags"], json!(["a"]));
		let (v, _) =
			apply(v, json!({ "$addToSet": { "tags": { "$each": ["a", "b", "c"] } } }));
		assert_eq!(v["tags"], json!(["a", "b", "c"]));
	}

	#[test]
	fn push_plain_and_each() {
		let (v, _) = apply(json!({}), json!({ "$push": { "xs": 1 } }));
		assert_eq!(v["xs"], json!([1]));
		let (v, _) = apply(v, json!({ "$push": { "xs": { "$each": [2, 3] } } }));
		assert_eq!(v["xs"], json!([1, 2, 3]));
	}

	#[test]
	fn push_composite_position_sort_slice() {
		let (v, _) = apply(
			json!({ "items": [3, 1, 2] }),
			json!({ "$push": { "items": {
				"$each": [5, 4],
				"$position": 0,
				"$sort": 1,
				"$slice": 4
			} } }),
		);
		assert_eq!(v["items"], json!([1, 2, 3, 4]));
	}

	#[test]
	fn push_sort_by_field() {
		let (v, _) = apply(
			json!({ "scores": [ { "s": 2 }, { "s": 9 } ] }),
			json!({ "$push": { "scores": {
				"$each": [ { "s": 5 } ],
				"$sort": { "s": -1 }
			} } }),
		);
		assert_eq!(v["scores"], json!([ { "s": 9 }, { "s": 5 }, { "s": 2 } ]));
	}

	#[test]
	fn pull_by_value_and_condition() {
		let (v, _) = apply(json!({ "xs": [1, 2, 3, 2] }), json!({ "$pull": { "xs": 2 } }));
		assert_eq!(v["xs"], json!([1, 3]));
		let (v, _) =
			apply(json!({ "xs": [1, 5, 9] }), json!({ "$pull": { "xs": { "$gt": 4 } } }));
		assert_eq!(v["xs"], json!([1]));
	}

	#[test]
	fn pull_all_and_pop() {
		let (v, _) =
			apply(json!({ "xs": [1, 2, 3, 2] }), json!({ "$pullAll": { "xs": [2, 3] } }));
		assert_eq!(v["xs"], json!([1]));
		let (v, _) = apply(json!({ "xs": [1, 2, 3] }), json!({ "$pop": { "xs": 1 } }));
		assert_eq!(v["xs"], json!([1, 2]));
		let (v, _) = apply(json!({ "xs": [1, 2, 3] }), json!({ "$pop": { "xs": -1 } }));
		assert_eq!(v["xs"], json!([2, 3]));
	}

	#[test]
	fn mixing_operators_and_fields_fails() {
		let mut v = json!({});
		let err =
			apply_operators(&mut v, &json!({ "$set": { "a": 1 }, "b": 2 })).unwrap_err();
		assert!(matches!(err, Error::InvalidUpdate(_)));
	}

	#[test]
	fn id_is_immutable() {
		let mut v = json!({});
		let err = apply_operators(&mut v, &json!({ "$set": { "id": 9 } })).unwrap_err();
		assert!(matches!(err, Error::InvalidUpdate(_)));
	}

	#[test]
	fn unmodified_update_reports_false() {
		let (_, m) = apply(json!({ "a": 1 }), json!({ "$set": { "a": 1 } }));
		assert!(!m);
	}
}
