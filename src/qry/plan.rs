use crate::doc::Id;
use crate::idx::BTreeIndex;
use crate::val::Key;
use serde_json::Value;

/// The access path chosen for a query
///
/// When a top-level conjunct ranges over an indexed field, the index
/// produces the candidate ids and the full predicate filters the rest.
/// Otherwise the query scans the whole collection.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct Plan {
	/// Candidate ids in index order, or `None` for a full scan
	pub candidates: Option<Vec<Id>>,
	/// The name of the index which produced the candidates
	pub index: Option<String>,
}

impl Plan {
	fn scan() -> Self {
		Self::default()
	}
}

/// Choose an access path for a query
///
/// `index_for` resolves a field path to the index covering it, if any.
/// Equality conjuncts are preferred over `$in`, which is preferred over
/// ranges, since they produce the narrowest candidate sets.
pub fn plan<'a, F>(query: &Value, index_for: F) -> Plan
where
	F: Fn(&str) -> Option<&'a BTreeIndex>,
{
	let Some(map) = query.as_object() else {
		return Plan::scan();
	};
	// Flatten one level of $and into the conjunct list
	let mut conjuncts: Vec<(&String, &Value)> = Vec::new();
	for (path, spec) in map {
		if path == "$and" {
			if let Some(parts) = spec.as_array() {
				for part in parts {
					if let Some(inner) = part.as_object() {
						conjuncts.extend(inner.iter());
					}
				}
			}
		} else if !path.starts_with('$') {
			conjuncts.push((path, spec));
		}
	}
	let mut range_pick: Option<Plan> = None;
	let mut in_pick: Option<Plan> = None;
	for (path, spec) in conjuncts {
		let Some(index) = index_for(path) else {
			continue;
		};
		match spec.as_object() {
			Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
				if let Some(eq) = ops.get("$eq").and_then(Key::from_value) {
					return equality(index, eq);
				}
				if in_pick.is_none() {
					if let Some(Value::Array(values)) = ops.get("$in") {
						let mut ids = Vec::new();
						for v in values {
							if let Some(key) = Key::from_value(v) {
								ids.extend(index.search_ids(&key));
							}
						}
						in_pick = Some(Plan {
							candidates: Some(ids),
							index: Some(index.name().to_owned()),
						});
					}
				}
				if range_pick.is_none() {
					if let Some(p) = range(index, ops) {
						range_pick = Some(p);
					}
				}
			}
			_ => {
				if let Some(key) = Key::from_value(spec) {
					return equality(index, key);
				}
			}
		}
	}
	in_pick.or(range_pick).unwrap_or_else(Plan::scan)
}

fn equality(index: &BTreeIndex, key: Key) -> Plan {
	Plan {
		candidates: Some(index.search_ids(&key)),
		index: Some(index.name().to_owned()),
	}
}

/// Build a range plan from the ordering operators of one conjunct
///
/// Scans are inclusive; exclusive bounds are narrowed afterwards by the
/// full predicate, so over-collection at the edges is harmless.
fn range(index: &BTreeIndex, ops: &serde_json::Map<String, Value>) -> Option<Plan> {
	let lo = ops.get("$gte").or_else(|| ops.get("$gt")).and_then(Key::from_value);
	let hi = ops.get("$lte").or_else(|| ops.get("$lt")).and_then(Key::from_value);
	let ids: Vec<Id> = match (lo, hi) {
		(Some(lo), Some(hi)) => index.range_between(lo, hi).map(|(_, id)| id).collect(),
		(Some(lo), None) => index.range_gte(lo).map(|(_, id)| id).collect(),
		(None, Some(hi)) => {
			// Backward scan, reversed so candidates stay in forward order
			let mut ids: Vec<Id> = index.range_lte(hi).map(|(_, id)| id).collect();
			ids.reverse();
			ids
		}
		(None, None) => return None,
	};
	Some(Plan {
		candidates: Some(ids),
		index: Some(index.name().to_owned()),
	})
}
