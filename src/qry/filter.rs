use crate::doc::{Document, FieldKind, Schema};
use crate::err::Error;
use crate::val::Key;
use serde_json::Value;
use std::cmp::Ordering;

/// A comparison operator
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum CmpOp {
	Eq,
	Ne,
	Gt,
	Gte,
	Lt,
	Lte,
}

impl CmpOp {
	fn parse(name: &str) -> Option<Self> {
		Some(match name {
			"$eq" => CmpOp::Eq,
			"$ne" => CmpOp::Ne,
			"$gt" => CmpOp::Gt,
			"$gte" => CmpOp::Gte,
			"$lt" => CmpOp::Lt,
			"$lte" => CmpOp::Lte,
			_ => return None,
		})
	}
}

#[derive(Clone, Debug)]
enum Clause {
	Cmp {
		path: String,
		op: CmpOp,
		operand: Value,
	},
	In {
		path: String,
		values: Vec<Value>,
		negate: bool,
	},
	And(Vec<Filter>),
	Or(Vec<Filter>),
}

/// A compiled query predicate
///
/// The top level is a conjunction: every clause must match.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct Filter {
	clauses: Vec<Clause>,
	coercions: Vec<(String, FieldKind)>,
}

impl Filter {
	/// Compile a query object against a schema
	///
	/// In strict mode a query path which the schema does not declare is an
	/// error; in lenient mode it produces a warning and still executes.
	/// Schemaless collections skip the check entirely.
	pub fn compile(query: &Value, schema: &Schema, strict: bool) -> Result<(Self, Vec<String>), Error> {
		let mut warnings = Vec::new();
		let filter = Self::compile_inner(query, schema, strict, &mut warnings)?;
		Ok((filter, warnings))
	}

	fn compile_inner(
		query: &Value,
		schema: &Schema,
		strict: bool,
		warnings: &mut Vec<String>,
	) -> Result<Self, Error> {
		let Some(map) = query.as_object() else {
			return Err(Error::InvalidUpdate("a query must be a JSON object".to_owned()));
		};
		let mut clauses = Vec::new();
		let mut coercions = Vec::new();
		for (path, spec) in map {
			match path.as_str() {
				"$and" | "$or" => {
					let Some(parts) = spec.as_array() else {
						return Err(Error::InvalidUpdate(format!("'{path}' expects an array")));
					};
					let mut subs = Vec::with_capacity(parts.len());
					for part in parts {
						subs.push(Self::compile_inner(part, schema, strict, warnings)?);
					}
					if path == "$and" {
						clauses.push(Clause::And(subs));
					} else {
						clauses.push(Clause::Or(subs));
					}
				}
				_ => {
					// Schema-aware validation of the queried path
					if !schema.is_empty() && path != "id" && !schema.declares(path) {
						if strict {
							return Err(Error::UnknownQueryField(path.clone()));
						}
						warn!("Query references unknown field '{path}'");
						warnings.push(format!("unknown field '{path}'"));
					}
					if let Some(spec) = schema.get(path) {
						if spec.coerce {
							coercions.push((path.clone(), spec.kind));
						}
					}
					match spec.as_object() {
						Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
							for (name, operand) in ops {
								if let Some(op) = CmpOp::parse(name) {
									clauses.push(Clause::Cmp {
										path: path.clone(),
										op,
										operand: operand.clone(),
									});
								} else if name == "$in" || name == "$nin" {
									let Some(values) = operand.as_array() else {
										return Err(Error::InvalidUpdate(format!(
											"'{name}' expects an array"
										)));
									};
									clauses.push(Clause::In {
										path: path.clone(),
										values: values.clone(),
										negate: name == "$nin",
									});
								} else {
									return Err(Error::InvalidUpdate(format!(
										"unknown query operator '{name}'"
									)));
								}
							}
						}
						_ => clauses.push(Clause::Cmp {
							path: path.clone(),
							op: CmpOp::Eq,
							operand: spec.clone(),
						}),
					}
				}
			}
		}
		Ok(Self {
			clauses,
			coercions,
		})
	}

	/// Evaluate the predicate against a document
	pub fn matches(&self, doc: &Document) -> bool {
		self.clauses.iter().all(|c| self.clause_matches(c, doc))
	}

	fn clause_matches(&self, clause: &Clause, doc: &Document) -> bool {
		match clause {
			Clause::And(subs) => subs.iter().all(|f| f.matches(doc)),
			Clause::Or(subs) => subs.iter().any(|f| f.matches(doc)),
			Clause::Cmp {
				path,
				op,
				operand,
			} => {
				let field = self.field_value(doc, path);
				match (field, op) {
					// An absent field differs from every operand
					(None, CmpOp::Ne) => true,
					(None, _) => false,
					(Some(v), op) => self.compare(path, &v, operand, *op),
				}
			}
			Clause::In {
				path,
				values,
				negate,
			} => {
				let field = self.field_value(doc, path);
				let found = match field {
					Some(v) => values.iter().any(|cand| values_equal(&v, cand)),
					None => false,
				};
				found != *negate
			}
		}
	}

	fn field_value(&self, doc: &Document, path: &str) -> Option<Value> {
		if path == "id" {
			return Some(doc.id.to_value());
		}
		doc.pick(path).cloned()
	}

	/// Compare a field value with an operand
	///
	/// Mismatched types fail the comparison unless the schema declared the
	/// field with `coerce`, in which case both sides convert to the
	/// declared kind first.
	fn compare(&self, path: &str, field: &Value, operand: &Value, op: CmpOp) -> bool {
		let coerce_kind = self.coercions.iter().find(|(p, _)| p == path).map(|(_, k)| *k);
		let (lhs, rhs) = match coerce_kind {
			Some(kind) if !compatible(field, operand) => {
				let Some(lhs) = convert(field, kind) else {
					return op == CmpOp::Ne;
				};
				let Some(rhs) = convert(operand, kind) else {
					return op == CmpOp::Ne;
				};
				(lhs, rhs)
			}
			_ => (field.clone(), operand.clone()),
		};
		match op {
			CmpOp::Eq => values_equal(&lhs, &rhs),
			CmpOp::Ne => !values_equal(&lhs, &rhs),
			ordered => match order(&lhs, &rhs) {
				Some(o) => match ordered {
					CmpOp::Gt => o == Ordering::Greater,
					CmpOp::Gte => o != Ordering::Less,
					CmpOp::Lt => o == Ordering::Less,
					CmpOp::Lte => o != Ordering::Greater,
					_ => false,
				},
				None => false,
			},
		}
	}
}

/// Check whether two values belong to the same comparable type class
fn compatible(a: &Value, b: &Value) -> bool {
	(a.is_number() && b.is_number())
		|| (a.is_string() && b.is_string())
		|| (a.is_boolean() && b.is_boolean())
		|| (a.is_null() && b.is_null())
		|| (a.is_array() && b.is_array())
		|| (a.is_object() && b.is_object())
}

/// Value equality with numeric unification, so `1` equals `1.0`
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
	match (Key::from_value(a), Key::from_value(b)) {
		(Some(ka), Some(kb)) => ka == kb,
		_ => a == b,
	}
}

/// Total order between two scalar values of the same type class
fn order(a: &Value, b: &Value) -> Option<Ordering> {
	if !compatible(a, b) {
		return None;
	}
	match (Key::from_value(a), Key::from_value(b)) {
		(Some(ka), Some(kb)) => Some(ka.cmp(&kb)),
		_ => None,
	}
}

/// Convert a value to a schema kind for coerced comparison
fn convert(v: &Value, kind: FieldKind) -> Option<Value> {
	match kind {
		FieldKind::Int | FieldKind::Float | FieldKind::Number => match v {
			Value::Number(_) => Some(v.clone()),
			Value::String(s) => s.trim().parse::<f64>().ok().map(Value::from),
			_ => None,
		},
		FieldKind::String => match v {
			Value::String(_) => Some(v.clone()),
			Value::Number(n) => Some(Value::from(n.to_string())),
			Value::Bool(b) => Some(Value::from(b.to_string())),
			_ => None,
		},
		FieldKind::Bool => match v {
			Value::Bool(_) => Some(v.clone()),
			Value::String(s) => match s.as_str() {
				"true" => Some(Value::Bool(true)),
				"false" => Some(Value::Bool(false)),
				_ => None,
			},
			_ => None,
		},
		_ => Some(v.clone()),
	}
}

/// Extract the equality clauses of a query, used to seed upserts
pub fn equality_clauses(query: &Value) -> Vec<(String, Value)> {
	let mut out = Vec::new();
	if let Some(map) = query.as_object() {
		for (path, spec) in map {
			if path.starts_with('$') {
				continue;
			}
			match spec.as_object() {
				Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
					if let Some(v) = ops.get("$eq") {
						out.push((path.clone(), v.clone()));
					}
				}
				_ => out.push((path.clone(), spec.clone())),
			}
		}
	}
	out
}

/// Convenience: compile and evaluate a query against one document
pub fn matches(query: &Value, schema: &Schema, doc: &Document) -> Result<bool, Error> {
	let (filter, _) = Filter::compile(query, schema, false)?;
	Ok(filter.matches(doc))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::doc::{FieldSpec, Id};
	use serde_json::json;

	fn doc(fields: Value) -> Document {
		Document::new(Id::from(1), fields)
	}

	fn compile(query: Value) -> Filter {
		Filter::compile(&query, &Schema::new(), false).unwrap().0
	}

	#[test]
	fn literal_is_equality() {
		let f = compile(json!({ "name": "ada" }));
		assert!(f.matches(&doc(json!({ "name": "ada" }))));
		assert!(!f.matches(&doc(json!({ "name": "bob" }))));
		assert!(!f.matches(&doc(json!({}))));
	}

	#[test]
	fn id_path_matches_primary_key() {
		let f = compile(json!({ "id": 1 }));
		assert!(f.matches(&doc(json!({}))));
		let f = compile(json!({ "id": 2 }));
		assert!(!f.matches(&doc(json!({}))));
	}

	#[test]
	fn comparison_operators() {
		let f = compile(json!({ "age": { "$gte": 18, "$lt": 65 } }));
		assert!(f.matches(&doc(json!({ "age": 18 }))));
		assert!(f.matches(&doc(json!({ "age": 40 }))));
		assert!(!f.matches(&doc(json!({ "age": 65 }))));
		assert!(!f.matches(&doc(json!({ "age": 17 }))));
	}

	#[test]
	fn ne_matches_absent_field() {
		let f = compile(json!({ "age": { "$ne": 3 } }));
		assert!(f.matches(&doc(json!({}))));
		assert!(f.matches(&doc(json!({ "age": 4 }))));
		assert!(!f.matches(&doc(json!({ "age": 3 }))));
	}

	#[test]
	fn in_and_nin() {
		let f = compile(json!({ "status": { "$in": ["a", "b"] } }));
		assert!(f.matches(&doc(json!({ "status": "a" }))));
		assert!(!f.matches(&doc(json!({ "status": "c" }))));
		assert!(!f.matches(&doc(json!({}))));
		let f = compile(json!({ "status": { "$nin": ["a", "b"] } }));
		assert!(f.matches(&doc(json!({ "status": "c" }))));
		assert!(f.matches(&doc(json!({}))));
		assert!(!f.matches(&doc(json!({ "status": "a" }))));
	}

	#[test]
	fn logical_operators() {
		let f = compile(json!({ "$or": [ { "a": 1 }, { "b": 2 } ] }));
		assert!(f.matches(&doc(json!({ "a": 1 }))));
		assert!(f.matches(&doc(json!({ "b": 2 }))));
		assert!(!f.matches(&doc(json!({ "a": 2, "b": 1 }))));
		let f = compile(json!({ "$and": [ { "a": 1 }, { "b": 2 } ] }));
		assert!(f.matches(&doc(json!({ "a": 1, "b": 2 }))));
		assert!(!f.matches(&doc(json!({ "a": 1 }))));
	}

	#[test]
	fn incompatible_types_fail_the_conjunct() {
		let f = compile(json!({ "age": { "$gt": 5 } }));
		assert!(!f.matches(&doc(json!({ "age": "ten" }))));
	}

	#[test]
	fn coerce_converts_operands() {
		let schema = Schema::new().field("age", FieldSpec::new(FieldKind::Int).coerced());
		let (f, _) = Filter::compile(&json!({ "age": { "$gt": 5 } }), &schema, false).unwrap();
		assert!(f.matches(&doc(json!({ "age": "10" }))));
		assert!(!f.matches(&doc(json!({ "age": "3" }))));
	}

	#[test]
	fn strict_mode_rejects_unknown_fields() {
		let schema = Schema::new().field("name", FieldSpec::new(FieldKind::String));
		let err = Filter::compile(&json!({ "nick": "x" }), &schema, true).unwrap_err();
		assert!(matches!(err, Error::UnknownQueryField(_)));
		let (_, warnings) = Filter::compile(&json!({ "nick": "x" }), &schema, false).unwrap();
		assert_eq!(warnings.len(), 1);
	}

	#[test]
	fn numeric_unification() {
		let f = compile(json!({ "n": 1 }));
		assert!(f.matches(&doc(json!({ "n": 1.0 }))));
	}

	#[test]
	fn equality_clause_extraction() {
		let eq = equality_clauses(&json!({
			"name": "x",
			"age": { "$gt": 3 },
			"tier": { "$eq": "gold" },
			"$or": []
		}));
		assert_eq!(eq.len(), 2);
		assert!(eq.contains(&("name".to_owned(), json!("x"))));
		assert!(eq.contains(&("tier".to_owned(), json!("gold"))));
	}
}
