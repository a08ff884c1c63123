use crate::err::Error;
use crate::val;
use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// The declared type of a schema field
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum FieldKind {
	#[default]
	Any,
	Bool,
	Int,
	Float,
	Number,
	String,
	Array,
	Object,
	DateTime,
}

impl FieldKind {
	/// Check whether a value matches this kind without conversion
	fn matches(&self, v: &Value) -> bool {
		match self {
			FieldKind::Any => true,
			FieldKind::Bool => v.is_boolean(),
			FieldKind::Int => v.is_i64() || v.is_u64(),
			FieldKind::Float => v.is_f64(),
			FieldKind::Number => v.is_number(),
			FieldKind::String => v.is_string(),
			FieldKind::Array => v.is_array(),
			FieldKind::Object => v.is_object(),
			FieldKind::DateTime => {
				v.as_str().map(|s| DateTime::parse_from_rfc3339(s).is_ok()).unwrap_or(false)
			}
		}
	}

	/// Attempt to convert a value to this kind
	fn convert(&self, v: &Value) -> Option<Value> {
		match self {
			FieldKind::Any => Some(v.clone()),
			FieldKind::Bool => match v {
				Value::Bool(_) => Some(v.clone()),
				Value::String(s) => match s.as_str() {
					"true" => Some(Value::Bool(true)),
					"false" => Some(Value::Bool(false)),
					_ => None,
				},
				Value::Number(n) => n.as_i64().map(|i| Value::Bool(i != 0)),
				_ => None,
			},
			FieldKind::Int => match v {
				Value::Number(n) => {
					n.as_i64().or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)).map(Value::from)
				}
				Value::String(s) => s.trim().parse::<i64>().ok().map(Value::from),
				_ => None,
			},
			FieldKind::Float | FieldKind::Number => match v {
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
			FieldKind::Array => v.is_array().then(|| v.clone()),
			FieldKind::Object => v.is_object().then(|| v.clone()),
			FieldKind::DateTime => match v {
				Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|_| v.clone()),
				Value::Number(n) => n.as_i64().and_then(|secs| {
					DateTime::<Utc>::from_timestamp(secs, 0)
						.map(|dt| Value::from(dt.to_rfc3339_opts(SecondsFormat::Millis, true)))
				}),
				_ => None,
			},
		}
	}
}

/// How an absent field is filled in before validation
#[derive(Clone)]
#[non_exhaustive]
pub enum DefaultValue {
	/// A fixed value
	Static(Value),
	/// The current UTC instant, as an RFC 3339 string
	Now,
	/// A generated value
	///
	/// Generator bodies are code, not configuration. They serialize as a
	/// bare marker, so a schema restored from the manifest must be
	/// redefined to reattach them.
	Generator(Arc<dyn Fn() -> Value + Send + Sync>),
}

impl DefaultValue {
	/// Produce the default value
	pub fn produce(&self) -> Value {
		match self {
			DefaultValue::Static(v) => v.clone(),
			DefaultValue::Now => Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
			DefaultValue::Generator(f) => f(),
		}
	}
}

impl fmt::Debug for DefaultValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DefaultValue::Static(v) => write!(f, "Static({v})"),
			DefaultValue::Now => write!(f, "Now"),
			DefaultValue::Generator(_) => write!(f, "Generator(..)"),
		}
	}
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum DefaultRepr {
	Static {
		value: Value,
	},
	Now,
	Generator,
}

impl Serialize for DefaultValue {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let repr = match self {
			DefaultValue::Static(v) => DefaultRepr::Static {
				value: v.clone(),
			},
			DefaultValue::Now => DefaultRepr::Now,
			DefaultValue::Generator(_) => DefaultRepr::Generator,
		};
		repr.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for DefaultValue {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		Ok(match DefaultRepr::deserialize(deserializer)? {
			DefaultRepr::Static {
				value,
			} => DefaultValue::Static(value),
			DefaultRepr::Now => DefaultValue::Now,
			DefaultRepr::Generator => DefaultValue::Generator(Arc::new(|| Value::Null)),
		})
	}
}

/// A hint that a schema field should carry a secondary index
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IndexHint {
	pub unique: bool,
	pub sparse: bool,
}

/// The descriptor of a single schema field
#[derive(Clone, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct FieldSpec {
	/// The declared field type
	pub kind: FieldKind,
	/// Whether the field must be present after defaults apply
	#[serde(default)]
	pub required: bool,
	/// The default applied when the field is absent
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub default: Option<DefaultValue>,
	/// Whether mismatched values convert to the declared type
	#[serde(default)]
	pub coerce: bool,
	/// Whether this field should be indexed
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub index: Option<IndexHint>,
	/// A human readable description
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// A custom validation predicate, returning a reason on rejection
	#[serde(skip)]
	pub validator: Option<Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>>,
}

impl fmt::Debug for FieldSpec {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FieldSpec")
			.field("kind", &self.kind)
			.field("required", &self.required)
			.field("default", &self.default)
			.field("coerce", &self.coerce)
			.field("index", &self.index)
			.finish_non_exhaustive()
	}
}

impl FieldSpec {
	pub fn new(kind: FieldKind) -> Self {
		Self {
			kind,
			..Default::default()
		}
	}

	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}

	pub fn with_default(mut self, default: DefaultValue) -> Self {
		self.default = Some(default);
		self
	}

	pub fn coerced(mut self) -> Self {
		self.coerce = true;
		self
	}

	pub fn indexed(mut self, unique: bool, sparse: bool) -> Self {
		self.index = Some(IndexHint {
			unique,
			sparse,
		});
		self
	}

	pub fn with_description(mut self, text: impl Into<String>) -> Self {
		self.description = Some(text.into());
		self
	}

	pub fn with_validator(
		mut self,
		f: impl Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
	) -> Self {
		self.validator = Some(Arc::new(f));
		self
	}
}

/// The schema of a collection
///
/// A document is valid iff every required field is present once defaults
/// apply, and every typed field matches or converts to its declared kind.
/// Fields not declared in the schema are allowed; documents are open
/// mappings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Schema {
	fields: IndexMap<String, FieldSpec>,
}

impl Schema {
	pub fn new() -> Self {
		Self::default()
	}

	/// Declare a field at a dot path
	pub fn field(mut self, path: impl Into<String>, spec: FieldSpec) -> Self {
		self.fields.insert(path.into(), spec);
		self
	}

	/// The declared fields, in declaration order
	pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
		self.fields.iter()
	}

	/// Look up the declaration for a field path
	pub fn get(&self, path: &str) -> Option<&FieldSpec> {
		self.fields.get(path)
	}

	/// Check whether a field path is declared
	pub fn declares(&self, path: &str) -> bool {
		self.fields.contains_key(path)
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}

	/// Fill in absent fields which declare a default
	pub fn apply_defaults(&self, fields: &mut Value) {
		for (path, spec) in &self.fields {
			if let Some(default) = &spec.default {
				if val::pick(fields, path).is_none() {
					val::put(fields, path, default.produce());
				}
			}
		}
	}

	/// Validate a document payload, coercing typed fields in place
	///
	/// In lenient mode type mismatches which can not convert are returned
	/// as warnings instead of failing the document.
	pub fn validate(&self, fields: &mut Value, lenient: bool) -> Result<Vec<String>, Error> {
		let mut warnings = Vec::new();
		for (path, spec) in &self.fields {
			let current = val::pick(fields, path).cloned();
			match current {
				None => {
					if spec.required {
						if lenient {
							warnings.push(format!("required field '{path}' is missing"));
							continue;
						}
						return Err(Error::SchemaViolation {
							field: path.clone(),
							reason: "is required but missing".to_owned(),
						});
					}
				}
				Some(v) => {
					// Null satisfies any optional field
					if v.is_null() && !spec.required {
						continue;
					}
					if !spec.kind.matches(&v) {
						let converted = if spec.coerce {
							spec.kind.convert(&v)
						} else {
							None
						};
						match converted {
							Some(coerced) => val::put(fields, path, coerced),
							None => {
								if lenient {
									warnings.push(format!(
										"field '{path}' does not match type {:?}",
										spec.kind
									));
									continue;
								}
								return Err(Error::SchemaViolation {
									field: path.clone(),
									reason: format!("does not match type {:?}", spec.kind),
								});
							}
						}
					}
					if let Some(validator) = &spec.validator {
						let checked = val::pick(fields, path).cloned().unwrap_or(Value::Null);
						if let Err(reason) = validator(&checked) {
							if lenient {
								warnings.push(format!("field '{path}' {reason}"));
								continue;
							}
							return Err(Error::SchemaViolation {
								field: path.clone(),
								reason,
							});
						}
					}
				}
			}
		}
		Ok(warnings)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn schema() -> Schema {
		Schema::new()
			.field("name", FieldSpec::new(FieldKind::String).required())
			.field("age", FieldSpec::new(FieldKind::Int).coerced())
			.field(
				"status",
				FieldSpec::new(FieldKind::String)
					.with_default(DefaultValue::Static(json!("new"))),
			)
			.field("createdAt", FieldSpec::new(FieldKind::DateTime).with_default(DefaultValue::Now))
	}

	#[test]
	fn defaults_fill_absent_fields() {
		let mut fields = json!({ "name": "x" });
		schema().apply_defaults(&mut fields);
		assert_eq!(fields["status"], json!("new"));
		assert!(fields["createdAt"].is_string());
	}

	#[test]
	fn defaults_keep_present_fields() {
		let mut fields = json!({ "name": "x", "status": "old" });
		schema().apply_defaults(&mut fields);
		assert_eq!(fields["status"], json!("old"));
	}

	#[test]
	fn missing_required_field_fails() {
		let mut fields = json!({ "age": 3 });
		let err = schema().validate(&mut fields, false).unwrap_err();
		assert!(matches!(err, Error::SchemaViolation { field, .. } if field == "name"));
	}

	#[test]
	fn coercion_converts_in_place() {
		let mut fields = json!({ "name": "x", "age": "42" });
		schema().validate(&mut fields, false).unwrap();
		assert_eq!(fields["age"], json!(42));
	}

	#[test]
	fn type_mismatch_without_coerce_fails() {
		let s = Schema::new().field("age", FieldSpec::new(FieldKind::Int));
		let mut fields = json!({ "age": "nope" });
		let err = s.validate(&mut fields, false).unwrap_err();
		assert!(matches!(err, Error::SchemaViolation { .. }));
	}

	#[test]
	fn lenient_mode_downgrades_to_warnings() {
		let mut fields = json!({ "age": "nope" });
		let warnings = schema().validate(&mut fields, true).unwrap();
		assert_eq!(warnings.len(), 2);
	}

	#[test]
	fn custom_validator_runs() {
		let s = Schema::new().field(
			"age",
			FieldSpec::new(FieldKind::Int).with_validator(|v| {
				if v.as_i64().unwrap_or(0) >= 0 {
					Ok(())
				} else {
					Err("must not be negative".to_owned())
				}
			}),
		);
		let mut ok = json!({ "age": 3 });
		assert!(s.validate(&mut ok, false).is_ok());
		let mut bad = json!({ "age": -1 });
		assert!(s.validate(&mut bad, false).is_err());
	}

	#[test]
	fn generator_defaults_serialize_as_marker() {
		let s = Schema::new().field(
			"tag",
			FieldSpec::new(FieldKind::String)
				.with_default(DefaultValue::Generator(Arc::new(|| json!("gen")))),
		);
		let text = serde_json::to_string(&s).unwrap();
		assert!(text.contains("generator"));
		let back: Schema = serde_json::from_str(&text).unwrap();
		assert!(back.get("tag").unwrap().default.is_some());
	}
}
