use crate::cnf::ID_LENGTH;
use crate::val;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The primary key of a document
///
/// Ids are scalar, unique within a collection, and immutable for the
/// lifetime of the document.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
	Number(i64),
	String(String),
}

impl Id {
	/// Generate a new random document id
	pub fn rand() -> Self {
		Id::String(nanoid!(ID_LENGTH))
	}

	/// Derive an id from a JSON scalar, if possible
	pub fn from_value(v: &Value) -> Option<Self> {
		match v {
			Value::Number(n) => n.as_i64().map(Id::Number),
			Value::String(s) => Some(Id::String(s.clone())),
			_ => None,
		}
	}

	/// Render this id as a JSON value
	pub fn to_value(&self) -> Value {
		match self {
			Id::Number(n) => Value::from(*n),
			Id::String(s) => Value::from(s.clone()),
		}
	}
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Id::Number(n) => write!(f, "{n}"),
			Id::String(s) => write!(f, "{s}"),
		}
	}
}

impl From<i64> for Id {
	fn from(n: i64) -> Self {
		Id::Number(n)
	}
}

impl From<&str> for Id {
	fn from(s: &str) -> Self {
		Id::String(s.to_owned())
	}
}

impl From<String> for Id {
	fn from(s: String) -> Self {
		Id::String(s)
	}
}

/// A single document stored in a collection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Document {
	/// The primary key of this document
	pub id: Id,
	/// The document payload, always a JSON object
	pub fields: Value,
}

impl Document {
	pub fn new(id: Id, fields: Value) -> Self {
		Self {
			id,
			fields,
		}
	}

	/// Fetch a field value at a dot path
	pub fn pick(&self, path: &str) -> Option<&Value> {
		val::pick(&self.fields, path)
	}
}
