//! Ordered secondary indexes.

pub mod btree;

pub use btree::{BTreeIndex, SavepointHandle};

use serde::{Deserialize, Serialize};

/// Options controlling the behaviour of a single index
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IndexOptions {
	/// A unique index holds at most one document id per key
	#[serde(default)]
	pub unique: bool,
	/// A sparse index omits documents whose key path is absent
	#[serde(default)]
	pub sparse: bool,
}

impl IndexOptions {
	pub fn unique() -> Self {
		Self {
			unique: true,
			sparse: false,
		}
	}

	pub fn sparse() -> Self {
		Self {
			unique: false,
			sparse: true,
		}
	}
}

/// The declaration of an index on a collection field
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IndexDef {
	/// The index name, unique within its collection
	pub name: String,
	/// The dot path of the indexed field
	pub field: String,
	/// The index behaviour options
	#[serde(default)]
	pub options: IndexOptions,
}

impl IndexDef {
	pub fn new(name: impl Into<String>, field: impl Into<String>, options: IndexOptions) -> Self {
		Self {
			name: name.into(),
			field: field.into(),
			options,
		}
	}
}
