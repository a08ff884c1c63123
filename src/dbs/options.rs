use crate::doc::Schema;
use crate::idx::IndexDef;
use crate::kvs::AdapterKind;
use serde::{Deserialize, Serialize};

/// The isolation level of a transaction
///
/// The facade serialises writers, so both levels observe their own writes;
/// snapshot isolation additionally pins the before-image used on rollback.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum IsolationLevel {
	ReadCommitted,
	#[default]
	Snapshot,
}

/// Options accepted when starting a transaction
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct TransactionOptions {
	/// The requested isolation level
	pub isolation: IsolationLevel,
	/// An optional label carried into change records and audit events
	pub label: Option<String>,
}

impl TransactionOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
		self.isolation = isolation;
		self
	}

	pub fn with_label(mut self, label: impl Into<String>) -> Self {
		self.label = Some(label.into());
		self
	}
}

/// Options accepted by atomic update operations
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct UpdateOptions {
	/// Insert a document seeded from the filter when nothing matches
	pub upsert: bool,
	/// Update every match instead of only the first
	pub multi: bool,
	/// Overlay plain update documents instead of replacing
	pub merge: bool,
}

impl UpdateOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn upsert(mut self) -> Self {
		self.upsert = true;
		self
	}

	pub fn multi(mut self) -> Self {
		self.multi = true;
		self
	}

	pub fn merge(mut self) -> Self {
		self.merge = true;
		self
	}
}

/// The full configuration of a collection
///
/// This record is what the schema manifest persists per collection, so it
/// carries everything needed to re-register the collection on reopen.
/// Unrecognised manifest keys are rejected rather than silently dropped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[non_exhaustive]
pub struct CollectionConfig {
	/// The collection name
	pub name: String,
	/// The storage backend for this collection
	#[serde(default)]
	pub adapter: AdapterKind,
	/// The declared indexes
	#[serde(default)]
	pub indexes: Vec<IndexDef>,
	/// The document schema
	#[serde(default)]
	pub schema: Schema,
	/// Whether schema validation downgrades failures to warnings
	#[serde(default)]
	pub lenient: bool,
}

impl CollectionConfig {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			adapter: AdapterKind::default(),
			indexes: Vec::new(),
			schema: Schema::default(),
			lenient: false,
		}
	}

	pub fn with_adapter(mut self, adapter: AdapterKind) -> Self {
		self.adapter = adapter;
		self
	}

	pub fn with_schema(mut self, schema: Schema) -> Self {
		self.schema = schema;
		self
	}

	pub fn with_index(mut self, index: IndexDef) -> Self {
		self.indexes.push(index);
		self
	}

	pub fn lenient(mut self) -> Self {
		self.lenient = true;
		self
	}
}
