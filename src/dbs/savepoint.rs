//! The per-transaction savepoint stack.
//!
//! A savepoint pairs a deep copy of every collection's document set with
//! the opaque snapshot handles returned by each collection's indexes, so
//! a rollback restores both sides symmetrically.

use crate::doc::Document;
use crate::err::Error;
use crate::idx::SavepointHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// The opaque identifier of a savepoint
pub type SavepointId = Uuid;

/// One entry on the savepoint stack
#[derive(Debug)]
#[non_exhaustive]
pub struct SavepointEntry {
	/// The opaque savepoint id
	pub id: SavepointId,
	/// The name, unique within the transaction
	pub name: String,
	/// When the savepoint was created
	pub created: DateTime<Utc>,
	/// Every collection's full document set at creation, in list order
	pub(crate) documents: HashMap<String, Vec<Document>>,
	/// The paired index savepoint handles, per collection and index
	pub(crate) index_handles: HashMap<String, Vec<(String, SavepointHandle)>>,
}

/// Descriptive information about one savepoint
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct SavepointInfo {
	pub savepoint_id: SavepointId,
	pub name: String,
	pub timestamp: DateTime<Utc>,
	pub transaction_id: Uuid,
	pub collections_count: usize,
	pub btree_contexts_count: usize,
}

/// The ordered stack of savepoints within one transaction
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct SavepointStack {
	entries: Vec<SavepointEntry>,
}

impl SavepointStack {
	/// Push a new savepoint, enforcing name uniqueness
	pub(crate) fn create(
		&mut self,
		name: &str,
		documents: HashMap<String, Vec<Document>>,
		index_handles: HashMap<String, Vec<(String, SavepointHandle)>>,
	) -> Result<SavepointId, Error> {
		if self.entries.iter().any(|e| e.name == name) {
			return Err(Error::DuplicateSavepointName(name.to_owned()));
		}
		let id = Uuid::new_v4();
		self.entries.push(SavepointEntry {
			id,
			name: name.to_owned(),
			created: Utc::now(),
			documents,
			index_handles,
		});
		Ok(id)
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Find the stack position of a savepoint
	pub(crate) fn position(&self, id: SavepointId) -> Result<usize, Error> {
		if self.entries.is_empty() {
			return Err(Error::NoSavepointsFound);
		}
		self.entries
			.iter()
			.position(|e| e.id == id)
			.ok_or_else(|| Error::SavepointNotFound(id.to_string()))
	}

	/// Resolve a savepoint by name
	pub(crate) fn id_of(&self, name: &str) -> Option<SavepointId> {
		self.entries.iter().find(|e| e.name == name).map(|e| e.id)
	}

	pub(crate) fn get(&self, pos: usize) -> &SavepointEntry {
		&self.entries[pos]
	}

	/// Discard every entry above a position, keeping the target
	pub(crate) fn truncate_above(&mut self, pos: usize) -> Vec<SavepointEntry> {
		self.entries.split_off(pos + 1)
	}

	/// Remove a single entry
	pub(crate) fn remove(&mut self, pos: usize) -> SavepointEntry {
		self.entries.remove(pos)
	}

	/// The savepoint names, in creation order
	pub(crate) fn names(&self) -> Vec<String> {
		self.entries.iter().map(|e| e.name.clone()).collect()
	}

	/// Describe a savepoint
	pub(crate) fn info(&self, id: SavepointId, transaction_id: Uuid) -> Result<SavepointInfo, Error> {
		let entry = self.get(self.position(id)?);
		Ok(SavepointInfo {
			savepoint_id: entry.id,
			name: entry.name.clone(),
			timestamp: entry.created,
			transaction_id,
			collections_count: entry.documents.len(),
			btree_contexts_count: entry.index_handles.values().map(|v| v.len()).sum(),
		})
	}
}
