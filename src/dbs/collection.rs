use crate::dbs::options::{CollectionConfig, UpdateOptions};
use crate::doc::{Document, FieldKind, Id, Schema};
use crate::doc::DocumentList;
use crate::err::Error;
use crate::idx::{BTreeIndex, IndexDef, IndexOptions, SavepointHandle};
use crate::kvs::Adapter;
use crate::qry::filter::{self, Filter};
use crate::qry::{plan, update};
use crate::val::{self, Key};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashSet;

/// The result of an atomic update operation
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct UpdateOutcome {
	/// How many documents matched the filter
	pub matched: usize,
	/// How many documents actually changed
	pub modified: usize,
	/// Whether a document was inserted through an upsert
	pub upserted: bool,
	/// The ids of upserted documents
	pub upserted_ids: Vec<Id>,
	/// The documents after modification, in processing order
	pub modified_documents: Vec<Document>,
	/// The matching before images, aligned with `modified_documents`
	pub(crate) before_images: Vec<Document>,
}

/// One secondary index attached to a collection
#[derive(Debug, Clone)]
struct IndexSlot {
	field: String,
	btree: BTreeIndex,
}

/// The undo state taken at the start of a mutating call
///
/// Every failed write must leave the collection untouched, so mutating
/// calls snapshot the documents and savepoint every index up front, then
/// either release the state or roll back to it.
struct UndoGuard {
	documents: Vec<Document>,
	handles: Vec<(String, SavepointHandle)>,
}

/// A named, ordered container of documents
///
/// A collection owns its primary document list, its secondary indexes,
/// its schema, and a storage adapter for persistence.
#[derive(Debug)]
#[non_exhaustive]
pub struct Collection {
	name: String,
	list: DocumentList,
	indexes: IndexMap<String, IndexSlot>,
	schema: Schema,
	adapter: Adapter,
	lenient: bool,
	strict_queries: bool,
	dirty: bool,
}

impl Collection {
	pub(crate) fn new(config: &CollectionConfig, adapter: Adapter, strict_queries: bool) -> Self {
		Self {
			name: config.name.clone(),
			list: DocumentList::new(),
			indexes: IndexMap::new(),
			schema: config.schema.clone(),
			adapter,
			lenient: config.lenient,
			strict_queries,
			dirty: false,
		}
	}

	/// The collection name
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The collection schema
	pub fn schema(&self) -> &Schema {
		&self.schema
	}

	/// The number of live documents
	pub fn len(&self) -> usize {
		self.list.len()
	}

	pub fn is_empty(&self) -> bool {
		self.list.is_empty()
	}

	pub(crate) fn is_dirty(&self) -> bool {
		self.dirty
	}

	/// The storage adapter backing this collection
	pub(crate) fn adapter(&self) -> &Adapter {
		&self.adapter
	}

	fn index_on(&self, field: &str) -> Option<&BTreeIndex> {
		self.indexes.values().find(|slot| slot.field == field).map(|slot| &slot.btree)
	}

	// ------------------------------------------------------------------
	// Undo state
	// ------------------------------------------------------------------

	fn begin_undo(&mut self) -> UndoGuard {
		let documents = self.list.snapshot();
		let handles = self
			.indexes
			.iter_mut()
			.map(|(name, slot)| (name.clone(), slot.btree.create_savepoint()))
			.collect();
		UndoGuard {
			documents,
			handles,
		}
	}

	fn commit_undo(&mut self, guard: UndoGuard) {
		for (name, handle) in guard.handles {
			if let Some(slot) = self.indexes.get_mut(&name) {
				// The handle was created in this call, so it must resolve
				let _ = slot.btree.release_savepoint(handle);
			}
		}
	}

	fn rollback_undo(&mut self, guard: UndoGuard) {
		for (name, handle) in guard.handles {
			if let Some(slot) = self.indexes.get_mut(&name) {
				let _ = slot.btree.rollback_to_savepoint(handle);
				let _ = slot.btree.release_savepoint(handle);
			}
		}
		self.list.reset_from(guard.documents);
	}

	// ------------------------------------------------------------------
	// Writes
	// ------------------------------------------------------------------

	/// Insert a document
	///
	/// Applies schema defaults, validates, assigns an id when the payload
	/// does not carry one, stores the document, and updates every index.
	/// On a unique index violation every partial mutation is undone.
	pub fn insert(&mut self, value: Value) -> Result<Document, Error> {
		if !value.is_object() {
			return Err(Error::InvalidUpdate("a document must be a JSON object".to_owned()));
		}
		let mut fields = value;
		self.schema.apply_defaults(&mut fields);
		let warnings = self.schema.validate(&mut fields, self.lenient)?;
		for warning in warnings {
			warn!("Validation warning on '{}': {warning}", self.name);
		}
		// The id lives on the document, not in the payload
		let id = match val::cut(&mut fields, "id") {
			None => Id::rand(),
			Some(v) => Id::from_value(&v)
				.ok_or_else(|| Error::InvalidUpdate("a document id must be a scalar".to_owned()))?,
		};
		let doc = Document::new(id, fields);
		self.insert_doc(doc.clone())?;
		self.dirty = true;
		Ok(doc)
	}

	/// Store a prepared document and index it, undoing on failure
	fn insert_doc(&mut self, doc: Document) -> Result<(), Error> {
		// Derive every index key before mutating anything
		let mut keys: Vec<(String, Key)> = Vec::with_capacity(self.indexes.len());
		for (name, slot) in &self.indexes {
			let sparse = slot.btree.options().sparse;
			if let Some(key) =
				index_key_of(&self.schema, &self.name, &doc.fields, &slot.field, sparse)?
			{
				keys.push((name.clone(), key));
			}
		}
		self.list.push(doc.clone())?;
		let mut indexed: Vec<(String, Key)> = Vec::new();
		for (name, key) in keys {
			let Some(slot) = self.indexes.get_mut(&name) else {
				continue;
			};
			if let Err(e) = slot.btree.insert(key.clone(), doc.id.clone()) {
				// Undo the partial mutations before surfacing the error
				for (done, k) in &indexed {
					if let Some(s) = self.indexes.get_mut(done) {
						s.btree.remove(k, Some(&doc.id));
					}
				}
				self.list.remove_with_id(&doc.id);
				return Err(e);
			}
			indexed.push((name, key));
		}
		Ok(())
	}

	/// Update every document matching a query
	///
	/// Returns the before and after image of each changed document. The
	/// call is atomic: any failure rolls the collection back to its state
	/// at entry.
	pub fn update(
		&mut self,
		query: &Value,
		update: &Value,
		merge: bool,
	) -> Result<Vec<(Document, Document)>, Error> {
		let ids = self.matching_ids(query)?;
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let guard = self.begin_undo();
		let mut changes = Vec::with_capacity(ids.len());
		for id in ids {
			match self.apply_update_to_doc(&id, update, merge) {
				Ok(change) => changes.push(change),
				Err(e) => {
					self.rollback_undo(guard);
					return Err(e);
				}
			}
		}
		self.commit_undo(guard);
		self.dirty = true;
		Ok(changes)
	}

	/// Atomically update or insert documents
	pub fn update_atomic(
		&mut self,
		filter: &Value,
		update: &Value,
		opts: UpdateOptions,
	) -> Result<UpdateOutcome, Error> {
		let mut ids = self.matching_ids(filter)?;
		if ids.is_empty() {
			if !opts.upsert {
				return Ok(UpdateOutcome::default());
			}
			// Seed the new document from the filter's equality clauses
			let mut seed = update::seed_from(&filter::equality_clauses(filter));
			if update::is_operator_update(update) {
				update::apply_operators(&mut seed, update)?;
			} else {
				update::merge_shallow(&mut seed, update);
			}
			// Defaults and validation run inside the insert
			let doc = self.insert(seed)?;
			return Ok(UpdateOutcome {
				matched: 0,
				modified: 0,
				upserted: true,
				upserted_ids: vec![doc.id.clone()],
				modified_documents: vec![doc],
				before_images: vec![],
			});
		}
		if !opts.multi {
			ids.truncate(1);
		}
		let guard = self.begin_undo();
		let mut outcome = UpdateOutcome::default();
		for id in ids {
			match self.apply_update_to_doc(&id, update, opts.merge) {
				Ok((before, after)) => {
					outcome.matched += 1;
					if before.fields != after.fields {
						outcome.modified += 1;
						outcome.before_images.push(before);
						outcome.modified_documents.push(after);
					}
				}
				Err(e) => {
					self.rollback_undo(guard);
					return Err(e);
				}
			}
		}
		self.commit_undo(guard);
		self.dirty = true;
		Ok(outcome)
	}

	/// Apply one update document to one stored document
	fn apply_update_to_doc(
		&mut self,
		id: &Id,
		update: &Value,
		merge: bool,
	) -> Result<(Document, Document), Error> {
		let before = self
			.list
			.get(id)
			.cloned()
			.ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
		let mut fields;
		if update::is_operator_update(update) {
			// Operators apply to a copy, then the copy replaces the
			// stored document, which also covers key removal via $unset
			fields = before.fields.clone();
			update::apply_operators(&mut fields, update)?;
		} else {
			let mut incoming = update.clone();
			if let Some(v) = val::cut(&mut incoming, "id") {
				if Id::from_value(&v).as_ref() != Some(id) {
					return Err(Error::InvalidUpdate("the document id is immutable".to_owned()));
				}
			}
			if merge {
				fields = before.fields.clone();
				update::merge_shallow(&mut fields, &incoming);
			} else {
				fields = incoming;
				self.schema.apply_defaults(&mut fields);
			}
		}
		let warnings = self.schema.validate(&mut fields, self.lenient)?;
		for warning in warnings {
			warn!("Validation warning on '{}': {warning}", self.name);
		}
		let after = Document::new(id.clone(), fields);
		// Re-key every index whose key changed
		for slot in self.indexes.values_mut() {
			let sparse = slot.btree.options().sparse;
			let old = index_key_of(&self.schema, &self.name, &before.fields, &slot.field, sparse)?;
			let new = index_key_of(&self.schema, &self.name, &after.fields, &slot.field, sparse)?;
			if old != new {
				if let Some(old) = old {
					slot.btree.remove(&old, Some(id));
				}
				if let Some(new) = new {
					slot.btree.insert(new, id.clone())?;
				}
			}
		}
		self.list.update(id, after.clone())?;
		Ok((before, after))
	}

	/// Remove every document matching a query
	pub fn remove(&mut self, query: &Value) -> Result<Vec<Document>, Error> {
		let ids = self.matching_ids(query)?;
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let guard = self.begin_undo();
		let mut removed = Vec::with_capacity(ids.len());
		for id in ids {
			match self.remove_doc(&id) {
				Ok(doc) => removed.push(doc),
				Err(e) => {
					self.rollback_undo(guard);
					return Err(e);
				}
			}
		}
		self.commit_undo(guard);
		self.dirty = true;
		Ok(removed)
	}

	fn remove_doc(&mut self, id: &Id) -> Result<Document, Error> {
		let doc = self
			.list
			.get(id)
			.cloned()
			.ok_or_else(|| Error::RecordNotFound(id.to_string()))?;
		for slot in self.indexes.values_mut() {
			let sparse = slot.btree.options().sparse;
			if let Some(key) =
				index_key_of(&self.schema, &self.name, &doc.fields, &slot.field, sparse)?
			{
				slot.btree.remove(&key, Some(id));
			}
		}
		self.list.remove_with_id(id);
		Ok(doc)
	}

	// ------------------------------------------------------------------
	// Reads
	// ------------------------------------------------------------------

	/// The ids of every document matching a query, in list order
	fn matching_ids(&self, query: &Value) -> Result<Vec<Id>, Error> {
		let (filter, _) = Filter::compile(query, &self.schema, self.strict_queries)?;
		let plan = plan::plan(query, |path| self.index_on(path));
		let ids = match plan.candidates {
			Some(candidates) => {
				if let Some(index) = &plan.index {
					trace!("Query on '{}' uses index '{index}'", self.name);
				}
				let wanted: HashSet<Id> = candidates.into_iter().collect();
				self.list
					.iter()
					.filter(|d| wanted.contains(&d.id) && filter.matches(d))
					.map(|d| d.id.clone())
					.collect()
			}
			None => self
				.list
				.iter()
				.filter(|d| filter.matches(d))
				.map(|d| d.id.clone())
				.collect(),
		};
		Ok(ids)
	}

	/// Find every document matching a query, in list order
	pub fn find(&self, query: &Value) -> Result<Vec<Document>, Error> {
		let ids = self.matching_ids(query)?;
		Ok(ids.iter().filter_map(|id| self.list.get(id)).cloned().collect())
	}

	/// The first document matching a query
	pub fn find_first(&self, query: &Value) -> Result<Option<Document>, Error> {
		let (filter, _) = Filter::compile(query, &self.schema, self.strict_queries)?;
		Ok(self.list.iter().find(|d| filter.matches(d)).cloned())
	}

	/// The last document matching a query
	pub fn find_last(&self, query: &Value) -> Result<Option<Document>, Error> {
		let (filter, _) = Filter::compile(query, &self.schema, self.strict_queries)?;
		Ok(self.list.iter_rev().find(|d| filter.matches(d)).cloned())
	}

	/// Fetch a document by primary key
	pub fn find_by_id(&self, id: &Id) -> Option<&Document> {
		self.list.get(id)
	}

	/// Index-driven exact lookup of every document with a field value
	pub fn find_by(&self, field: &str, value: &Value) -> Result<Vec<Document>, Error> {
		if let Some(index) = self.index_on(field) {
			let key = Key::from_value(value)
				.ok_or_else(|| Error::InvalidIndexKey(field.to_owned()))?;
			return Ok(index
				.search_ids(&key)
				.iter()
				.filter_map(|id| self.list.get(id))
				.cloned()
				.collect());
		}
		Ok(self
			.list
			.iter()
			.filter(|d| d.pick(field).map(|v| filter::values_equal(v, value)).unwrap_or(false))
			.cloned()
			.collect())
	}

	/// The first document with a field value, by index order
	pub fn find_first_by(&self, field: &str, value: &Value) -> Result<Option<Document>, Error> {
		if let Some(index) = self.index_on(field) {
			let key = Key::from_value(value)
				.ok_or_else(|| Error::InvalidIndexKey(field.to_owned()))?;
			return Ok(index.find(&key).and_then(|id| self.list.get(&id)).cloned());
		}
		Ok(self
			.list
			.iter()
			.find(|d| d.pick(field).map(|v| filter::values_equal(v, value)).unwrap_or(false))
			.cloned())
	}

	/// The last document with a field value, by index order
	pub fn find_last_by(&self, field: &str, value: &Value) -> Result<Option<Document>, Error> {
		if let Some(index) = self.index_on(field) {
			let key = Key::from_value(value)
				.ok_or_else(|| Error::InvalidIndexKey(field.to_owned()))?;
			return Ok(index.find_last(&key).and_then(|id| self.list.get(&id)).cloned());
		}
		Ok(self
			.list
			.iter_rev()
			.find(|d| d.pick(field).map(|v| filter::values_equal(v, value)).unwrap_or(false))
			.cloned())
	}

	/// The first document in insertion order
	pub fn first(&self) -> Option<&Document> {
		self.list.first()
	}

	/// The last document in insertion order
	pub fn last(&self) -> Option<&Document> {
		self.list.last()
	}

	/// The document with the smallest key on a field
	pub fn lowest(&self, field: &str) -> Option<&Document> {
		if let Some(index) = self.index_on(field) {
			return index.scan_all().next().and_then(|(_, id)| self.list.get(&id));
		}
		self.extreme_by_scan(field, false)
	}

	/// The document with the greatest key on a field
	pub fn greatest(&self, field: &str) -> Option<&Document> {
		if let Some(index) = self.index_on(field) {
			return index.scan_all_rev().next().and_then(|(_, id)| self.list.get(&id));
		}
		self.extreme_by_scan(field, true)
	}

	fn extreme_by_scan(&self, field: &str, greatest: bool) -> Option<&Document> {
		let mut best: Option<(Key, &Document)> = None;
		for doc in self.list.iter() {
			let Some(key) = doc.pick(field).and_then(Key::from_value) else {
				continue;
			};
			let replace = match &best {
				None => true,
				Some((k, _)) => {
					if greatest {
						key > *k
					} else {
						key < *k
					}
				}
			};
			if replace {
				best = Some((key, doc));
			}
		}
		best.map(|(_, d)| d)
	}

	/// Iterate every live document in insertion order
	pub fn iter(&self) -> impl Iterator<Item = &Document> {
		self.list.iter()
	}

	// ------------------------------------------------------------------
	// Index lifecycle
	// ------------------------------------------------------------------

	/// Create an index, rebuilding it from the live documents
	pub fn create_index(
		&mut self,
		name: &str,
		field: &str,
		options: IndexOptions,
	) -> Result<(), Error> {
		if self.indexes.contains_key(name) {
			return Err(Error::IndexExists(name.to_owned()));
		}
		let mut btree = BTreeIndex::new(name, options);
		for doc in self.list.iter() {
			if let Some(key) =
				index_key_of(&self.schema, &self.name, &doc.fields, field, options.sparse)?
			{
				btree.insert(key, doc.id.clone())?;
			}
		}
		debug!("Created index '{name}' on '{}' over '{field}'", self.name);
		self.indexes.insert(
			name.to_owned(),
			IndexSlot {
				field: field.to_owned(),
				btree,
			},
		);
		Ok(())
	}

	/// The declared indexes, in creation order
	pub fn list_indexes(&self) -> Vec<IndexDef> {
		self.indexes
			.iter()
			.map(|(name, slot)| IndexDef::new(name.clone(), slot.field.clone(), slot.btree.options()))
			.collect()
	}

	/// Drop an index
	pub fn drop_index(&mut self, name: &str) -> Result<(), Error> {
		self.indexes
			.shift_remove(name)
			.map(|_| debug!("Dropped index '{name}' on '{}'", self.name))
			.ok_or_else(|| Error::IndexNotFound(name.to_owned()))
	}

	// ------------------------------------------------------------------
	// Persistence
	// ------------------------------------------------------------------

	/// Load the stored documents through the adapter
	pub(crate) async fn load(&mut self) -> Result<(), Error> {
		self.adapter.init(&self.name).await?;
		if let Some(docs) = self.adapter.restore(&self.name).await? {
			debug!("Restored {} documents into '{}'", docs.len(), self.name);
			self.list.reset_from(docs);
			self.rebuild_indexes()?;
		}
		Ok(())
	}

	/// Persist the live documents through the adapter
	pub(crate) async fn persist(&mut self) -> Result<(), Error> {
		let docs = self.list.snapshot();
		self.adapter.store(&self.name, &docs).await?;
		self.dirty = false;
		Ok(())
	}

	// ------------------------------------------------------------------
	// Snapshots and savepoints
	// ------------------------------------------------------------------

	/// Deep-copy every document, in list order
	pub(crate) fn snapshot_documents(&self) -> Vec<Document> {
		self.list.snapshot()
	}

	/// Replace the documents without touching the indexes
	///
	/// Used by savepoint rollback, where the indexes restore themselves
	/// through their own paired handles.
	pub(crate) fn reset_documents(&mut self, docs: Vec<Document>) {
		self.list.reset_from(docs);
		self.dirty = true;
	}

	/// Replace the documents and rebuild every index from them
	pub(crate) fn restore(&mut self, docs: Vec<Document>) -> Result<(), Error> {
		self.list.reset_from(docs);
		self.rebuild_indexes()?;
		self.dirty = true;
		Ok(())
	}

	fn rebuild_indexes(&mut self) -> Result<(), Error> {
		for slot in self.indexes.values_mut() {
			let mut entries = Vec::with_capacity(self.list.len());
			for doc in self.list.iter() {
				if let Some(key) = index_key_of(
					&self.schema,
					&self.name,
					&doc.fields,
					&slot.field,
					slot.btree.options().sparse,
				)? {
					entries.push((key, doc.id.clone()));
				}
			}
			slot.btree.rebuild(entries)?;
		}
		Ok(())
	}

	/// Ask every index for a nested savepoint
	pub(crate) fn create_index_savepoints(&mut self) -> Vec<(String, SavepointHandle)> {
		self.indexes
			.iter_mut()
			.map(|(name, slot)| (name.clone(), slot.btree.create_savepoint()))
			.collect()
	}

	/// Roll every index back to its paired handle
	pub(crate) fn rollback_index_savepoints(
		&mut self,
		handles: &[(String, SavepointHandle)],
	) -> Result<(), Error> {
		for (name, handle) in handles {
			let slot = self
				.indexes
				.get_mut(name)
				.ok_or_else(|| Error::IndexNotFound(name.clone()))?;
			slot.btree.rollback_to_savepoint(*handle)?;
		}
		Ok(())
	}

	/// Release every paired index handle
	pub(crate) fn release_index_savepoints(
		&mut self,
		handles: &[(String, SavepointHandle)],
	) -> Result<(), Error> {
		for (name, handle) in handles {
			let slot = self
				.indexes
				.get_mut(name)
				.ok_or_else(|| Error::IndexNotFound(name.clone()))?;
			slot.btree.release_savepoint(*handle)?;
		}
		Ok(())
	}

	/// Discard every index savepoint when the transaction ends
	pub(crate) fn purge_index_savepoints(&mut self) {
		for slot in self.indexes.values_mut() {
			slot.btree.purge_savepoints();
		}
	}
}

/// Derive the index key of a payload for one indexed field
fn index_key_of(
	schema: &Schema,
	collection: &str,
	fields: &Value,
	field: &str,
	sparse: bool,
) -> Result<Option<Key>, Error> {
	match val::pick(fields, field) {
		None => {
			if sparse {
				Ok(None)
			} else {
				Ok(Some(Key::Null))
			}
		}
		Some(v) => {
			if let Some(spec) = schema.get(field) {
				if spec.kind == FieldKind::DateTime {
					if let Some(s) = v.as_str() {
						if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
							return Ok(Some(Key::datetime(dt.with_timezone(&Utc))));
						}
					}
				}
			}
			Key::from_value(v)
				.map(Some)
				.ok_or_else(|| Error::InvalidIndexKey(format!("{field} on {collection}")))
		}
	}
}
