use crate::cnf::MEMORY_PATH;
use crate::dbs::collection::{Collection, UpdateOutcome};
use crate::dbs::options::{CollectionConfig, TransactionOptions, UpdateOptions};
use crate::dbs::savepoint::{SavepointId, SavepointInfo};
use crate::dbs::session::Session;
use crate::dbs::tx::{ChangeBroadcast, ChangeRecord, Transaction, TxStatus};
use crate::doc::{Document, Id};
use crate::err::Error;
use crate::iam::audit::{AuditCategory, AuditEvent, AuditLogger, AuditOutcome};
use crate::idx::{IndexDef, IndexOptions};
use crate::kvs::{Adapter, AdapterKind};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// The underlying datastore instance which stores the collections
///
/// The facade owns the collection registry, enforces the single-writer
/// transaction invariant, coordinates savepoints across collections and
/// their indexes, and persists the schema manifest.
#[non_exhaustive]
pub struct Datastore {
	/// The storage root, or `:memory:`
	path: String,
	/// The database name, used for the manifest file
	db: String,
	/// Whether queries run in strict mode by default
	strict: bool,
	/// The registered collections, in definition order
	collections: IndexMap<String, Collection>,
	/// The serialized configuration of every collection
	configs: IndexMap<String, CollectionConfig>,
	/// The current transaction, if one is active
	txn: Option<Transaction>,
	/// The registered commit listeners
	broadcast: ChangeBroadcast,
	/// The open sessions
	sessions: Vec<Session>,
	/// An optional audit sink for lifecycle events
	audit: Option<Arc<AuditLogger>>,
}

impl Datastore {
	/// Open a datastore at a path
	///
	/// Pass `:memory:` for a volatile instance, or a directory root for
	/// file-backed persistence. A file-backed datastore re-registers the
	/// collections recorded in its schema manifest.
	pub async fn new(path: &str) -> Result<Datastore, Error> {
		Self::new_with_database(path, "main").await
	}

	/// Open a named database at a path
	pub async fn new_with_database(path: &str, db: &str) -> Result<Datastore, Error> {
		if path.is_empty() {
			return Err(Error::InvalidStorePath(path.to_owned()));
		}
		let mut ds = Datastore {
			path: path.to_owned(),
			db: db.to_owned(),
			strict: false,
			collections: IndexMap::new(),
			configs: IndexMap::new(),
			txn: None,
			broadcast: ChangeBroadcast::default(),
			sessions: Vec::new(),
			audit: None,
		};
		if ds.is_memory() {
			debug!("Starting a volatile in-memory datastore");
		} else {
			debug!("Starting a file-backed datastore at '{path}'");
			ds.load_manifest().await?;
		}
		Ok(ds)
	}

	/// Enable strict query mode for every collection defined afterwards
	pub fn with_strict(mut self, strict: bool) -> Self {
		self.strict = strict;
		self
	}

	/// Attach an audit sink for lifecycle events
	pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
		self.audit = Some(audit);
		self
	}

	fn is_memory(&self) -> bool {
		self.path == MEMORY_PATH
	}

	fn root(&self) -> PathBuf {
		PathBuf::from(&self.path).join(&self.db)
	}

	fn manifest_path(&self) -> PathBuf {
		PathBuf::from(&self.path).join(format!("{}.json", self.db))
	}

	fn emit(&self, event: AuditEvent) {
		if let Some(audit) = &self.audit {
			audit.log(event);
		}
	}

	// ------------------------------------------------------------------
	// The schema manifest
	// ------------------------------------------------------------------

	/// Re-register every collection recorded in the manifest
	async fn load_manifest(&mut self) -> Result<(), Error> {
		let path = self.manifest_path();
		let bytes = match tokio::fs::read(&path).await {
			Ok(bytes) => bytes,
			// A datastore opened for the first time has no manifest yet
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
			Err(e) => return Err(e.into()),
		};
		let manifest: IndexMap<String, CollectionConfig> = serde_json::from_slice(&bytes)
			.map_err(|e| Error::InvalidManifest(e.to_string()))?;
		for (name, config) in manifest {
			if name != config.name {
				return Err(Error::InvalidManifest(format!(
					"collection '{name}' is declared under a mismatched key"
				)));
			}
			self.register_collection(config).await?;
		}
		Ok(())
	}

	/// Write the manifest summarising every collection's configuration
	async fn persist_manifest(&self) -> Result<(), Error> {
		if self.is_memory() {
			return Ok(());
		}
		tokio::fs::create_dir_all(&self.path).await?;
		let bytes = serde_json::to_vec_pretty(&self.configs)?;
		tokio::fs::write(self.manifest_path(), bytes).await?;
		Ok(())
	}

	// ------------------------------------------------------------------
	// Collection lifecycle
	// ------------------------------------------------------------------

	/// Define a new collection and persist the manifest
	#[instrument(level = "debug", target = "docbase::core::dbs", skip(self, config), fields(collection = %config.name))]
	pub async fn define_collection(&mut self, config: CollectionConfig) -> Result<(), Error> {
		self.register_collection(config).await?;
		self.persist_manifest().await?;
		Ok(())
	}

	async fn register_collection(&mut self, config: CollectionConfig) -> Result<(), Error> {
		if self.collections.contains_key(&config.name) {
			return Err(Error::CollectionExists(config.name.clone()));
		}
		// The datastore mode wins over the configured adapter kind
		let adapter = if self.is_memory() {
			Adapter::memory()
		} else {
			match config.adapter {
				AdapterKind::Memory => Adapter::memory(),
				AdapterKind::File => Adapter::file(self.root()),
			}
		};
		let mut collection = Collection::new(&config, adapter, self.strict);
		collection.load().await?;
		for index in &config.indexes {
			collection.create_index(&index.name, &index.field, index.options)?;
		}
		self.emit(
			AuditEvent::new(AuditCategory::Storage, "define_collection")
				.with_resource("collection", &config.name),
		);
		self.collections.insert(config.name.clone(), collection);
		self.configs.insert(config.name.clone(), config);
		Ok(())
	}

	/// Drop a collection, its indexes, and its stored payloads
	pub async fn drop_collection(&mut self, name: &str) -> Result<(), Error> {
		let collection = self
			.collections
			.shift_remove(name)
			.ok_or_else(|| Error::CollectionNotFound(name.to_owned()))?;
		self.configs.shift_remove(name);
		collection.adapter().delete(name).await?;
		self.persist_manifest().await?;
		self.emit(
			AuditEvent::new(AuditCategory::Storage, "drop_collection")
				.with_resource("collection", name),
		);
		debug!("Dropped collection '{name}'");
		Ok(())
	}

	/// The names of every registered collection
	pub fn list_collections(&self) -> Vec<String> {
		self.collections.keys().cloned().collect()
	}

	/// Fetch a collection for reading
	pub fn collection(&self, name: &str) -> Result<&Collection, Error> {
		self.collections.get(name).ok_or_else(|| Error::CollectionNotFound(name.to_owned()))
	}

	fn collection_mut(&mut self, name: &str) -> Result<&mut Collection, Error> {
		// An aborted transaction refuses all further work
		if let Some(txn) = &self.txn {
			if txn.status != TxStatus::Active {
				return Err(Error::TxAborted);
			}
		}
		self.collections.get_mut(name).ok_or_else(|| Error::CollectionNotFound(name.to_owned()))
	}

	// ------------------------------------------------------------------
	// Document operations
	// ------------------------------------------------------------------

	/// Insert a document into a collection
	pub async fn insert(&mut self, collection: &str, value: Value) -> Result<Document, Error> {
		let doc = self.collection_mut(collection)?.insert(value)?;
		let change = ChangeRecord::insert(collection, &doc);
		self.apply_change(collection, vec![change]).await?;
		Ok(doc)
	}

	/// Update every document matching a query
	pub async fn update(
		&mut self,
		collection: &str,
		query: &Value,
		update: &Value,
		merge: bool,
	) -> Result<Vec<Document>, Error> {
		let changes = self.collection_mut(collection)?.update(query, update, merge)?;
		let records = changes
			.iter()
			.map(|(before, after)| ChangeRecord::update(collection, before, after))
			.collect();
		self.apply_change(collection, records).await?;
		Ok(changes.into_iter().map(|(_, after)| after).collect())
	}

	/// Atomically update or insert documents
	pub async fn update_atomic(
		&mut self,
		collection: &str,
		filter: &Value,
		update: &Value,
		opts: UpdateOptions,
	) -> Result<UpdateOutcome, Error> {
		let outcome = self.collection_mut(collection)?.update_atomic(filter, update, opts)?;
		let mut records = Vec::new();
		if outcome.upserted {
			for doc in &outcome.modified_documents {
				records.push(ChangeRecord::insert(collection, doc));
			}
		} else {
			for (before, after) in outcome.before_images.iter().zip(&outcome.modified_documents) {
				records.push(ChangeRecord::update(collection, before, after));
			}
		}
		self.apply_change(collection, records).await?;
		Ok(outcome)
	}

	/// Remove every document matching a query
	pub async fn remove(&mut self, collection: &str, query: &Value) -> Result<Vec<Document>, Error> {
		let removed = self.collection_mut(collection)?.remove(query)?;
		let records = removed.iter().map(|doc| ChangeRecord::delete(collection, doc)).collect();
		self.apply_change(collection, records).await?;
		Ok(removed)
	}

	/// Record a mutation in the transaction, or write it through
	async fn apply_change(
		&mut self,
		collection: &str,
		records: Vec<ChangeRecord>,
	) -> Result<(), Error> {
		match &mut self.txn {
			Some(txn) => {
				for record in records {
					txn.record(record);
				}
				Ok(())
			}
			None => {
				// Outside a transaction every mutation commits immediately
				if let Some(coll) = self.collections.get_mut(collection) {
					coll.persist().await?;
				}
				self.broadcast.publish(records).await;
				Ok(())
			}
		}
	}

	// ------------------------------------------------------------------
	// Reads
	// ------------------------------------------------------------------

	/// Find every document matching a query
	pub fn find(&self, collection: &str, query: &Value) -> Result<Vec<Document>, Error> {
		self.collection(collection)?.find(query)
	}

	/// The first document matching a query
	pub fn find_first(&self, collection: &str, query: &Value) -> Result<Option<Document>, Error> {
		self.collection(collection)?.find_first(query)
	}

	/// The last document matching a query
	pub fn find_last(&self, collection: &str, query: &Value) -> Result<Option<Document>, Error> {
		self.collection(collection)?.find_last(query)
	}

	/// Fetch a document by primary key
	pub fn find_by_id(&self, collection: &str, id: &Id) -> Result<Option<Document>, Error> {
		Ok(self.collection(collection)?.find_by_id(id).cloned())
	}

	/// Index-driven exact lookup on a field
	pub fn find_by(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Document>, Error> {
		self.collection(collection)?.find_by(field, value)
	}

	/// The first document in insertion order
	pub fn first(&self, collection: &str) -> Result<Option<Document>, Error> {
		Ok(self.collection(collection)?.first().cloned())
	}

	/// The last document in insertion order
	pub fn last(&self, collection: &str) -> Result<Option<Document>, Error> {
		Ok(self.collection(collection)?.last().cloned())
	}

	/// The document holding the smallest key on a field
	pub fn lowest(&self, collection: &str, field: &str) -> Result<Option<Document>, Error> {
		Ok(self.collection(collection)?.lowest(field).cloned())
	}

	/// The document holding the greatest key on a field
	pub fn greatest(&self, collection: &str, field: &str) -> Result<Option<Document>, Error> {
		Ok(self.collection(collection)?.greatest(field).cloned())
	}

	// ------------------------------------------------------------------
	// Index lifecycle
	// ------------------------------------------------------------------

	/// Create an index on a collection and persist the manifest
	pub async fn create_index(
		&mut self,
		collection: &str,
		name: &str,
		field: &str,
		options: IndexOptions,
	) -> Result<(), Error> {
		self.collection_mut(collection)?.create_index(name, field, options)?;
		if let Some(config) = self.configs.get_mut(collection) {
			config.indexes.push(IndexDef::new(name, field, options));
		}
		self.persist_manifest().await?;
		Ok(())
	}

	/// Drop an index from a collection and persist the manifest
	pub async fn drop_index(&mut self, collection: &str, name: &str) -> Result<(), Error> {
		self.collection_mut(collection)?.drop_index(name)?;
		if let Some(config) = self.configs.get_mut(collection) {
			config.indexes.retain(|ix| ix.name != name);
		}
		self.persist_manifest().await?;
		Ok(())
	}

	/// The declared indexes of a collection
	pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexDef>, Error> {
		Ok(self.collection(collection)?.list_indexes())
	}

	// ------------------------------------------------------------------
	// Transactions
	// ------------------------------------------------------------------

	/// Begin an interactive transaction
	///
	/// Exactly one transaction may be active per datastore; a nested
	/// begin fails rather than queueing.
	pub fn start_transaction(&mut self, opts: TransactionOptions) -> Result<Uuid, Error> {
		if self.txn.is_some() {
			return Err(Error::TransactionAlreadyActive);
		}
		// Capture the before-image of every collection
		let snapshots: HashMap<String, Vec<Document>> = self
			.collections
			.iter()
			.map(|(name, coll)| (name.clone(), coll.snapshot_documents()))
			.collect();
		let txn = Transaction::new(opts, snapshots);
		let id = txn.id;
		debug!("Started transaction {id}");
		self.emit(AuditEvent::new(AuditCategory::Transaction, "begin").with_resource_id(id));
		self.txn = Some(txn);
		Ok(id)
	}

	/// The id of the current transaction, if one is active
	pub fn current_transaction(&self) -> Option<Uuid> {
		self.txn.as_ref().map(|t| t.id)
	}

	/// Commit the current transaction
	///
	/// Dirty collections persist first; a persistence failure aborts the
	/// transaction and propagates. The buffered change log then goes out
	/// to every listener, whose failures are logged and ignored.
	pub async fn commit_transaction(&mut self) -> Result<(), Error> {
		let id = {
			let txn = self.txn.as_ref().ok_or(Error::NoActiveTransaction)?;
			if txn.status != TxStatus::Active {
				self.txn = None;
				return Err(Error::TxAborted);
			}
			txn.id
		};
		// Persist every dirty collection before releasing the snapshot
		let dirty: Vec<String> = self
			.collections
			.iter()
			.filter(|(_, c)| c.is_dirty())
			.map(|(n, _)| n.clone())
			.collect();
		for name in dirty {
			let result = match self.collections.get_mut(&name) {
				Some(coll) => coll.persist().await,
				None => Ok(()),
			};
			if let Err(e) = result {
				error!("Persistence failed during commit of {id}: {e}");
				self.abort_transaction().await?;
				return Err(e);
			}
		}
		// The snapshot and savepoint state is released with the value
		let mut txn = match self.txn.take() {
			Some(txn) => txn,
			None => return Err(Error::NoActiveTransaction),
		};
		txn.status = TxStatus::Committed;
		for coll in self.collections.values_mut() {
			coll.purge_index_savepoints();
		}
		let changes = std::mem::take(&mut txn.changes);
		debug!("Committed transaction {id} with {} changes", changes.len());
		self.emit(AuditEvent::new(AuditCategory::Transaction, "commit").with_resource_id(id));
		self.broadcast.publish(changes).await;
		Ok(())
	}

	/// Abort the current transaction
	///
	/// Every collection resets to its before-image and the buffered
	/// change log is discarded.
	pub async fn abort_transaction(&mut self) -> Result<(), Error> {
		let mut txn = self.txn.take().ok_or(Error::NoActiveTransaction)?;
		txn.status = TxStatus::Aborted;
		for (name, docs) in std::mem::take(&mut txn.snapshots) {
			if let Some(coll) = self.collections.get_mut(&name) {
				coll.restore(docs)?;
				coll.purge_index_savepoints();
			}
		}
		debug!("Aborted transaction {}", txn.id);
		self.emit(AuditEvent::new(AuditCategory::Transaction, "abort").with_resource_id(txn.id));
		Ok(())
	}

	/// Drop the current transaction without restoring anything
	///
	/// This discards uncommitted state, so it demands an explicit
	/// confirmation flag rather than failing silently later.
	pub fn force_reset_transaction_state(&mut self, confirm_data_loss: bool) -> Result<(), Error> {
		if !confirm_data_loss {
			return Err(Error::TxResetWithoutConfirmation);
		}
		if let Some(txn) = self.txn.take() {
			warn!("Force-dropping transaction {} with {} buffered changes", txn.id, txn.changes.len());
			for coll in self.collections.values_mut() {
				coll.purge_index_savepoints();
			}
			self.emit(
				AuditEvent::new(AuditCategory::Transaction, "force_reset")
					.with_resource_id(txn.id)
					.with_outcome(AuditOutcome::Failure),
			);
		}
		Ok(())
	}

	/// Subscribe to committed change logs
	pub fn subscribe_changes(&mut self) -> async_channel::Receiver<Vec<ChangeRecord>> {
		self.broadcast.subscribe()
	}

	// ------------------------------------------------------------------
	// Savepoints
	// ------------------------------------------------------------------

	/// Create a named savepoint within the current transaction
	pub fn create_savepoint(&mut self, name: &str) -> Result<SavepointId, Error> {
		let txn = self.txn.as_mut().ok_or(Error::NoActiveTransaction)?;
		if txn.status != TxStatus::Active {
			return Err(Error::TxAborted);
		}
		// Check the name before snapshotting anything
		if txn.savepoints.id_of(name).is_some() {
			return Err(Error::DuplicateSavepointName(name.to_owned()));
		}
		let mut documents = HashMap::new();
		let mut index_handles = HashMap::new();
		for (coll_name, coll) in self.collections.iter_mut() {
			documents.insert(coll_name.clone(), coll.snapshot_documents());
			index_handles.insert(coll_name.clone(), coll.create_index_savepoints());
		}
		let id = txn.savepoints.create(name, documents, index_handles)?;
		debug!("Created savepoint '{name}' ({id})");
		Ok(id)
	}

	/// Resolve a savepoint id from its name
	pub fn savepoint_id(&self, name: &str) -> Result<SavepointId, Error> {
		let txn = self.txn.as_ref().ok_or(Error::NoActiveTransaction)?;
		txn.savepoints.id_of(name).ok_or_else(|| Error::SavepointNotFound(name.to_owned()))
	}

	/// Roll the transaction back to a savepoint
	///
	/// Every index rolls back to its paired handle, every collection
	/// resets to the snapshotted documents, and savepoints created after
	/// the target are discarded. The target itself stays on the stack.
	pub fn rollback_to_savepoint(&mut self, id: SavepointId) -> Result<(), Error> {
		let txn = self.txn.as_mut().ok_or(Error::NoActiveTransaction)?;
		if txn.status != TxStatus::Active {
			return Err(Error::TxAborted);
		}
		let pos = txn.savepoints.position(id)?;
		// A failure past this point leaves the transaction unusable
		let result = (|| -> Result<(), Error> {
			let entry = txn.savepoints.get(pos);
			for (coll_name, handles) in &entry.index_handles {
				let coll = self
					.collections
					.get_mut(coll_name)
					.ok_or_else(|| Error::CollectionNotFound(coll_name.clone()))?;
				coll.rollback_index_savepoints(handles)?;
			}
			for (coll_name, docs) in &entry.documents {
				let coll = self
					.collections
					.get_mut(coll_name)
					.ok_or_else(|| Error::CollectionNotFound(coll_name.clone()))?;
				coll.reset_documents(docs.clone());
			}
			Ok(())
		})();
		match result {
			Ok(()) => {
				// Later entries were already unwound inside each index
				txn.savepoints.truncate_above(pos);
				debug!("Rolled back to savepoint {id}");
				Ok(())
			}
			Err(e) => {
				error!("Savepoint rollback failed, aborting the transaction: {e}");
				txn.status = TxStatus::Aborted;
				Err(e)
			}
		}
	}

	/// Release a savepoint without touching documents or other savepoints
	pub fn release_savepoint(&mut self, id: SavepointId) -> Result<(), Error> {
		let txn = self.txn.as_mut().ok_or(Error::NoActiveTransaction)?;
		if txn.status != TxStatus::Active {
			return Err(Error::TxAborted);
		}
		let pos = txn.savepoints.position(id)?;
		// Release the paired handles first so a failure leaves the stack
		// unchanged
		{
			let entry = txn.savepoints.get(pos);
			for (coll_name, handles) in &entry.index_handles {
				let coll = self
					.collections
					.get_mut(coll_name)
					.ok_or_else(|| Error::CollectionNotFound(coll_name.clone()))?;
				coll.release_index_savepoints(handles)?;
			}
		}
		let entry = txn.savepoints.remove(pos);
		debug!("Released savepoint '{}' ({id})", entry.name);
		Ok(())
	}

	/// The savepoint names of the current transaction, in creation order
	pub fn list_savepoints(&self) -> Result<Vec<String>, Error> {
		let txn = self.txn.as_ref().ok_or(Error::NoActiveTransaction)?;
		Ok(txn.savepoints.names())
	}

	/// Describe one savepoint of the current transaction
	pub fn savepoint_info(&self, id: SavepointId) -> Result<SavepointInfo, Error> {
		let txn = self.txn.as_ref().ok_or(Error::NoActiveTransaction)?;
		txn.savepoints.info(id, txn.id)
	}

	// ------------------------------------------------------------------
	// Sessions
	// ------------------------------------------------------------------

	/// Start a scoped usage session
	pub fn start_session(&mut self) -> Session {
		let session = Session::new();
		self.sessions.push(session.clone());
		session
	}

	/// End a session, aborting any transaction left open
	pub async fn end_session(&mut self, session: &Session) -> Result<(), Error> {
		self.sessions.retain(|s| s.id != session.id);
		if self.txn.is_some() {
			warn!("Session {} ended with an open transaction, aborting it", session.id);
			self.abort_transaction().await?;
		}
		Ok(())
	}

	/// Persist all dirty state and the manifest for cooperative shutdown
	pub async fn shutdown(&mut self) -> Result<(), Error> {
		if self.txn.is_some() {
			self.abort_transaction().await?;
		}
		let dirty: Vec<String> = self
			.collections
			.iter()
			.filter(|(_, c)| c.is_dirty())
			.map(|(n, _)| n.clone())
			.collect();
		for name in dirty {
			if let Some(coll) = self.collections.get_mut(&name) {
				coll.persist().await?;
			}
		}
		self.persist_manifest().await?;
		Ok(())
	}
}
