use crate::dbs::options::{IsolationLevel, TransactionOptions};
use crate::dbs::savepoint::SavepointStack;
use crate::doc::{Document, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// The lifecycle state of a transaction
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum TxStatus {
	Active,
	Committed,
	Aborted,
}

/// The kind of a recorded mutation
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ChangeOperation {
	Insert,
	Update,
	Delete,
}

/// A single buffered mutation, broadcast to listeners on commit
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ChangeRecord {
	/// The collection the mutation applied to
	pub collection: String,
	/// The kind of mutation
	pub operation: ChangeOperation,
	/// The primary key of the mutated document
	pub id: Id,
	/// The document before the mutation, absent for inserts
	#[serde(skip_serializing_if = "Option::is_none")]
	pub before: Option<Value>,
	/// The document after the mutation, absent for deletes
	#[serde(skip_serializing_if = "Option::is_none")]
	pub after: Option<Value>,
	/// When the mutation was applied
	pub timestamp: DateTime<Utc>,
}

impl ChangeRecord {
	pub fn insert(collection: &str, doc: &Document) -> Self {
		Self {
			collection: collection.to_owned(),
			operation: ChangeOperation::Insert,
			id: doc.id.clone(),
			before: None,
			after: Some(doc.fields.clone()),
			timestamp: Utc::now(),
		}
	}

	pub fn update(collection: &str, before: &Document, after: &Document) -> Self {
		Self {
			collection: collection.to_owned(),
			operation: ChangeOperation::Update,
			id: after.id.clone(),
			before: Some(before.fields.clone()),
			after: Some(after.fields.clone()),
			timestamp: Utc::now(),
		}
	}

	pub fn delete(collection: &str, doc: &Document) -> Self {
		Self {
			collection: collection.to_owned(),
			operation: ChangeOperation::Delete,
			id: doc.id.clone(),
			before: Some(doc.fields.clone()),
			after: None,
			timestamp: Utc::now(),
		}
	}
}

/// An interactive transaction
///
/// The facade admits at most one active transaction at a time, so the
/// transaction owns its before-image snapshots, its buffered change log,
/// and its savepoint stack without further synchronisation.
#[derive(Debug)]
#[non_exhaustive]
pub struct Transaction {
	/// The unique id of this transaction
	pub id: Uuid,
	/// The requested isolation level
	pub isolation: IsolationLevel,
	/// An optional label carried into audit events
	pub label: Option<String>,
	/// When the transaction began
	pub started: DateTime<Utc>,
	/// The lifecycle state
	pub status: TxStatus,
	/// The before-image of every collection at begin, keyed by name
	pub(crate) snapshots: HashMap<String, Vec<Document>>,
	/// The buffered change records, in order of application
	pub(crate) changes: Vec<ChangeRecord>,
	/// The named savepoint stack
	pub(crate) savepoints: SavepointStack,
}

impl Transaction {
	pub(crate) fn new(opts: TransactionOptions, snapshots: HashMap<String, Vec<Document>>) -> Self {
		Self {
			id: Uuid::new_v4(),
			isolation: opts.isolation,
			label: opts.label,
			started: Utc::now(),
			status: TxStatus::Active,
			snapshots,
			changes: Vec::new(),
			savepoints: SavepointStack::default(),
		}
	}

	/// Append a change record in order of application
	pub(crate) fn record(&mut self, change: ChangeRecord) {
		self.changes.push(change);
	}

	/// The buffered change records
	pub fn changes(&self) -> &[ChangeRecord] {
		&self.changes
	}
}

/// The registry of commit listeners
///
/// Delivery is fire-and-forget: a closed receiver is pruned, and a send
/// failure can not abort the commit.
#[derive(Debug, Default)]
pub(crate) struct ChangeBroadcast {
	senders: Vec<async_channel::Sender<Vec<ChangeRecord>>>,
}

impl ChangeBroadcast {
	/// Register a new listener
	pub(crate) fn subscribe(&mut self) -> async_channel::Receiver<Vec<ChangeRecord>> {
		let (tx, rx) = async_channel::unbounded();
		self.senders.push(tx);
		rx
	}

	/// Deliver a committed change log to every listener
	pub(crate) async fn publish(&mut self, changes: Vec<ChangeRecord>) {
		if self.senders.is_empty() || changes.is_empty() {
			return;
		}
		let mut closed = Vec::new();
		for (i, sender) in self.senders.iter().enumerate() {
			if let Err(e) = sender.send(changes.clone()).await {
				warn!("Dropping a closed change listener: {e}");
				closed.push(i);
			}
		}
		for i in closed.into_iter().rev() {
			self.senders.remove(i);
		}
	}
}
