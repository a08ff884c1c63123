use crate::iam;
use thiserror::Error;

/// An error originating from the database core
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The database encountered unreachable logic
	#[error("The database encountered unreachable logic: {0}")]
	Unreachable(String),

	/// A document did not validate against the collection schema
	#[error("Found invalid document: field '{field}' {reason}")]
	SchemaViolation {
		field: String,
		reason: String,
	},

	/// A query referenced a field which is not declared in the schema
	#[error("Found unknown field '{0}' in a strict mode query")]
	UnknownQueryField(String),

	/// An update document was malformed or used an unsupported operator
	#[error("Found invalid update operation: {0}")]
	InvalidUpdate(String),

	/// A unique index already holds an entry for this key
	#[error("Database index '{index}' already contains the key '{key}'")]
	IndexKeyExists {
		index: String,
		key: String,
	},

	/// The primary store already holds a document with this id
	#[error("Database record '{0}' already exists")]
	RecordExists(String),

	/// The requested document does not exist
	#[error("The record '{0}' does not exist")]
	RecordNotFound(String),

	/// The requested collection does not exist
	#[error("The collection '{0}' does not exist")]
	CollectionNotFound(String),

	/// A collection with this name has already been defined
	#[error("The collection '{0}' already exists")]
	CollectionExists(String),

	/// The requested index does not exist on this collection
	#[error("The index '{0}' does not exist")]
	IndexNotFound(String),

	/// An index with this name has already been created
	#[error("The index '{0}' already exists")]
	IndexExists(String),

	/// There is no transaction in progress
	#[error("There is no transaction in progress")]
	NoActiveTransaction,

	/// A transaction is already in progress
	#[error("A transaction is already in progress")]
	TransactionAlreadyActive,

	/// The transaction was already committed or aborted
	#[error("Couldn't update a finished transaction")]
	TxFinished,

	/// The transaction was aborted by a failed savepoint rollback
	#[error("The transaction was aborted and can not be used further")]
	TxAborted,

	/// Resetting transaction state requires explicit confirmation
	#[error("Resetting the transaction state discards uncommitted data and requires confirmation")]
	TxResetWithoutConfirmation,

	/// A savepoint with this name already exists in the transaction
	#[error("The savepoint '{0}' already exists in this transaction")]
	DuplicateSavepointName(String),

	/// The requested savepoint does not exist
	#[error("The savepoint '{0}' does not exist")]
	SavepointNotFound(String),

	/// The transaction holds no savepoints
	#[error("There are no savepoints in this transaction")]
	NoSavepointsFound,

	/// The datastore was opened with an invalid path
	#[error("Unable to open a datastore at '{0}'")]
	InvalidStorePath(String),

	/// The schema manifest could not be parsed
	#[error("Unable to parse the schema manifest: {0}")]
	InvalidManifest(String),

	/// An authorization subsystem error
	#[error("Authorization error: {0}")]
	Iam(#[from] iam::Error),

	/// A key could not be derived from a document value
	#[error("Unable to derive an index key from the value: {0}")]
	InvalidIndexKey(String),

	/// An I/O error occurred while accessing storage
	#[error("There was a problem with the underlying storage: {0}")]
	Io(#[from] std::io::Error),

	/// A value could not be serialized or deserialized
	#[error("There was a problem with serialization: {0}")]
	Serde(#[from] serde_json::Error),
}

impl Error {
	/// Check whether this error leaves the collection state untouched
	pub fn is_clean_failure(&self) -> bool {
		matches!(
			self,
			Error::SchemaViolation {
				..
			} | Error::IndexKeyExists {
				..
			} | Error::RecordExists(_)
				| Error::RecordNotFound(_)
				| Error::UnknownQueryField(_)
				| Error::InvalidUpdate(_)
		)
	}
}
