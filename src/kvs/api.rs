use crate::doc::Document;
use crate::err::Error;
use crate::kvs::file::FileAdapter;
use crate::kvs::mem::MemAdapter;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The kind of storage backing a collection
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum AdapterKind {
	#[default]
	Memory,
	File,
}

/// A storage adapter for a single collection's payloads
///
/// Adapters are dispatched over a closed set of backends, so calls stay
/// statically typed while the datastore decides the backend at runtime.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Adapter {
	Mem(MemAdapter),
	File(FileAdapter),
}

impl Adapter {
	/// Create an in-memory adapter
	pub fn memory() -> Self {
		Adapter::Mem(MemAdapter::new())
	}

	/// Create a file-backed adapter rooted at a database directory
	pub fn file(root: impl AsRef<Path>) -> Self {
		Adapter::File(FileAdapter::new(root))
	}

	/// The kind of this adapter
	pub fn kind(&self) -> AdapterKind {
		match self {
			Adapter::Mem(_) => AdapterKind::Memory,
			Adapter::File(_) => AdapterKind::File,
		}
	}

	/// Prepare storage for a collection
	pub async fn init(&self, collection: &str) -> Result<(), Error> {
		match self {
			Adapter::Mem(a) => a.init(collection).await,
			Adapter::File(a) => a.init(collection).await,
		}
	}

	/// Load the stored documents of a collection
	///
	/// Returns `None` when the backend holds nothing for this collection,
	/// which on first load is not an error.
	pub async fn restore(&self, collection: &str) -> Result<Option<Vec<Document>>, Error> {
		match self {
			Adapter::Mem(a) => a.restore(collection).await,
			Adapter::File(a) => a.restore(collection).await,
		}
	}

	/// Persist the full live document set of a collection
	pub async fn store(&self, collection: &str, docs: &[Document]) -> Result<(), Error> {
		match self {
			Adapter::Mem(a) => a.store(collection, docs).await,
			Adapter::File(a) => a.store(collection, docs).await,
		}
	}

	/// Remove all stored state for a collection
	pub async fn delete(&self, collection: &str) -> Result<(), Error> {
		match self {
			Adapter::Mem(a) => a.delete(collection).await,
			Adapter::File(a) => a.delete(collection).await,
		}
	}
}
