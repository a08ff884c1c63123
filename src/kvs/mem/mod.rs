use crate::doc::Document;
use crate::err::Error;

/// The in-memory storage adapter
///
/// Holds no state of its own: the collection's document list is the only
/// copy, and persistence calls are accepted and discarded.
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct MemAdapter;

impl MemAdapter {
	pub fn new() -> Self {
		Self
	}

	pub(super) async fn init(&self, _collection: &str) -> Result<(), Error> {
		Ok(())
	}

	pub(super) async fn restore(&self, _collection: &str) -> Result<Option<Vec<Document>>, Error> {
		Ok(None)
	}

	pub(super) async fn store(&self, collection: &str, docs: &[Document]) -> Result<(), Error> {
		trace!("Discarding store of {} documents for '{collection}'", docs.len());
		Ok(())
	}

	pub(super) async fn delete(&self, _collection: &str) -> Result<(), Error> {
		Ok(())
	}
}
