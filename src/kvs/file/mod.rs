use crate::doc::{Document, Id};
use crate::err::Error;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// The file-backed storage adapter
///
/// Documents live as individual JSON files under
/// `<root>/<collection>/<file>.json`, where `<root>` is the database
/// directory. A missing directory or file on restore means an empty
/// collection, never an error.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct FileAdapter {
	root: PathBuf,
}

/// Derive a stable, filesystem-safe file stem for a document id
///
/// Numeric ids are zero-padded so that file-name order matches numeric
/// order; string ids are hex-encoded. The id itself is stored inside the
/// document payload, so the stem never needs to be reversed.
fn file_stem(id: &Id) -> String {
	match id {
		Id::Number(n) => format!("n{:020}", (*n as i128) - (i64::MIN as i128)),
		Id::String(s) => {
			let mut stem = String::with_capacity(1 + s.len() * 2);
			stem.push('s');
			for b in s.as_bytes() {
				stem.push_str(&format!("{b:02x}"));
			}
			stem
		}
	}
}

impl FileAdapter {
	pub fn new(root: impl AsRef<Path>) -> Self {
		Self {
			root: root.as_ref().to_path_buf(),
		}
	}

	fn dir(&self, collection: &str) -> PathBuf {
		self.root.join(collection)
	}

	pub(super) async fn init(&self, collection: &str) -> Result<(), Error> {
		// Ensure the collection directory exists before any write
		tokio::fs::create_dir_all(self.dir(collection)).await?;
		Ok(())
	}

	#[instrument(level = "trace", target = "docbase::core::kvs", skip(self))]
	pub(super) async fn restore(&self, collection: &str) -> Result<Option<Vec<Document>>, Error> {
		let dir = self.dir(collection);
		// A collection which was never stored has nothing to restore
		let mut entries = match tokio::fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};
		let mut names = Vec::new();
		while let Some(entry) = entries.next_entry().await? {
			let path = entry.path();
			if path.extension().map(|e| e == "json").unwrap_or(false) {
				names.push(path);
			}
		}
		// Restore in file-name order so first and last are deterministic
		names.sort();
		let mut docs = Vec::with_capacity(names.len());
		for path in names {
			let bytes = tokio::fs::read(&path).await?;
			let doc: Document = serde_json::from_slice(&bytes)?;
			docs.push(doc);
		}
		Ok(Some(docs))
	}

	#[instrument(level = "trace", target = "docbase::core::kvs", skip(self, docs))]
	pub(super) async fn store(&self, collection: &str, docs: &[Document]) -> Result<(), Error> {
		let dir = self.dir(collection);
		tokio::fs::create_dir_all(&dir).await?;
		// Write the full live set
		let mut live = HashSet::with_capacity(docs.len());
		for doc in docs {
			let name = format!("{}.json", file_stem(&doc.id));
			let bytes = serde_json::to_vec_pretty(doc)?;
			tokio::fs::write(dir.join(&name), bytes).await?;
			live.insert(name);
		}
		// Sweep files for documents which no longer exist
		let mut entries = tokio::fs::read_dir(&dir).await?;
		while let Some(entry) = entries.next_entry().await? {
			let name = entry.file_name().to_string_lossy().into_owned();
			if name.ends_with(".json") && !live.contains(&name) {
				tokio::fs::remove_file(entry.path()).await?;
			}
		}
		Ok(())
	}

	pub(super) async fn delete(&self, collection: &str) -> Result<(), Error> {
		let dir = self.dir(collection);
		match tokio::fs::remove_dir_all(&dir).await {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}
