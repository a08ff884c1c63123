use crate::doc::{Document, Id};
use crate::err::Error;
use std::collections::HashMap;

/// The primary document store of a collection
///
/// Documents are kept in insertion order. Lookups by id are constant time,
/// iteration is ordered, and removal preserves the order of the remaining
/// documents.
#[derive(Default, Debug, Clone)]
#[non_exhaustive]
pub struct DocumentList {
	order: Vec<Id>,
	items: HashMap<Id, Document>,
}

impl DocumentList {
	pub fn new() -> Self {
		Self::default()
	}

	/// The number of documents in the store
	pub fn len(&self) -> usize {
		self.order.len()
	}

	pub fn is_empty(&self) -> bool {
		self.order.is_empty()
	}

	/// Append a document
	pub fn push(&mut self, doc: Document) -> Result<(), Error> {
		if self.items.contains_key(&doc.id) {
			return Err(Error::RecordExists(doc.id.to_string()));
		}
		self.order.push(doc.id.clone());
		self.items.insert(doc.id.clone(), doc);
		Ok(())
	}

	/// Fetch a document by id
	pub fn get(&self, id: &Id) -> Option<&Document> {
		self.items.get(id)
	}

	/// Replace the document stored under an existing id
	pub fn update(&mut self, id: &Id, doc: Document) -> Result<(), Error> {
		match self.items.get_mut(id) {
			Some(slot) => {
				*slot = doc;
				Ok(())
			}
			None => Err(Error::RecordNotFound(id.to_string())),
		}
	}

	/// Remove and return a document by id
	pub fn remove_with_id(&mut self, id: &Id) -> Option<Document> {
		let doc = self.items.remove(id)?;
		self.order.retain(|x| x != id);
		Some(doc)
	}

	/// The first document in insertion order
	pub fn first(&self) -> Option<&Document> {
		self.order.first().and_then(|id| self.items.get(id))
	}

	/// The last document in insertion order
	pub fn last(&self) -> Option<&Document> {
		self.order.last().and_then(|id| self.items.get(id))
	}

	/// Iterate forwards in insertion order
	pub fn iter(&self) -> impl Iterator<Item = &Document> {
		self.order.iter().filter_map(|id| self.items.get(id))
	}

	/// Iterate backwards in insertion order
	pub fn iter_rev(&self) -> impl Iterator<Item = &Document> {
		self.order.iter().rev().filter_map(|id| self.items.get(id))
	}

	/// Remove every document
	pub fn clear(&mut self) {
		self.order.clear();
		self.items.clear();
	}

	/// Deep-copy every document in insertion order
	pub fn snapshot(&self) -> Vec<Document> {
		self.iter().cloned().collect()
	}

	/// Replace the full content from a snapshot, preserving its order
	pub fn reset_from(&mut self, docs: Vec<Document>) {
		self.clear();
		for doc in docs {
			self.order.push(doc.id.clone());
			self.items.insert(doc.id.clone(), doc);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn doc(id: i64) -> Document {
		Document::new(Id::from(id), json!({ "n": id }))
	}

	#[test]
	fn push_and_get() {
		let mut list = DocumentList::new();
		list.push(doc(1)).unwrap();
		list.push(doc(2)).unwrap();
		assert_eq!(list.len(), 2);
		assert_eq!(list.get(&Id::from(1)).unwrap().fields, json!({ "n": 1 }));
	}

	#[test]
	fn push_duplicate_id_fails() {
		let mut list = DocumentList::new();
		list.push(doc(1)).unwrap();
		let err = list.push(doc(1)).unwrap_err();
		assert!(matches!(err, Error::RecordExists(_)));
		assert_eq!(list.len(), 1);
	}

	#[test]
	fn update_missing_fails_fast() {
		let mut list = DocumentList::new();
		let err = list.update(&Id::from(9), doc(9)).unwrap_err();
		assert!(matches!(err, Error::RecordNotFound(_)));
	}

	#[test]
	fn iteration_is_insertion_ordered() {
		let mut list = DocumentList::new();
		for i in [3, 1, 2] {
			list.push(doc(i)).unwrap();
		}
		let ids: Vec<_> = list.iter().map(|d| d.id.clone()).collect();
		assert_eq!(ids, vec![Id::from(3), Id::from(1), Id::from(2)]);
		let rev: Vec<_> = list.iter_rev().map(|d| d.id.clone()).collect();
		assert_eq!(rev, vec![Id::from(2), Id::from(1), Id::from(3)]);
		assert_eq!(list.first().unwrap().id, Id::from(3));
		assert_eq!(list.last().unwrap().id, Id::from(2));
	}

	#[test]
	fn remove_preserves_order() {
		let mut list = DocumentList::new();
		for i in [1, 2, 3] {
			list.push(doc(i)).unwrap();
		}
		assert!(list.remove_with_id(&Id::from(2)).is_some());
		let ids: Vec<_> = list.iter().map(|d| d.id.clone()).collect();
		assert_eq!(ids, vec![Id::from(1), Id::from(3)]);
	}

	#[test]
	fn snapshot_roundtrip() {
		let mut list = DocumentList::new();
		for i in [1, 2] {
			list.push(doc(i)).unwrap();
		}
		let snap = list.snapshot();
		list.remove_with_id(&Id::from(1));
		list.push(doc(7)).unwrap();
		list.reset_from(snap);
		let ids: Vec<_> = list.iter().map(|d| d.id.clone()).collect();
		assert_eq!(ids, vec![Id::from(1), Id::from(2)]);
	}
}
