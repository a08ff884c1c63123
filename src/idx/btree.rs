//! An in-memory B+-tree mapping ordered keys to document ids.
//!
//! Entries are `(key, id)` pairs ordered by key first, id second, so equal
//! keys are deterministically tie-broken. Internal nodes hold separators
//! and children; leaves hold the entries. Deletion is lazy: nodes are not
//! rebalanced, which keeps removal cheap and savepoint snapshots simple.

use crate::cnf::BTREE_ORDER;
use crate::doc::Id;
use crate::err::Error;
use crate::idx::IndexOptions;
use crate::val::Key;
use std::cmp::Ordering;

/// A single index entry
#[derive(Clone, Debug, Eq, PartialEq)]
struct Entry {
	key: Key,
	id: Id,
}

impl Entry {
	fn new(key: Key, id: Id) -> Self {
		Self {
			key,
			id,
		}
	}
}

impl Ord for Entry {
	fn cmp(&self, other: &Self) -> Ordering {
		self.key.cmp(&other.key).then_with(|| self.id.cmp(&other.id))
	}
}

impl PartialOrd for Entry {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// The id half of a scan anchor
#[derive(Clone, Debug)]
enum IdBound {
	/// Before every id under the key
	Min,
	/// After every id under the key
	Max,
}

/// A positioning anchor used to start and stop scans
#[derive(Clone, Debug)]
struct Anchor {
	key: Key,
	id: IdBound,
}

impl Anchor {
	fn min(key: Key) -> Self {
		Self {
			key,
			id: IdBound::Min,
		}
	}

	fn max(key: Key) -> Self {
		Self {
			key,
			id: IdBound::Max,
		}
	}

	/// Compare an entry against this anchor
	fn cmp_entry(&self, e: &Entry) -> Ordering {
		match self.key.cmp(&e.key) {
			Ordering::Equal => match self.id {
				IdBound::Min => Ordering::Less,
				IdBound::Max => Ordering::Greater,
			},
			o => o,
		}
	}
}

#[derive(Clone, Debug)]
enum Node {
	Internal {
		keys: Vec<Entry>,
		children: Vec<usize>,
	},
	Leaf {
		entries: Vec<Entry>,
	},
}

#[derive(Clone, Debug)]
struct Tree {
	nodes: Vec<Node>,
	root: usize,
	len: usize,
	order: usize,
}

impl Tree {
	fn new() -> Self {
		let order = (*BTREE_ORDER).max(4);
		Self {
			nodes: vec![Node::Leaf {
				entries: Vec::new(),
			}],
			root: 0,
			len: 0,
			order,
		}
	}

	fn alloc(&mut self, node: Node) -> usize {
		self.nodes.push(node);
		self.nodes.len() - 1
	}

	/// Insert an entry, returning false when the exact pair already exists
	fn insert(&mut self, entry: Entry) -> bool {
		match self.insert_at(self.root, entry) {
			InsertOutcome::Duplicate => false,
			InsertOutcome::Done => {
				self.len += 1;
				true
			}
			InsertOutcome::Split(sep, right) => {
				// The root split, so grow the tree by one level
				let old_root = self.root;
				self.root = self.alloc(Node::Internal {
					keys: vec![sep],
					children: vec![old_root, right],
				});
				self.len += 1;
				true
			}
		}
	}

	fn insert_at(&mut self, node: usize, entry: Entry) -> InsertOutcome {
		// Work out where to descend before taking any long-lived borrow
		let descend = match &self.nodes[node] {
			Node::Leaf {
				..
			} => None,
			Node::Internal {
				keys,
				children,
			} => {
				let slot = keys.partition_point(|sep| sep <= &entry);
				Some((children[slot], slot))
			}
		};
		match descend {
			None => {
				// Insert into the leaf, splitting off the upper half when
				// the node overflows
				let split = {
					let order = self.order;
					let Node::Leaf {
						entries,
					} = &mut self.nodes[node]
					else {
						unreachable!("node kind changed during insert");
					};
					let pos = entries.partition_point(|e| e < &entry);
					if entries.get(pos) == Some(&entry) {
						return InsertOutcome::Duplicate;
					}
					entries.insert(pos, entry);
					if entries.len() > order {
						let mid = entries.len() / 2;
						Some(entries.split_off(mid))
					} else {
						None
					}
				};
				match split {
					Some(right) => {
						let sep = right[0].clone();
						let right = self.alloc(Node::Leaf {
							entries: right,
						});
						InsertOutcome::Split(sep, right)
					}
					None => InsertOutcome::Done,
				}
			}
			Some((child, slot)) => match self.insert_at(child, entry) {
				InsertOutcome::Split(sep, right) => {
					// Graft the split child, promoting the middle
					// separator when this node overflows in turn
					let split = {
						let order = self.order;
						let Node::Internal {
							keys,
							children,
						} = &mut self.nodes[node]
						else {
							unreachable!("node kind changed during insert");
						};
						keys.insert(slot, sep);
						children.insert(slot + 1, right);
						if children.len() > order {
							let mid = keys.len() / 2;
							let sep_up = keys[mid].clone();
							let right_keys = keys.split_off(mid + 1);
							keys.pop();
							let right_children = children.split_off(mid + 1);
							Some((sep_up, right_keys, right_children))
						} else {
							None
						}
					};
					match split {
						Some((sep_up, right_keys, right_children)) => {
							let right = self.alloc(Node::Internal {
								keys: right_keys,
								children: right_children,
							});
							InsertOutcome::Split(sep_up, right)
						}
						None => InsertOutcome::Done,
					}
				}
				other => other,
			},
		}
	}

	/// Remove an exact entry, returning whether it was present
	fn remove(&mut self, entry: &Entry) -> bool {
		let mut node = self.root;
		loop {
			match &mut self.nodes[node] {
				Node::Internal {
					keys,
					children,
				} => {
					let slot = keys.partition_point(|sep| sep <= entry);
					node = children[slot];
				}
				Node::Leaf {
					entries,
				} => {
					let pos = entries.partition_point(|e| e < entry);
					if entries.get(pos) == Some(entry) {
						entries.remove(pos);
						self.len -= 1;
						return true;
					}
					return false;
				}
			}
		}
	}
}

enum InsertOutcome {
	Done,
	Duplicate,
	Split(Entry, usize),
}

/// The direction of a scan
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Direction {
	Forward,
	Backward,
}

/// A lazy ordered scan over index entries
pub struct Scan<'a> {
	tree: &'a Tree,
	// (node, position): for leaves the next entry offset, for internal
	// nodes the child currently being visited
	stack: Vec<(usize, usize)>,
	dir: Direction,
	stop: Option<Anchor>,
	done: bool,
}

impl<'a> Scan<'a> {
	fn new(tree: &'a Tree, dir: Direction, start: Option<Anchor>, stop: Option<Anchor>) -> Self {
		let mut scan = Self {
			tree,
			stack: Vec::new(),
			dir,
			stop,
			done: false,
		};
		scan.descend(tree.root, start.as_ref());
		scan
	}

	/// Position the stack at the first entry to emit below a node
	fn descend(&mut self, mut node: usize, anchor: Option<&Anchor>) {
		let tree = self.tree;
		loop {
			match &tree.nodes[node] {
				Node::Internal {
					keys,
					children,
				} => {
					let slot = match (anchor, self.dir) {
						(Some(a), _) => keys.partition_point(|sep| a.cmp_entry(sep) != Ordering::Less),
						(None, Direction::Forward) => 0,
						(None, Direction::Backward) => children.len() - 1,
					};
					self.stack.push((node, slot));
					node = children[slot];
				}
				Node::Leaf {
					entries,
				} => {
					let pos = match (anchor, self.dir) {
						(Some(a), _) => entries.partition_point(|e| a.cmp_entry(e) == Ordering::Greater),
						(None, Direction::Forward) => 0,
						(None, Direction::Backward) => entries.len(),
					};
					self.stack.push((node, pos));
					return;
				}
			}
		}
	}

	/// Pop back to the nearest ancestor with an unvisited child
	fn advance(&mut self) {
		let tree = self.tree;
		self.stack.pop();
		while let Some((node, slot)) = self.stack.last_mut() {
			let Node::Internal {
				children,
				..
			} = &tree.nodes[*node]
			else {
				unreachable!("leaf on the interior of the scan stack");
			};
			match self.dir {
				Direction::Forward => {
					if *slot + 1 < children.len() {
						*slot += 1;
						let child = children[*slot];
						self.descend(child, None);
						return;
					}
				}
				Direction::Backward => {
					if *slot > 0 {
						*slot -= 1;
						let child = children[*slot];
						self.descend(child, None);
						return;
					}
				}
			}
			self.stack.pop();
		}
		self.done = true;
	}
}

impl Iterator for Scan<'_> {
	type Item = (Key, Id);

	fn next(&mut self) -> Option<Self::Item> {
		let tree = self.tree;
		loop {
			if self.done {
				return None;
			}
			let Some((node, pos)) = self.stack.last_mut() else {
				self.done = true;
				return None;
			};
			let Node::Leaf {
				entries,
			} = &tree.nodes[*node]
			else {
				unreachable!("scan stack must end at a leaf");
			};
			let entry = match self.dir {
				Direction::Forward => {
					if *pos < entries.len() {
						let e = &entries[*pos];
						*pos += 1;
						Some(e)
					} else {
						None
					}
				}
				Direction::Backward => {
					if *pos > 0 {
						*pos -= 1;
						Some(&entries[*pos])
					} else {
						None
					}
				}
			};
			match entry {
				Some(e) => {
					if let Some(stop) = &self.stop {
						let past = match self.dir {
							Direction::Forward => stop.cmp_entry(e) == Ordering::Less,
							Direction::Backward => stop.cmp_entry(e) == Ordering::Greater,
						};
						if past {
							self.done = true;
							return None;
						}
					}
					return Some((e.key.clone(), e.id.clone()));
				}
				None => self.advance(),
			}
		}
	}
}

/// An opaque handle to an index savepoint
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SavepointHandle(u64);

/// An ordered secondary index over one document field
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct BTreeIndex {
	name: String,
	options: IndexOptions,
	tree: Tree,
	savepoints: Vec<(u64, Tree)>,
	next_savepoint: u64,
}

impl BTreeIndex {
	pub fn new(name: impl Into<String>, options: IndexOptions) -> Self {
		Self {
			name: name.into(),
			options,
			tree: Tree::new(),
			savepoints: Vec::new(),
			next_savepoint: 0,
		}
	}

	/// The index name
	pub fn name(&self) -> &str {
		&self.name
	}

	/// The index behaviour options
	pub fn options(&self) -> IndexOptions {
		self.options
	}

	/// The number of entries in the index
	pub fn len(&self) -> usize {
		self.tree.len
	}

	pub fn is_empty(&self) -> bool {
		self.tree.len == 0
	}

	/// Insert a key for a document id
	///
	/// Inserting the exact pair twice is a no-op. Inserting a second id
	/// under an existing key fails for unique indexes.
	pub fn insert(&mut self, key: Key, id: Id) -> Result<(), Error> {
		if self.options.unique {
			if let Some(existing) = self.find(&key) {
				if existing != id {
					return Err(Error::IndexKeyExists {
						index: self.name.clone(),
						key: key.to_string(),
					});
				}
				return Ok(());
			}
		}
		self.tree.insert(Entry::new(key, id));
		Ok(())
	}

	/// Remove a key for a document id, or every id under the key
	///
	/// Removing an absent pair is a no-op.
	pub fn remove(&mut self, key: &Key, id: Option<&Id>) {
		match id {
			Some(id) => {
				self.tree.remove(&Entry::new(key.clone(), id.clone()));
			}
			None => {
				let ids = self.search_ids(key);
				for id in ids {
					self.tree.remove(&Entry::new(key.clone(), id));
				}
			}
		}
	}

	/// The first document id stored under a key
	pub fn find(&self, key: &Key) -> Option<Id> {
		let (k, id) = self.range_gte(key.clone()).next()?;
		(&k == key).then_some(id)
	}

	/// The last document id stored under a key
	pub fn find_last(&self, key: &Key) -> Option<Id> {
		let (k, id) = self.range_lte(key.clone()).next()?;
		(&k == key).then_some(id)
	}

	/// Every document id stored under a key, in id order
	pub fn search_ids(&self, key: &Key) -> Vec<Id> {
		self.range_gte(key.clone())
			.take_while(|(k, _)| k == key)
			.map(|(_, id)| id)
			.collect()
	}

	/// Scan forwards from the first entry with a key at or above `lo`
	pub fn range_gte(&self, lo: Key) -> Scan<'_> {
		Scan::new(&self.tree, Direction::Forward, Some(Anchor::min(lo)), None)
	}

	/// Scan backwards from the last entry with a key at or below `hi`
	pub fn range_lte(&self, hi: Key) -> Scan<'_> {
		Scan::new(&self.tree, Direction::Backward, Some(Anchor::max(hi)), None)
	}

	/// Scan forwards across the inclusive key range `lo..=hi`
	pub fn range_between(&self, lo: Key, hi: Key) -> Scan<'_> {
		Scan::new(&self.tree, Direction::Forward, Some(Anchor::min(lo)), Some(Anchor::max(hi)))
	}

	/// Scan backwards across the inclusive key range `lo..=hi`
	pub fn range_between_rev(&self, lo: Key, hi: Key) -> Scan<'_> {
		Scan::new(&self.tree, Direction::Backward, Some(Anchor::max(hi)), Some(Anchor::min(lo)))
	}

	/// Scan the whole index in key order
	pub fn scan_all(&self) -> Scan<'_> {
		Scan::new(&self.tree, Direction::Forward, None, None)
	}

	/// Scan the whole index in reverse key order
	pub fn scan_all_rev(&self) -> Scan<'_> {
		Scan::new(&self.tree, Direction::Backward, None, None)
	}

	/// Remove every entry
	pub fn clear(&mut self) {
		self.tree = Tree::new();
	}

	/// Rebuild the index from scratch
	pub fn rebuild<I>(&mut self, entries: I) -> Result<(), Error>
	where
		I: IntoIterator<Item = (Key, Id)>,
	{
		self.clear();
		for (key, id) in entries {
			self.insert(key, id)?;
		}
		Ok(())
	}

	/// Snapshot the current index content
	///
	/// The returned handle is opaque and only meaningful to this index.
	pub fn create_savepoint(&mut self) -> SavepointHandle {
		let id = self.next_savepoint;
		self.next_savepoint += 1;
		self.savepoints.push((id, self.tree.clone()));
		trace!("Created savepoint {id} on index '{}'", self.name);
		SavepointHandle(id)
	}

	/// Restore the exact content which existed at savepoint creation
	///
	/// Savepoints created after the handle are discarded. The handle
	/// itself stays valid and can be rolled back to again.
	pub fn rollback_to_savepoint(&mut self, handle: SavepointHandle) -> Result<(), Error> {
		let pos = self
			.savepoints
			.iter()
			.position(|(id, _)| *id == handle.0)
			.ok_or_else(|| Error::SavepointNotFound(handle.0.to_string()))?;
		self.tree = self.savepoints[pos].1.clone();
		self.savepoints.truncate(pos + 1);
		trace!("Rolled back index '{}' to savepoint {}", self.name, handle.0);
		Ok(())
	}

	/// Discard every savepoint snapshot
	///
	/// Used when the enclosing transaction ends, at which point any
	/// outstanding handles are no longer reachable.
	pub fn purge_savepoints(&mut self) {
		self.savepoints.clear();
	}

	/// Discard a savepoint snapshot without touching the index content
	pub fn release_savepoint(&mut self, handle: SavepointHandle) -> Result<(), Error> {
		let pos = self
			.savepoints
			.iter()
			.position(|(id, _)| *id == handle.0)
			.ok_or_else(|| Error::SavepointNotFound(handle.0.to_string()))?;
		self.savepoints.remove(pos);
		Ok(())
	}
}
