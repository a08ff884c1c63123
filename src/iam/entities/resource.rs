use serde::{Deserialize, Serialize};
use std::fmt;

/// The resource a permission decision is about
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
#[non_exhaustive]
pub enum AuthResource {
	Database {
		name: String,
	},
	Collection {
		name: String,
	},
	Document {
		collection: String,
		id: String,
	},
	Field {
		collection: String,
		path: String,
	},
}

impl AuthResource {
	pub fn database(name: impl Into<String>) -> Self {
		AuthResource::Database {
			name: name.into(),
		}
	}

	pub fn collection(name: impl Into<String>) -> Self {
		AuthResource::Collection {
			name: name.into(),
		}
	}

	pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
		AuthResource::Document {
			collection: collection.into(),
			id: id.into(),
		}
	}

	pub fn field(collection: impl Into<String>, path: impl Into<String>) -> Self {
		AuthResource::Field {
			collection: collection.into(),
			path: path.into(),
		}
	}

	/// The collection this resource belongs to, if any
	pub fn collection_name(&self) -> Option<&str> {
		match self {
			AuthResource::Database {
				..
			} => None,
			AuthResource::Collection {
				name,
			} => Some(name),
			AuthResource::Document {
				collection,
				..
			} => Some(collection),
			AuthResource::Field {
				collection,
				..
			} => Some(collection),
		}
	}

	/// The strings a scoped wildcard pattern may match against
	///
	/// A document or field resource is also addressable through its
	/// collection scope, so `collection:users:*` covers both the
	/// collection and everything inside it.
	pub fn scope_strings(&self) -> Vec<String> {
		match self {
			AuthResource::Database {
				name,
			} => vec![format!("database:{name}")],
			AuthResource::Collection {
				name,
			} => vec![format!("collection:{name}")],
			AuthResource::Document {
				collection,
				id,
			} => vec![
				format!("document:{collection}:{id}"),
				format!("collection:{collection}:{id}"),
			],
			AuthResource::Field {
				collection,
				path,
			} => vec![
				format!("field:{collection}:{path}"),
				format!("collection:{collection}:{path}"),
			],
		}
	}

	/// Check this resource against a permission resource pattern
	///
	/// Patterns are exact resource strings, the global wildcards `*` and
	/// `all`, or scoped wildcards such as `database:x:*` and
	/// `collection:y:*`.
	pub fn matches_pattern(&self, pattern: &str) -> bool {
		if pattern == "*" || pattern == "all" {
			return true;
		}
		if let Some(prefix) = pattern.strip_suffix(":*") {
			return self.scope_strings().iter().any(|s| {
				s == prefix || s.strip_prefix(prefix).map(|r| r.starts_with(':')).unwrap_or(false)
			});
		}
		self.to_string() == pattern
	}
}

impl fmt::Display for AuthResource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AuthResource::Database {
				name,
			} => write!(f, "database:{name}"),
			AuthResource::Collection {
				name,
			} => write!(f, "collection:{name}"),
			AuthResource::Document {
				collection,
				id,
			} => write!(f, "document:{collection}:{id}"),
			AuthResource::Field {
				collection,
				path,
			} => write!(f, "field:{collection}:{path}"),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_resource_strings() {
		assert_eq!(AuthResource::database("main").to_string(), "database:main");
		assert_eq!(AuthResource::collection("posts").to_string(), "collection:posts");
		assert_eq!(AuthResource::document("posts", "1").to_string(), "document:posts:1");
		assert_eq!(AuthResource::field("posts", "title").to_string(), "field:posts:title");
	}

	#[test]
	fn global_wildcards_match_everything() {
		let res = AuthResource::document("posts", "1");
		assert!(res.matches_pattern("*"));
		assert!(res.matches_pattern("all"));
	}

	#[test]
	fn scoped_wildcards_cover_contents() {
		let doc = AuthResource::document("posts", "1");
		assert!(doc.matches_pattern("collection:posts:*"));
		assert!(!doc.matches_pattern("collection:users:*"));
		let coll = AuthResource::collection("posts");
		assert!(coll.matches_pattern("collection:posts:*"));
		let db = AuthResource::database("main");
		assert!(db.matches_pattern("database:main:*"));
		assert!(!db.matches_pattern("database:other:*"));
	}

	#[test]
	fn exact_patterns_match_exactly() {
		let res = AuthResource::collection("posts");
		assert!(res.matches_pattern("collection:posts"));
		assert!(!res.matches_pattern("collection:posts2"));
	}
}
