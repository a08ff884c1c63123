use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An authorization principal
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct User {
	/// The unique id of this user
	pub id: String,
	/// The display name
	pub username: String,
	/// The roles granted to this user, in grant order
	pub roles: Vec<String>,
	/// Open-ended attributes consulted by the attribute engine
	#[serde(default)]
	pub attributes: Map<String, Value>,
	/// Whether the account is active
	#[serde(default = "default_true")]
	pub active: bool,
	/// Whether the account is locked out
	#[serde(default)]
	pub locked: bool,
	/// Consecutive failed login attempts
	#[serde(default)]
	pub failed_logins: u32,
}

fn default_true() -> bool {
	true
}

impl User {
	pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			username: username.into(),
			roles: Vec::new(),
			attributes: Map::new(),
			active: true,
			locked: false,
			failed_logins: 0,
		}
	}

	pub fn with_role(mut self, role: impl Into<String>) -> Self {
		self.roles.push(role.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	/// Fetch a string attribute
	pub fn attribute_str(&self, key: &str) -> Option<&str> {
		self.attributes.get(key).and_then(|v| v.as_str())
	}

	/// Fetch a string-array attribute
	pub fn attribute_list(&self, key: &str) -> Option<Vec<&str>> {
		self.attributes
			.get(key)
			.and_then(|v| v.as_array())
			.map(|a| a.iter().filter_map(|v| v.as_str()).collect())
	}

	/// Check whether any granted role name contains a marker
	pub fn has_role_containing(&self, marker: &str) -> bool {
		self.roles.iter().any(|r| r.to_ascii_lowercase().contains(marker))
	}
}
