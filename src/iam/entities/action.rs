use serde::{Deserialize, Serialize};
use std::fmt;

/// An action a principal attempts on a resource
///
/// Actions are open-ended strings so callers can define their own; the
/// well-known ones are provided as constants.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[non_exhaustive]
pub struct Action(String);

impl Action {
	pub const READ: &'static str = "read";
	pub const WRITE: &'static str = "write";
	pub const DELETE: &'static str = "delete";
	pub const ADMIN: &'static str = "admin";
	pub const CONFIG: &'static str = "config";

	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Check whether this action is gated to business hours and owner
	/// level scrutiny by the attribute engine
	pub fn is_sensitive(&self) -> bool {
		matches!(self.0.as_str(), "delete" | "admin" | "config" | "system" | "bulk_write")
			|| self.0.starts_with("drop_")
			|| self.0.starts_with("manage_")
	}

	/// Check whether this action mutates state
	pub fn is_write(&self) -> bool {
		!matches!(self.0.as_str(), "read" | "list" | "view")
	}
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for Action {
	fn from(s: &str) -> Self {
		Self(s.to_owned())
	}
}

impl From<String> for Action {
	fn from(s: String) -> Self {
		Self(s)
	}
}
