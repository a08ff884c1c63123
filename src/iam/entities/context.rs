use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The contextual information accompanying a permission check
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Context {
	/// The region the request originates from
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub region: Option<String>,
	/// The owner of the addressed document, when known
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub owner_id: Option<String>,
	/// The principal's last activity instant, for staleness checks
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_activity: Option<DateTime<Utc>>,
	/// The local hour of day, overriding the evaluation clock
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub local_hour: Option<u32>,
	/// Whether the caller claims emergency access
	#[serde(default)]
	pub emergency: bool,
	/// Further open-ended context attributes
	#[serde(default)]
	pub attributes: Map<String, Value>,
}

impl Context {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_region(mut self, region: impl Into<String>) -> Self {
		self.region = Some(region.into());
		self
	}

	pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
		self.owner_id = Some(owner_id.into());
		self
	}

	pub fn with_last_activity(mut self, at: DateTime<Utc>) -> Self {
		self.last_activity = Some(at);
		self
	}

	pub fn with_local_hour(mut self, hour: u32) -> Self {
		self.local_hour = Some(hour);
		self
	}

	pub fn with_emergency(mut self) -> Self {
		self.emergency = true;
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}
}
