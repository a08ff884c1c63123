use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// The outcome of a permission decision
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Decision {
	/// Whether the action is allowed
	pub allowed: bool,
	/// A human readable reason for the outcome
	pub reason: String,
	/// Breadcrumbs from every rule that participated, in order
	pub applied_rules: Vec<String>,
	/// Whether this decision was served from the cache
	pub cache_hit: bool,
	/// How long the evaluation took
	#[serde(with = "duration_micros")]
	pub evaluation_time: Duration,
	/// Engine-specific metadata, such as the denying engine
	pub metadata: Map<String, Value>,
}

mod duration_micros {
	use serde::Serializer;
	use std::time::Duration;

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_u128(d.as_micros())
	}
}

impl Decision {
	pub fn allow(reason: impl Into<String>) -> Self {
		Self {
			allowed: true,
			reason: reason.into(),
			applied_rules: Vec::new(),
			cache_hit: false,
			evaluation_time: Duration::ZERO,
			metadata: Map::new(),
		}
	}

	pub fn deny(reason: impl Into<String>) -> Self {
		Self {
			allowed: false,
			reason: reason.into(),
			applied_rules: Vec::new(),
			cache_hit: false,
			evaluation_time: Duration::ZERO,
			metadata: Map::new(),
		}
	}

	pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
		self.applied_rules.push(rule.into());
		self
	}

	pub fn with_rules(mut self, rules: Vec<String>) -> Self {
		self.applied_rules.extend(rules);
		self
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
		self.metadata.insert(key.into(), value);
		self
	}
}
