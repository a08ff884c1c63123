use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The category of an audit event
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum AuditCategory {
	Storage,
	Transaction,
	Authorization,
	Security,
}

/// The severity of an audit event
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum AuditSeverity {
	#[default]
	Info,
	Warning,
	Error,
	Critical,
}

/// The outcome an audit event reports
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum AuditOutcome {
	#[default]
	Success,
	Failure,
	Denied,
}

/// A single audit event
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AuditEvent {
	pub category: AuditCategory,
	pub action: String,
	pub severity: AuditSeverity,
	pub outcome: AuditOutcome,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub resource: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub resource_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub user: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session: Option<String>,
	pub timestamp: DateTime<Utc>,
	#[serde(skip_serializing_if = "Map::is_empty")]
	pub context: Map<String, Value>,
	#[serde(skip_serializing_if = "Map::is_empty")]
	pub details: Map<String, Value>,
}

impl AuditEvent {
	pub fn new(category: AuditCategory, action: impl Into<String>) -> Self {
		Self {
			category,
			action: action.into(),
			severity: AuditSeverity::Info,
			outcome: AuditOutcome::Success,
			resource: None,
			resource_id: None,
			user: None,
			session: None,
			timestamp: Utc::now(),
			context: Map::new(),
			details: Map::new(),
		}
	}

	pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
		self.severity = severity;
		self
	}

	pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
		self.outcome = outcome;
		self
	}

	pub fn with_resource(mut self, kind: &str, name: &str) -> Self {
		self.resource = Some(format!("{kind}:{name}"));
		self
	}

	pub fn with_resource_id(mut self, id: impl ToString) -> Self {
		self.resource_id = Some(id.to_string());
		self
	}

	pub fn with_user(mut self, user: impl Into<String>) -> Self {
		self.user = Some(user.into());
		self
	}

	pub fn with_session(mut self, session: impl ToString) -> Self {
		self.session = Some(session.to_string());
		self
	}

	pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
		self.details.insert(key.into(), value);
		self
	}
}

/// A subscriber-side filter over the audit stream
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct AuditFilter {
	/// Only events of this category
	pub category: Option<AuditCategory>,
	/// Only events with this action
	pub action: Option<String>,
	/// Only events attributed to this user
	pub user: Option<String>,
	/// Only events at or above this severity
	pub min_severity: Option<AuditSeverity>,
}

impl AuditFilter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn category(mut self, category: AuditCategory) -> Self {
		self.category = Some(category);
		self
	}

	pub fn action(mut self, action: impl Into<String>) -> Self {
		self.action = Some(action.into());
		self
	}

	pub fn user(mut self, user: impl Into<String>) -> Self {
		self.user = Some(user.into());
		self
	}

	pub fn min_severity(mut self, severity: AuditSeverity) -> Self {
		self.min_severity = Some(severity);
		self
	}

	fn accepts(&self, event: &AuditEvent) -> bool {
		if let Some(category) = self.category {
			if event.category != category {
				return false;
			}
		}
		if let Some(action) = &self.action {
			if &event.action != action {
				return false;
			}
		}
		if let Some(user) = &self.user {
			if event.user.as_deref() != Some(user.as_str()) {
				return false;
			}
		}
		if let Some(min) = self.min_severity {
			if event.severity < min {
				return false;
			}
		}
		true
	}
}

/// The audit event stream
///
/// Delivery is fire-and-forget: subscriber channels that are closed are
/// pruned and a failed send is logged, never propagated.
#[derive(Default)]
#[non_exhaustive]
pub struct AuditLogger {
	subscribers: RwLock<Vec<(AuditFilter, async_channel::Sender<AuditEvent>)>>,
}

impl AuditLogger {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a filtered subscriber
	pub fn subscribe(&self, filter: AuditFilter) -> async_channel::Receiver<AuditEvent> {
		let (tx, rx) = async_channel::unbounded();
		self.subscribers.write().push((filter, tx));
		rx
	}

	/// Emit a single event to every matching subscriber
	pub fn log(&self, event: AuditEvent) {
		let mut closed = false;
		{
			let subscribers = self.subscribers.read();
			for (filter, sender) in subscribers.iter() {
				if !filter.accepts(&event) {
					continue;
				}
				if let Err(e) = sender.try_send(event.clone()) {
					warn!("Dropping a closed audit subscriber: {e}");
					closed = true;
				}
			}
		}
		if closed {
			self.subscribers.write().retain(|(_, sender)| !sender.is_closed());
		}
	}

	/// Emit a batch of events
	///
	/// The batch fans out element by element before this call returns, so
	/// an event logged concurrently from another task may interleave
	/// between two batch elements. Within one caller, ordering follows
	/// call order.
	pub fn log_batch(&self, events: Vec<AuditEvent>) {
		for event in events {
			self.log(event);
		}
	}

	/// The number of registered subscribers
	pub fn subscriber_count(&self) -> usize {
		self.subscribers.read().len()
	}
}
