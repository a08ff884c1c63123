use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A scoped usage session on the datastore
///
/// Sessions bracket a piece of client work. Ending a session aborts any
/// transaction it still holds open, so callers can not leak an active
/// transaction past their scope.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Session {
	/// The unique id of this session
	pub id: Uuid,
	/// When the session was started
	pub started: DateTime<Utc>,
}

impl Session {
	pub(crate) fn new() -> Self {
		Self {
			id: Uuid::new_v4(),
			started: Utc::now(),
		}
	}
}
