use crate::iam::entities::{Action, AuthResource, Context, User};
use crate::iam::{EngineResult, Verdict};
use chrono::{Timelike, Utc};
use regex::Regex;
use std::time::Duration;

/// Configuration of the attribute-based engine
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct AbacConfig {
	/// Whether the engine participates in decisions
	pub enabled: bool,
	/// Strict mode denies when a required attribute is missing
	pub strict_mode: bool,
	/// Whether an undecided check denies
	pub default_deny: bool,
	/// The inclusive business-hours window, as hours of day
	pub business_hours: (u32, u32),
	/// How long a session may stay idle before it counts as stale
	pub max_idle: Duration,
	/// Patterns identifying high-security collections
	pub sensitive_patterns: Vec<String>,
}

impl Default for AbacConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			strict_mode: false,
			default_deny: true,
			business_hours: (9, 17),
			max_idle: Duration::from_secs(30 * 60),
			sensitive_patterns: vec!["(?i)(secret|secure|classified|private|admin)".to_owned()],
		}
	}
}

/// The attribute-based access control engine
///
/// Evaluates contextual checks in a fixed order: resource sensitivity
/// against the user's access level, business hours for sensitive actions,
/// region intersection, document ownership, and session freshness. Any
/// failing check denies; if every check defers the engine falls back to
/// its default.
#[non_exhaustive]
pub struct AbacEngine {
	config: AbacConfig,
	sensitive: Vec<Regex>,
}

/// The outcome of one contextual check
enum Check {
	Pass(&'static str),
	Deny(&'static str, String),
	Missing(&'static str),
	Skip,
}

impl AbacEngine {
	pub fn new(config: AbacConfig) -> Self {
		let sensitive = config
			.sensitive_patterns
			.iter()
			.filter_map(|p| match Regex::new(p) {
				Ok(re) => Some(re),
				Err(e) => {
					warn!("Ignoring invalid sensitivity pattern '{p}': {e}");
					None
				}
			})
			.collect();
		Self {
			config,
			sensitive,
		}
	}

	/// Decide a single action for a user in context
	pub fn decide(
		&self,
		user: &User,
		resource: &AuthResource,
		action: &Action,
		context: &Context,
	) -> EngineResult {
		if !self.config.enabled {
			return EngineResult::new("abac", Verdict::Allow, "ABAC disabled")
				.with_rule("abac:disabled");
		}
		let checks = [
			self.check_access_level(user, resource),
			self.check_business_hours(action, context),
			self.check_region(user, context),
			self.check_ownership(user, resource, context),
			self.check_freshness(context),
		];
		let mut rules = Vec::new();
		let mut passed = false;
		let mut missing = false;
		for check in checks {
			match check {
				Check::Pass(name) => {
					rules.push(format!("abac:{name}"));
					passed = true;
				}
				Check::Deny(name, reason) => {
					rules.push(format!("abac:{name}"));
					return EngineResult::new("abac", Verdict::Deny, reason).with_rules(rules);
				}
				Check::Missing(name) => {
					rules.push(format!("abac:{name}:missing"));
					if self.config.strict_mode {
						return EngineResult::new(
							"abac",
							Verdict::Deny,
							format!("required attribute for '{name}' is missing"),
						)
						.with_rules(rules);
					}
					missing = true;
				}
				Check::Skip => {}
			}
		}
		if passed {
			return EngineResult::new("abac", Verdict::Allow, "attribute checks passed")
				.with_rules(rules);
		}
		// An applicable check could not decide, so the default applies
		if missing {
			let verdict = if self.config.default_deny {
				Verdict::Deny
			} else {
				Verdict::Allow
			};
			return EngineResult::new("abac", verdict, "required attributes are missing")
				.with_rules(rules);
		}
		// No check applied to this decision at all
		EngineResult::new("abac", Verdict::Abstain, "no attribute check applied").with_rules(rules)
	}

	/// High-security collections require a high access level
	fn check_access_level(&self, user: &User, resource: &AuthResource) -> Check {
		let Some(collection) = resource.collection_name() else {
			return Check::Skip;
		};
		if !self.sensitive.iter().any(|re| re.is_match(collection)) {
			return Check::Skip;
		}
		match user.attribute_str("accessLevel") {
			Some("high") => Check::Pass("access_level"),
			Some(level) => Check::Deny(
				"access_level",
				format!("access level '{level}' is below the required level"),
			),
			None => Check::Missing("access_level"),
		}
	}

	/// Sensitive actions are gated to business hours
	fn check_business_hours(&self, action: &Action, context: &Context) -> Check {
		if !action.is_sensitive() {
			return Check::Skip;
		}
		let hour = context.local_hour.unwrap_or_else(|| Utc::now().hour());
		let (open, close) = self.config.business_hours;
		if hour >= open && hour <= close {
			Check::Pass("business_hours")
		} else {
			Check::Deny(
				"business_hours",
				format!("the action '{action}' is restricted outside business hours"),
			)
		}
	}

	/// The request region must intersect the user's allowed regions
	fn check_region(&self, user: &User, context: &Context) -> Check {
		let Some(region) = &context.region else {
			return Check::Skip;
		};
		match user.attribute_list("allowedRegions") {
			Some(allowed) => {
				if allowed.iter().any(|r| r == region) {
					Check::Pass("region")
				} else {
					Check::Deny("region", format!("region '{region}' is not allowed"))
				}
			}
			None => Check::Missing("region"),
		}
	}

	/// Document access compares the owner against the principal
	fn check_ownership(&self, user: &User, resource: &AuthResource, context: &Context) -> Check {
		if !matches!(resource, AuthResource::Document { .. }) {
			return Check::Skip;
		}
		match &context.owner_id {
			Some(owner) => {
				if owner == &user.id {
					Check::Pass("ownership")
				} else {
					Check::Deny("ownership", "the document belongs to another user".to_owned())
				}
			}
			None => Check::Missing("ownership"),
		}
	}

	/// Stale sessions are denied
	fn check_freshness(&self, context: &Context) -> Check {
		let Some(last) = context.last_activity else {
			return Check::Skip;
		};
		let idle = Utc::now().signed_duration_since(last);
		if idle.num_seconds() < 0 || (idle.num_seconds() as u64) <= self.config.max_idle.as_secs() {
			Check::Pass("freshness")
		} else {
			Check::Deny("freshness", "the session has been idle for too long".to_owned())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn engine() -> AbacEngine {
		AbacEngine::new(AbacConfig::default())
	}

	fn strict_engine() -> AbacEngine {
		let mut config = AbacConfig::default();
		config.strict_mode = true;
		AbacEngine::new(config)
	}

	#[test]
	fn sensitive_collection_requires_high_access() {
		let user = User::new("u", "u").with_attribute("accessLevel", json!("low"));
		let result = engine().decide(
			&user,
			&AuthResource::collection("secret-files"),
			&Action::from("read"),
			&Context::new(),
		);
		assert_eq!(result.verdict, Verdict::Deny);
		assert!(result.applied_rules.contains(&"abac:access_level".to_owned()));
		let user = User::new("u", "u").with_attribute("accessLevel", json!("high"));
		let result = engine().decide(
			&user,
			&AuthResource::collection("secret-files"),
			&Action::from("read"),
			&Context::new(),
		);
		assert_eq!(result.verdict, Verdict::Allow);
	}

	#[test]
	fn missing_attribute_defers_to_the_default() {
		let user = User::new("u", "u");
		let resource = AuthResource::collection("classified");
		// Lenient mode defers past the missing attribute to default deny
		let result = engine().decide(&user, &resource, &Action::from("read"), &Context::new());
		assert_eq!(result.verdict, Verdict::Deny);
		assert_eq!(result.reason, "required attributes are missing");
		assert!(result.applied_rules.contains(&"abac:access_level:missing".to_owned()));
		// Strict mode denies outright
		let result = strict_engine().decide(&user, &resource, &Action::from("read"), &Context::new());
		assert_eq!(result.verdict, Verdict::Deny);
		assert_eq!(result.reason, "required attribute for 'access_level' is missing");
	}

	#[test]
	fn sensitive_actions_respect_business_hours() {
		let user = User::new("u", "u");
		let resource = AuthResource::collection("posts");
		let inside = Context::new().with_local_hour(11);
		let outside = Context::new().with_local_hour(3);
		let result = engine().decide(&user, &resource, &Action::from("delete"), &inside);
		assert_eq!(result.verdict, Verdict::Allow);
		let result = engine().decide(&user, &resource, &Action::from("delete"), &outside);
		assert_eq!(result.verdict, Verdict::Deny);
		assert!(result.applied_rules.contains(&"abac:business_hours".to_owned()));
		// Plain reads are not gated
		let result = engine().decide(&user, &resource, &Action::from("read"), &outside);
		assert_ne!(result.reason, "the action 'read' is restricted outside business hours");
	}

	#[test]
	fn region_intersection() {
		let user = User::new("u", "u").with_attribute("allowedRegions", json!(["eu", "us"]));
		let resource = AuthResource::collection("posts");
		let result =
			engine().decide(&user, &resource, &Action::from("read"), &Context::new().with_region("eu"));
		assert_eq!(result.verdict, Verdict::Allow);
		let result =
			engine().decide(&user, &resource, &Action::from("read"), &Context::new().with_region("ap"));
		assert_eq!(result.verdict, Verdict::Deny);
	}

	#[test]
	fn document_ownership() {
		let user = User::new("u1", "u");
		let resource = AuthResource::document("posts", "9");
		let mine = Context::new().with_owner("u1");
		let theirs = Context::new().with_owner("u2");
		assert_eq!(engine().decide(&user, &resource, &Action::from("read"), &mine).verdict, Verdict::Allow);
		assert_eq!(engine().decide(&user, &resource, &Action::from("read"), &theirs).verdict, Verdict::Deny);
	}

	#[test]
	fn stale_sessions_are_denied() {
		let user = User::new("u", "u");
		let resource = AuthResource::collection("posts");
		let fresh = Context::new().with_last_activity(Utc::now());
		let stale = Context::new()
			.with_last_activity(Utc::now() - chrono::Duration::hours(2));
		assert_eq!(engine().decide(&user, &resource, &Action::from("read"), &fresh).verdict, Verdict::Allow);
		let result = engine().decide(&user, &resource, &Action::from("read"), &stale);
		assert_eq!(result.verdict, Verdict::Deny);
		assert!(result.applied_rules.contains(&"abac:freshness".to_owned()));
	}

	#[test]
	fn nothing_applicable_abstains() {
		let user = User::new("u", "u");
		let result = engine().decide(
			&user,
			&AuthResource::collection("posts"),
			&Action::from("read"),
			&Context::new(),
		);
		assert_eq!(result.verdict, Verdict::Abstain);
		assert_eq!(result.reason, "no attribute check applied");
	}
}
