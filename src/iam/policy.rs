use crate::iam::entities::{Action, AuthResource, Context, Decision, User};
use crate::iam::{EngineResult, Verdict};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// A per-user sliding-window rate limit
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct RateLimit {
	/// The number of checks admitted per window
	pub max_requests: usize,
	/// The window length
	pub window: Duration,
}

/// Configuration of the policy evaluator
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct PolicyConfig {
	/// Whether policy evaluation runs at all
	pub enabled: bool,
	/// The outcome when no engine decides
	pub default_allow: bool,
	/// The engine order used when combining results
	pub evaluation_order: Vec<String>,
	/// Roles which bypass every engine
	pub admin_override_roles: Vec<String>,
	/// Whether emergency access claims are honoured
	pub emergency_access: bool,
	/// Whether the system is in maintenance mode
	pub maintenance_mode: bool,
	/// An optional per-user rate limit
	pub rate_limit: Option<RateLimit>,
}

impl Default for PolicyConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			default_allow: false,
			evaluation_order: Vec::new(),
			admin_override_roles: vec!["system:super_admin".to_owned()],
			emergency_access: false,
			maintenance_mode: false,
			rate_limit: None,
		}
	}
}

/// Combines engine verdicts under deny-by-default
///
/// Out-of-band policies take precedence over the engines, in this order:
/// admin override, emergency access, maintenance mode, rate limiting.
#[non_exhaustive]
pub struct PolicyEvaluator {
	config: PolicyConfig,
	requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl PolicyEvaluator {
	pub fn new(config: PolicyConfig) -> Self {
		Self {
			config,
			requests: Mutex::new(HashMap::new()),
		}
	}

	/// Combine engine results into the final decision
	pub fn evaluate(
		&self,
		user: &User,
		_resource: &AuthResource,
		action: &Action,
		context: &Context,
		mut results: Vec<EngineResult>,
	) -> Decision {
		if !self.config.enabled {
			return Decision::allow("policy evaluation disabled").with_rule("policy:disabled");
		}
		// Out-of-band policies outrank the engines
		if let Some(decision) = self.out_of_band(user, action, context) {
			return decision;
		}
		// Apply the configured engine ordering; unknown engines follow
		if !self.config.evaluation_order.is_empty() {
			let order = &self.config.evaluation_order;
			results.sort_by_key(|r| {
				order.iter().position(|name| name == r.engine).unwrap_or(order.len())
			});
		}
		let mut applied = Vec::new();
		for r in &results {
			applied.extend(r.applied_rules.iter().cloned());
		}
		if let Some(denying) = results.iter().find(|r| r.verdict == Verdict::Deny) {
			return Decision::deny(denying.reason.clone())
				.with_rules(applied)
				.with_metadata("denyingEngine", Value::from(denying.engine));
		}
		if let Some(allowing) = results.iter().find(|r| r.verdict == Verdict::Allow) {
			return Decision::allow(allowing.reason.clone())
				.with_rules(applied)
				.with_metadata("allowingEngine", Value::from(allowing.engine));
		}
		// No engine decided, so the default policy applies
		if self.config.default_allow {
			Decision::allow("default policy").with_rules(applied).with_rule("policy:default_allow")
		} else {
			Decision::deny("denied by default").with_rules(applied).with_rule("policy:default_deny")
		}
	}

	/// The policies which outrank engine combination
	fn out_of_band(&self, user: &User, action: &Action, context: &Context) -> Option<Decision> {
		if user.roles.iter().any(|r| self.config.admin_override_roles.contains(r)) {
			return Some(
				Decision::allow("administrative override").with_rule("policy:admin_override"),
			);
		}
		if self.config.emergency_access && context.emergency {
			warn!("Emergency access granted to '{}'", user.id);
			return Some(
				Decision::allow("emergency access").with_rule("policy:emergency_access"),
			);
		}
		if self.config.maintenance_mode && action.is_write() {
			return Some(
				Decision::deny("the system is in maintenance mode")
					.with_rule("policy:maintenance_mode"),
			);
		}
		if let Some(limit) = self.config.rate_limit {
			if !self.admit(&user.id, limit) {
				return Some(
					Decision::deny("rate limit exceeded").with_rule("policy:rate_limit"),
				);
			}
		}
		None
	}

	/// Record a request and check it against the sliding window
	fn admit(&self, user_id: &str, limit: RateLimit) -> bool {
		let now = Instant::now();
		let mut requests = self.requests.lock();
		let window = requests.entry(user_id.to_owned()).or_default();
		while window.front().map(|t| now.duration_since(*t) > limit.window).unwrap_or(false) {
			window.pop_front();
		}
		if window.len() >= limit.max_requests {
			return false;
		}
		window.push_back(now);
		true
	}
}
