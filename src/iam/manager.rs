use crate::iam::abac::{AbacConfig, AbacEngine};
use crate::iam::audit::{AuditCategory, AuditEvent, AuditLogger, AuditOutcome};
use crate::iam::cache::{CacheConfig, CacheStats, PermissionCache};
use crate::iam::entities::{Action, AuthResource, Context, Decision, RoleStore, User};
use crate::iam::policy::{PolicyConfig, PolicyEvaluator};
use crate::iam::rbac::{RbacConfig, RbacEngine};
use crate::iam::rules::{Rule, RuleEngine, RuleSandbox};
use crate::iam::Error;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// The combined configuration of the authorization core
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct AuthConfig {
	pub rbac: RbacConfig,
	pub abac: AbacConfig,
	pub policy: PolicyConfig,
	pub cache: CacheConfig,
	pub sandbox: RuleSandbox,
}

/// One entry of a batched permission check
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct PermissionCheck {
	pub resource: AuthResource,
	pub action: Action,
	pub context: Context,
}

impl PermissionCheck {
	pub fn new(resource: AuthResource, action: Action) -> Self {
		Self {
			resource,
			action,
			context: Context::default(),
		}
	}

	pub fn with_context(mut self, context: Context) -> Self {
		self.context = context;
		self
	}
}

/// The health summary of the authorization core
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct HealthReport {
	pub healthy: bool,
	pub components: Map<String, Value>,
	pub performance: Map<String, Value>,
	pub last_check: DateTime<Utc>,
}

/// The authorization facade
///
/// Composes the role, attribute and rule engines under the policy
/// evaluator, fronted by the decision cache, with optional audit output.
#[non_exhaustive]
pub struct AuthManager {
	roles: Arc<RwLock<RoleStore>>,
	rbac: RbacEngine,
	abac: AbacEngine,
	rules: Mutex<RuleEngine>,
	policy: PolicyEvaluator,
	cache: PermissionCache,
	audit: Option<Arc<AuditLogger>>,
	last_check: Mutex<Option<DateTime<Utc>>>,
}

impl AuthManager {
	pub fn new(config: AuthConfig) -> Self {
		let roles = Arc::new(RwLock::new(RoleStore::new()));
		Self {
			rbac: RbacEngine::new(config.rbac, roles.clone()),
			abac: AbacEngine::new(config.abac),
			rules: Mutex::new(RuleEngine::new(config.sandbox)),
			policy: PolicyEvaluator::new(config.policy),
			cache: PermissionCache::new(config.cache),
			audit: None,
			roles,
			last_check: Mutex::new(None),
		}
	}

	/// Attach an audit sink for decision events
	pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
		self.audit = Some(audit);
		self
	}

	/// The shared role registry
	pub fn roles(&self) -> Arc<RwLock<RoleStore>> {
		self.roles.clone()
	}

	/// Decide a single action for a user
	pub fn check_permission(
		&self,
		user: &User,
		resource: &AuthResource,
		action: &Action,
		context: &Context,
	) -> Decision {
		let started = Instant::now();
		let key = PermissionCache::key(&user.id, &resource.to_string(), action.as_str());
		if let Some(mut decision) = self.cache.get(&key) {
			decision.cache_hit = true;
			decision.evaluation_time = started.elapsed();
			return decision;
		}
		// Inactive or locked accounts never reach the engines
		let mut decision = if !user.active || user.locked {
			Decision::deny("the account is inactive or locked").with_rule("auth:account_state")
		} else {
			let results = vec![
				self.rbac.decide(user, resource, action),
				self.abac.decide(user, resource, action, context),
				self.rules.lock().decide(user, resource, action, context),
			];
			self.policy.evaluate(user, resource, action, context, results)
		};
		decision.evaluation_time = started.elapsed();
		self.cache.put(key, decision.clone());
		if let Some(audit) = &self.audit {
			let outcome = if decision.allowed {
				AuditOutcome::Success
			} else {
				AuditOutcome::Denied
			};
			audit.log(
				AuditEvent::new(AuditCategory::Authorization, action.as_str())
					.with_outcome(outcome)
					.with_user(&user.id)
					.with_resource_id(resource)
					.with_detail("reason", Value::from(decision.reason.clone())),
			);
		}
		decision
	}

	/// Decide a batch of checks for one user, in order
	pub fn check_permissions(&self, user: &User, checks: &[PermissionCheck]) -> Vec<Decision> {
		checks
			.iter()
			.map(|c| self.check_permission(user, &c.resource, &c.action, &c.context))
			.collect()
	}

	/// Register a dynamic rule
	pub fn add_dynamic_rule(&self, rule: Rule) -> Result<(), Error> {
		self.rules.lock().add_rule(rule)?;
		// Cached decisions may now be stale
		self.cache.clear();
		Ok(())
	}

	/// Remove a dynamic rule by id
	pub fn remove_dynamic_rule(&self, id: &str) -> Result<(), Error> {
		self.rules.lock().remove_rule(id)?;
		self.cache.clear();
		Ok(())
	}

	/// Remove every dynamic rule
	pub fn clear_dynamic_rules(&self) {
		self.rules.lock().clear();
		self.cache.clear();
	}

	/// Drop every cached decision
	pub fn clear_permission_cache(&self) {
		self.cache.clear();
	}

	/// Drop cached decisions whose key matches a pattern
	pub fn invalidate_cache_pattern(&self, pattern: &str) -> Result<usize, Error> {
		self.cache.invalidate_pattern(pattern)
	}

	/// Cumulative cache statistics
	pub fn permission_cache_stats(&self) -> CacheStats {
		self.cache.stats()
	}

	/// Probe every component and report overall health
	pub fn health_check(&self) -> HealthReport {
		let mut components = Map::new();
		components.insert("rbac".to_owned(), Value::from("ok"));
		components.insert("abac".to_owned(), Value::from("ok"));
		components
			.insert("rules".to_owned(), Value::from(format!("{} rules", self.rules.lock().len())));
		components.insert("policy".to_owned(), Value::from("ok"));
		components
			.insert("cache".to_owned(), Value::from(format!("{} entries", self.cache.stats().size)));
		// Measure a full uncached decision as the latency probe
		let probe_user = User::new("health:probe", "probe");
		let probe = Instant::now();
		let _ = self.check_permission(
			&probe_user,
			&AuthResource::database("health"),
			&Action::from("read"),
			&Context::default(),
		);
		let mut performance = Map::new();
		performance
			.insert("probeMicros".to_owned(), Value::from(probe.elapsed().as_micros() as u64));
		let stats = self.cache.stats();
		performance.insert("cacheHitRate".to_owned(), Value::from(stats.hit_rate));
		let now = Utc::now();
		*self.last_check.lock() = Some(now);
		HealthReport {
			healthy: true,
			components,
			performance,
			last_check: now,
		}
	}
}
