use crate::iam::entities::{Action, AuthResource, Context, User};
use crate::iam::{EngineResult, Error, Verdict};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Whether a matching rule allows or denies
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum RuleKind {
	Allow,
	Deny,
}

/// The resources and actions a rule applies to
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct RuleScope {
	/// Resource patterns, exact or wildcard
	pub resources: Vec<String>,
	/// Action names, or `*`
	pub actions: Vec<String>,
}

impl RuleScope {
	pub fn new(resources: Vec<String>, actions: Vec<String>) -> Self {
		Self {
			resources,
			actions,
		}
	}

	fn covers(&self, resource: &AuthResource, action: &Action) -> bool {
		let resource_ok = self.resources.iter().any(|p| resource.matches_pattern(p));
		let action_ok =
			self.actions.iter().any(|a| a == "*" || a == action.as_str());
		resource_ok && action_ok
	}
}

/// The input handed to a rule evaluator
///
/// Plain data only: the sandbox denies evaluators any handle to the
/// network, the filesystem, or the datastore itself.
#[derive(Debug)]
#[non_exhaustive]
pub struct RuleInput<'a> {
	pub user: &'a User,
	pub resource: &'a AuthResource,
	pub action: &'a Action,
	pub context: &'a Context,
}

/// A rule evaluator predicate
pub type RuleFn = Arc<dyn Fn(&RuleInput) -> Result<bool, Error> + Send + Sync>;

/// A user-provided dynamic rule
#[derive(Clone)]
#[non_exhaustive]
pub struct Rule {
	/// The unique rule id
	pub id: String,
	/// A human readable name
	pub name: String,
	/// Rules evaluate in descending priority order
	pub priority: i32,
	/// Whether a match allows or denies
	pub kind: RuleKind,
	/// The resources and actions the rule applies to
	pub scope: RuleScope,
	/// The evaluator predicate
	pub eval: RuleFn,
	/// Whether the rule is currently active
	pub active: bool,
	/// How long a per-rule result may be cached
	pub cache_ttl: Option<Duration>,
	/// A per-rule execution budget, capped by the sandbox
	pub timeout: Option<Duration>,
}

impl fmt::Debug for Rule {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Rule")
			.field("id", &self.id)
			.field("name", &self.name)
			.field("priority", &self.priority)
			.field("kind", &self.kind)
			.field("active", &self.active)
			.finish_non_exhaustive()
	}
}

impl Rule {
	pub fn new(
		id: impl Into<String>,
		name: impl Into<String>,
		kind: RuleKind,
		scope: RuleScope,
		eval: impl Fn(&RuleInput) -> Result<bool, Error> + Send + Sync + 'static,
	) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			priority: 0,
			kind,
			scope,
			eval: Arc::new(eval),
			active: true,
			cache_ttl: None,
			timeout: None,
		}
	}

	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
		self.cache_ttl = Some(ttl);
		self
	}

	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn inactive(mut self) -> Self {
		self.active = false;
		self
	}
}

/// The sandbox bounds applied to every rule evaluation
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct RuleSandbox {
	/// The hard wall-clock budget per evaluation
	pub max_execution_time: Duration,
	/// Network access is never granted; the flag exists so a config
	/// which asks for it fails loudly at registration
	pub allow_network: bool,
	/// Filesystem access is never granted either
	pub allow_filesystem: bool,
}

impl Default for RuleSandbox {
	fn default() -> Self {
		Self {
			max_execution_time: Duration::from_millis(*crate::cnf::MAX_RULE_TIMEOUT),
			allow_network: false,
			allow_filesystem: false,
		}
	}
}

/// The dynamic rule engine
///
/// Holds a priority-ordered rule list; the highest-priority matching rule
/// decides. Evaluator faults and timeouts never abort the outer decision:
/// they surface as `rule:<id>:error` breadcrumbs and the walk continues.
#[non_exhaustive]
pub struct RuleEngine {
	sandbox: RuleSandbox,
	rules: Vec<Rule>,
	results: HashMap<String, (bool, Instant)>,
}

impl RuleEngine {
	pub fn new(sandbox: RuleSandbox) -> Self {
		Self {
			sandbox,
			rules: Vec::new(),
			results: HashMap::new(),
		}
	}

	/// Register a rule, keeping the list sorted by descending priority
	pub fn add_rule(&mut self, rule: Rule) -> Result<(), Error> {
		if rule.id.is_empty() {
			return Err(Error::InvalidRule("the rule id must not be empty".to_owned()));
		}
		if self.rules.iter().any(|r| r.id == rule.id) {
			return Err(Error::InvalidRule(format!("the rule '{}' already exists", rule.id)));
		}
		if rule.scope.resources.is_empty() || rule.scope.actions.is_empty() {
			return Err(Error::InvalidRule("the rule scope must not be empty".to_owned()));
		}
		if let Some(timeout) = rule.timeout {
			if timeout > self.sandbox.max_execution_time {
				return Err(Error::InvalidRule(format!(
					"the rule timeout exceeds the sandbox limit of {:?}",
					self.sandbox.max_execution_time
				)));
			}
		}
		debug!("Registered dynamic rule '{}'", rule.id);
		self.rules.push(rule);
		self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
		Ok(())
	}

	/// Remove a rule by id
	pub fn remove_rule(&mut self, id: &str) -> Result<(), Error> {
		let before = self.rules.len();
		self.rules.retain(|r| r.id != id);
		if self.rules.len() == before {
			return Err(Error::RuleNotFound(id.to_owned()));
		}
		self.results.retain(|k, _| !k.starts_with(&format!("{id}:")));
		Ok(())
	}

	/// Remove every rule
	pub fn clear(&mut self) {
		self.rules.clear();
		self.results.clear();
	}

	/// The number of registered rules
	pub fn len(&self) -> usize {
		self.rules.len()
	}

	pub fn is_empty(&self) -> bool {
		self.rules.is_empty()
	}

	/// Decide a single action by walking the rules in priority order
	pub fn decide(
		&mut self,
		user: &User,
		resource: &AuthResource,
		action: &Action,
		context: &Context,
	) -> EngineResult {
		let input = RuleInput {
			user,
			resource,
			action,
			context,
		};
		let mut rules_applied = Vec::new();
		for rule in &self.rules {
			if !rule.active || !rule.scope.covers(resource, action) {
				continue;
			}
			let cache_key = format!("{}:{}:{resource}:{action}", rule.id, user.id);
			let matched = match Self::cached(&self.results, rule, &cache_key) {
				Some(hit) => hit,
				None => {
					let started = Instant::now();
					let outcome = (rule.eval)(&input);
					let elapsed = started.elapsed();
					let budget = rule.timeout.unwrap_or(self.sandbox.max_execution_time);
					match outcome {
						Ok(matched) if elapsed <= budget => {
							if let Some(ttl) = rule.cache_ttl {
								self.results
									.insert(cache_key, (matched, Instant::now() + ttl));
							}
							matched
						}
						Ok(_) => {
							warn!("Rule '{}' overran its {budget:?} budget", rule.id);
							rules_applied.push(format!("rule:{}:error", rule.id));
							continue;
						}
						Err(e) => {
							warn!("Rule '{}' failed to evaluate: {e}", rule.id);
							rules_applied.push(format!("rule:{}:error", rule.id));
							continue;
						}
					}
				}
			};
			if matched {
				rules_applied.push(format!("rule:{}", rule.id));
				let verdict = match rule.kind {
					RuleKind::Allow => Verdict::Allow,
					RuleKind::Deny => Verdict::Deny,
				};
				return EngineResult::new("rules", verdict, format!("rule '{}' matched", rule.name))
					.with_rules(rules_applied);
			}
		}
		EngineResult::new("rules", Verdict::Abstain, "no dynamic rule matched")
			.with_rules(rules_applied)
	}

	fn cached(
		results: &HashMap<String, (bool, Instant)>,
		rule: &Rule,
		key: &str,
	) -> Option<bool> {
		rule.cache_ttl?;
		let (matched, expires) = results.get(key)?;
		(Instant::now() < *expires).then_some(*matched)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn scope_all() -> RuleScope {
		RuleScope::new(vec!["*".to_owned()], vec!["*".to_owned()])
	}

	fn ctx() -> (User, AuthResource, Action, Context) {
		(
			User::new("u", "u"),
			AuthResource::collection("posts"),
			Action::from("read"),
			Context::new(),
		)
	}

	#[test]
	fn registration_validates_the_rule() {
		let mut engine = RuleEngine::new(RuleSandbox::default());
		let err = engine
			.add_rule(Rule::new("", "x", RuleKind::Allow, scope_all(), |_| Ok(true)))
			.unwrap_err();
		assert!(matches!(err, Error::InvalidRule(_)));
		let err = engine
			.add_rule(Rule::new("r", "x", RuleKind::Allow, RuleScope::default(), |_| Ok(true)))
			.unwrap_err();
		assert!(matches!(err, Error::InvalidRule(_)));
		let err = engine
			.add_rule(
				Rule::new("r", "x", RuleKind::Allow, scope_all(), |_| Ok(true))
					.with_timeout(Duration::from_secs(3600)),
			)
			.unwrap_err();
		assert!(matches!(err, Error::InvalidRule(_)));
	}

	#[test]
	fn priority_orders_the_walk() {
		let mut engine = RuleEngine::new(RuleSandbox::default());
		engine
			.add_rule(
				Rule::new("low", "low", RuleKind::Allow, scope_all(), |_| Ok(true))
					.with_priority(1),
			)
			.unwrap();
		engine
			.add_rule(
				Rule::new("high", "high", RuleKind::Deny, scope_all(), |_| Ok(true))
					.with_priority(10),
			)
			.unwrap();
		let (user, resource, action, context) = ctx();
		let result = engine.decide(&user, &resource, &action, &context);
		assert_eq!(result.verdict, Verdict::Deny);
		assert_eq!(result.applied_rules, vec!["rule:high".to_owned()]);
	}

	#[test]
	fn out_of_scope_rules_are_skipped() {
		let mut engine = RuleEngine::new(RuleSandbox::default());
		engine
			.add_rule(Rule::new(
				"other",
				"other",
				RuleKind::Deny,
				RuleScope::new(vec!["collection:other".to_owned()], vec!["*".to_owned()]),
				|_| Ok(true),
			))
			.unwrap();
		let (user, resource, action, context) = ctx();
		let result = engine.decide(&user, &resource, &action, &context);
		assert_eq!(result.verdict, Verdict::Abstain);
	}

	#[test]
	fn evaluator_errors_do_not_abort_the_walk() {
		let mut engine = RuleEngine::new(RuleSandbox::default());
		engine
			.add_rule(
				Rule::new("bad", "bad", RuleKind::Deny, scope_all(), |_| {
					Err(Error::EvaluatorError("boom".to_owned()))
				})
				.with_priority(10),
			)
			.unwrap();
		engine
			.add_rule(
				Rule::new("good", "good", RuleKind::Allow, scope_all(), |_| Ok(true))
					.with_priority(1),
			)
			.unwrap();
		let (user, resource, action, context) = ctx();
		let result = engine.decide(&user, &resource, &action, &context);
		assert_eq!(result.verdict, Verdict::Allow);
		assert_eq!(
			result.applied_rules,
			vec!["rule:bad:error".to_owned(), "rule:good".to_owned()]
		);
	}

	#[test]
	fn inactive_rules_do_not_fire() {
		let mut engine = RuleEngine::new(RuleSandbox::default());
		engine
			.add_rule(Rule::new("r", "r", RuleKind::Deny, scope_all(), |_| Ok(true)).inactive())
			.unwrap();
		let (user, resource, action, context) = ctx();
		assert_eq!(engine.decide(&user, &resource, &action, &context).verdict, Verdict::Abstain);
	}

	#[test]
	fn results_cache_respects_ttl() {
		use std::sync::atomic::{AtomicU32, Ordering};
		let calls = Arc::new(AtomicU32::new(0));
		let seen = calls.clone();
		let mut engine = RuleEngine::new(RuleSandbox::default());
		engine
			.add_rule(
				Rule::new("r", "r", RuleKind::Allow, scope_all(), move |_| {
					seen.fetch_add(1, Ordering::SeqCst);
					Ok(true)
				})
				.with_cache_ttl(Duration::from_secs(60)),
			)
			.unwrap();
		let (user, resource, action, context) = ctx();
		engine.decide(&user, &resource, &action, &context);
		engine.decide(&user, &resource, &action, &context);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn removal_and_clear() {
		let mut engine = RuleEngine::new(RuleSandbox::default());
		engine.add_rule(Rule::new("r", "r", RuleKind::Allow, scope_all(), |_| Ok(true))).unwrap();
		assert!(matches!(engine.remove_rule("x"), Err(Error::RuleNotFound(_))));
		engine.remove_rule("r").unwrap();
		assert!(engine.is_empty());
		engine.add_rule(Rule::new("r", "r", RuleKind::Allow, scope_all(), |_| Ok(true))).unwrap();
		engine.clear();
		assert!(engine.is_empty());
	}
}
