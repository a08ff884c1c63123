//! The authorization core: role-based, attribute-based and rule-based
//! permission engines combined under a deny-by-default policy evaluator,
//! with a per-decision cache and an audit event stream.

pub mod abac;
pub mod audit;
pub mod cache;
pub mod entities;
pub mod manager;
pub mod policy;
pub mod rbac;
pub mod rules;

pub use entities::{Action, AuthResource, Context, Decision, Permission, Role, RoleStore, User};
pub use manager::{AuthConfig, AuthManager, HealthReport};

use thiserror::Error;

/// An error originating from the authorization subsystem
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	/// The named role is not registered
	#[error("The role '{0}' does not exist")]
	RoleNotFound(String),

	/// A role with this name is already registered
	#[error("The role '{0}' already exists")]
	RoleExists(String),

	/// The named role is a protected system role
	#[error("The system role '{0}' can not be removed")]
	RoleProtected(String),

	/// Adding this parent would make the role its own ancestor
	#[error("Adding '{parent}' as a parent of '{role}' would create a cycle")]
	HierarchyCycle {
		role: String,
		parent: String,
	},

	/// The dynamic rule failed validation on registration
	#[error("Invalid dynamic rule: {0}")]
	InvalidRule(String),

	/// The named dynamic rule is not registered
	#[error("The dynamic rule '{0}' does not exist")]
	RuleNotFound(String),

	/// A rule evaluator failed or overran its sandbox limits
	#[error("Rule evaluation failed: {0}")]
	EvaluatorError(String),

	/// A cache invalidation pattern did not parse
	#[error("Invalid cache invalidation pattern: {0}")]
	InvalidPattern(String),
}

/// The verdict an engine contributes to the final decision
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum Verdict {
	Allow,
	Deny,
	/// The engine had nothing decisive to say
	Abstain,
}

/// The contribution of one engine to a permission decision
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct EngineResult {
	/// The engine identifier, used for ordering and metadata
	pub engine: &'static str,
	/// The verdict
	pub verdict: Verdict,
	/// A human readable reason
	pub reason: String,
	/// Breadcrumbs describing which rules applied
	pub applied_rules: Vec<String>,
}

impl EngineResult {
	pub fn new(engine: &'static str, verdict: Verdict, reason: impl Into<String>) -> Self {
		Self {
			engine,
			verdict,
			reason: reason.into(),
			applied_rules: Vec::new(),
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
}
