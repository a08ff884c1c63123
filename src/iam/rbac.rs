use crate::iam::entities::{Action, AuthResource, RoleStore, User};
use crate::iam::{EngineResult, Verdict};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration of the role-based engine
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct RbacConfig {
	/// Whether the engine participates in decisions
	pub enabled: bool,
	/// Strict mode disables the admin name override
	pub strict_mode: bool,
	/// Whether permissions inherit through the role hierarchy
	pub inheritance_enabled: bool,
	/// Whether an undecided check denies
	pub default_deny: bool,
}

impl Default for RbacConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			strict_mode: false,
			inheritance_enabled: true,
			default_deny: true,
		}
	}
}

/// The role-based access control engine
#[derive(Clone)]
#[non_exhaustive]
pub struct RbacEngine {
	config: RbacConfig,
	roles: Arc<RwLock<RoleStore>>,
}

impl RbacEngine {
	pub fn new(config: RbacConfig, roles: Arc<RwLock<RoleStore>>) -> Self {
		Self {
			config,
			roles,
		}
	}

	/// Decide a single action for a user
	pub fn decide(&self, user: &User, resource: &AuthResource, action: &Action) -> EngineResult {
		if !self.config.enabled {
			return EngineResult::new("rbac", Verdict::Allow, "RBAC disabled")
				.with_rule("rbac:disabled");
		}
		if user.roles.is_empty() {
			let verdict = if self.config.default_deny {
				Verdict::Deny
			} else {
				Verdict::Allow
			};
			return EngineResult::new("rbac", verdict, "user has no roles")
				.with_rule("rbac:no_roles");
		}
		let resource_str = resource.to_string();
		let permissions = self
			.roles
			.read()
			.effective_permissions(&user.roles, self.config.inheritance_enabled);
		let mut rules = vec!["rbac:role_permissions".to_owned()];
		// Exact grants first, wildcard grants second
		for p in &permissions {
			if p.resource == resource_str && action_matches(&p.action, action) {
				rules.push(format!("rbac:permission:{resource_str}:{action}"));
				return EngineResult::new("rbac", Verdict::Allow, "permission granted")
					.with_rules(rules);
			}
		}
		for p in &permissions {
			if is_wildcard(&p.resource)
				&& resource.matches_pattern(&p.resource)
				&& action_matches(&p.action, action)
			{
				rules.push(format!("rbac:wildcard:{}", p.resource));
				return EngineResult::new("rbac", Verdict::Allow, "wildcard permission granted")
					.with_rules(rules);
			}
		}
		// Admin-looking role names bypass the permission walk outside
		// strict mode
		if !self.config.strict_mode
			&& (user.has_role_containing("admin") || user.has_role_containing("super"))
		{
			rules.push("rbac:admin_override".to_owned());
			return EngineResult::new("rbac", Verdict::Allow, "admin role override")
				.with_rules(rules);
		}
		rules.push("rbac:no_match".to_owned());
		let verdict = if self.config.default_deny {
			Verdict::Deny
		} else {
			Verdict::Allow
		};
		EngineResult::new("rbac", verdict, format!("no permission matches {action} on {resource_str}"))
			.with_rules(rules)
	}
}

fn action_matches(granted: &str, action: &Action) -> bool {
	granted == "*" || granted == "all" || granted == action.as_str()
}

fn is_wildcard(pattern: &str) -> bool {
	pattern == "*" || pattern == "all" || pattern.ends_with(":*")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::iam::entities::{Permission, Role};

	fn engine(config: RbacConfig) -> RbacEngine {
		let mut store = RoleStore::new();
		store
			.register(
				Role::new("user").with_permission(Permission::new("collection:posts", "read")),
			)
			.unwrap();
		store
			.register(Role::new("moderator").with_permission(Permission::new("collection:posts:*", "*")))
			.unwrap();
		store.register(Role::new("support_admin")).unwrap();
		RbacEngine::new(config, Arc::new(RwLock::new(store)))
	}

	fn user() -> User {
		User::new("u1", "one").with_role("user")
	}

	#[test]
	fn disabled_engine_allows() {
		let mut config = RbacConfig::default();
		config.enabled = false;
		let result = engine(config).decide(
			&user(),
			&AuthResource::collection("posts"),
			&Action::from("read"),
		);
		assert_eq!(result.verdict, Verdict::Allow);
		assert_eq!(result.applied_rules, vec!["rbac:disabled".to_owned()]);
	}

	#[test]
	fn no_roles_defers_to_default_deny() {
		let result = engine(RbacConfig::default()).decide(
			&User::new("u2", "two"),
			&AuthResource::collection("posts"),
			&Action::from("read"),
		);
		assert_eq!(result.verdict, Verdict::Deny);
		assert!(result.applied_rules.contains(&"rbac:no_roles".to_owned()));
	}

	#[test]
	fn exact_permission_allows() {
		let result = engine(RbacConfig::default()).decide(
			&user(),
			&AuthResource::collection("posts"),
			&Action::from("read"),
		);
		assert_eq!(result.verdict, Verdict::Allow);
		assert!(result
			.applied_rules
			.contains(&"rbac:permission:collection:posts:read".to_owned()));
	}

	#[test]
	fn unmatched_action_denies() {
		let result = engine(RbacConfig::default()).decide(
			&user(),
			&AuthResource::collection("posts"),
			&Action::from("delete"),
		);
		assert_eq!(result.verdict, Verdict::Deny);
		assert!(result.applied_rules.contains(&"rbac:no_match".to_owned()));
	}

	#[test]
	fn scoped_wildcard_allows_documents() {
		let moderator = User::new("m", "mod").with_role("moderator");
		let result = engine(RbacConfig::default()).decide(
			&moderator,
			&AuthResource::document("posts", "9"),
			&Action::from("delete"),
		);
		assert_eq!(result.verdict, Verdict::Allow);
		assert!(result.applied_rules.contains(&"rbac:wildcard:collection:posts:*".to_owned()));
	}

	#[test]
	fn admin_name_overrides_outside_strict_mode() {
		let admin = User::new("a", "adm").with_role("support_admin");
		let result = engine(RbacConfig::default()).decide(
			&admin,
			&AuthResource::database("main"),
			&Action::from("admin"),
		);
		assert_eq!(result.verdict, Verdict::Allow);
		assert!(result.applied_rules.contains(&"rbac:admin_override".to_owned()));
	}

	#[test]
	fn strict_mode_disables_the_override() {
		let mut config = RbacConfig::default();
		config.strict_mode = true;
		let admin = User::new("a", "adm").with_role("support_admin");
		let result = engine(config).decide(
			&admin,
			&AuthResource::database("main"),
			&Action::from("admin"),
		);
		assert_eq!(result.verdict, Verdict::Deny);
	}
}
