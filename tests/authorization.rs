use docbase_core::iam::audit::{AuditCategory, AuditFilter, AuditLogger};
use docbase_core::iam::entities::{Permission, Role};
use docbase_core::iam::rules::{Rule, RuleKind, RuleScope};
use docbase_core::iam::{
	Action, AuthConfig, AuthManager, AuthResource, Context, User,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn manager() -> AuthManager {
	let manager = AuthManager::new(AuthConfig::default());
	{
		let roles = manager.roles();
		let mut store = roles.write();
		store
			.register(Role::new("user").with_permission(Permission::new("*", "read")))
			.unwrap();
	}
	manager
}

#[test]
fn deny_by_default_names_the_denying_engine() {
	let manager = manager();
	// RBAC allows reads everywhere, but the attribute engine refuses the
	// sensitive collection for a user without a high access level
	let user = User::new("u1", "one").with_role("user");
	let decision = manager.check_permission(
		&user,
		&AuthResource::collection("admin-panel"),
		&Action::from("read"),
		&Context::new(),
	);
	assert!(!decision.allowed);
	assert_eq!(decision.metadata["denyingEngine"], Value::from("abac"));

	// The same user reads an ordinary collection without friction
	let decision = manager.check_permission(
		&user,
		&AuthResource::collection("posts"),
		&Action::from("read"),
		&Context::new(),
	);
	assert!(decision.allowed);
}

#[test]
fn admin_override_bypasses_the_engines() {
	let manager = manager();
	let admin = User::new("root", "root").with_role("system:super_admin");
	let decision = manager.check_permission(
		&admin,
		&AuthResource::database("restricted"),
		&Action::from("admin"),
		&Context::new(),
	);
	assert!(decision.allowed);
	assert!(decision.applied_rules.contains(&"policy:admin_override".to_owned()));
}

#[test]
fn dynamic_rules_participate_with_priority() {
	let manager = manager();
	manager
		.add_dynamic_rule(
			Rule::new(
				"night-freeze",
				"freeze writes at night",
				RuleKind::Deny,
				RuleScope::new(vec!["*".to_owned()], vec!["read".to_owned()]),
				|input| Ok(input.context.attributes.get("night") == Some(&json!(true))),
			)
			.with_priority(100),
		)
		.unwrap();
	let user = User::new("u1", "one").with_role("user");
	let night = Context::new().with_attribute("night", json!(true));
	let decision = manager.check_permission(
		&user,
		&AuthResource::collection("posts"),
		&Action::from("read"),
		&night,
	);
	assert!(!decision.allowed);
	assert!(decision.applied_rules.contains(&"rule:night-freeze".to_owned()));

	// The cache key does not include context, so drop the cached deny
	manager.clear_permission_cache();
	let day = Context::new();
	let decision = manager.check_permission(
		&user,
		&AuthResource::collection("posts"),
		&Action::from("read"),
		&day,
	);
	assert!(decision.allowed);
}

#[test]
fn cache_stats_accumulate() {
	let manager = manager();
	let user = User::new("u1", "one").with_role("user");
	let resource = AuthResource::collection("posts");
	for _ in 0..3 {
		let _ = manager.check_permission(&user, &resource, &Action::from("read"), &Context::new());
	}
	let stats = manager.permission_cache_stats();
	assert_eq!(stats.misses, 1);
	assert_eq!(stats.hits, 2);
	assert!(stats.hit_rate > 0.6);
}

#[tokio::test]
async fn decisions_are_audited() {
	let audit = Arc::new(AuditLogger::new());
	let rx = audit.subscribe(AuditFilter::new().category(AuditCategory::Authorization));
	let manager = manager().with_audit(audit);
	let user = User::new("u1", "one").with_role("user");
	let _ = manager.check_permission(
		&user,
		&AuthResource::collection("posts"),
		&Action::from("read"),
		&Context::new(),
	);
	let event = rx.recv().await.unwrap();
	assert_eq!(event.action, "read");
	assert_eq!(event.user.as_deref(), Some("u1"));
}
