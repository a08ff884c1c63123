use crate::iam::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// A single grant: an action on a resource pattern
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Permission {
	/// The resource pattern, exact or wildcard
	pub resource: String,
	/// The permitted action, or `*`
	pub action: String,
	/// An optional scope qualifier
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<String>,
	/// Optional dynamic conditions attached to the grant
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub conditions: Option<Value>,
}

impl Permission {
	pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
		Self {
			resource: resource.into(),
			action: action.into(),
			scope: None,
			conditions: None,
		}
	}

	pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());
		self
	}
}

/// A named role with parents and permissions
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Role {
	/// The unique id of this role
	pub id: String,
	/// The role name, unique within the store
	pub name: String,
	/// The parent role names, in grant order
	#[serde(default)]
	pub parents: Vec<String>,
	/// The directly attached permissions
	#[serde(default)]
	pub permissions: Vec<Permission>,
	/// Whether this role is built in and undeletable
	#[serde(default)]
	pub system: bool,
}

impl Role {
	pub fn new(name: impl Into<String>) -> Self {
		let name = name.into();
		Self {
			id: name.clone(),
			name,
			parents: Vec::new(),
			permissions: Vec::new(),
			system: false,
		}
	}

	pub fn with_permission(mut self, permission: Permission) -> Self {
		self.permissions.push(permission);
		self
	}

	pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
		self.parents.push(parent.into());
		self
	}

	pub fn system(mut self) -> Self {
		self.system = true;
		self
	}
}

/// The registry of roles and their hierarchy
///
/// The hierarchy must stay acyclic: a role may never be, transitively,
/// its own ancestor.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct RoleStore {
	roles: HashMap<String, Role>,
}

impl RoleStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a role
	pub fn register(&mut self, role: Role) -> Result<(), Error> {
		if self.roles.contains_key(&role.name) {
			return Err(Error::RoleExists(role.name));
		}
		// Parents must already be registered
		for parent in role.parents.clone() {
			if !self.roles.contains_key(&parent) {
				return Err(Error::RoleNotFound(parent));
			}
		}
		debug!("Registered role '{}'", role.name);
		self.roles.insert(role.name.clone(), role);
		Ok(())
	}

	/// Fetch a role by name
	pub fn get(&self, name: &str) -> Option<&Role> {
		self.roles.get(name)
	}

	/// Remove a role
	///
	/// System roles are protected and fail with `RoleProtected`; the
	/// removed role is detached from every child that inherited from it.
	pub fn remove(&mut self, name: &str) -> Result<(), Error> {
		match self.roles.get(name) {
			None => return Err(Error::RoleNotFound(name.to_owned())),
			Some(role) if role.system => return Err(Error::RoleProtected(name.to_owned())),
			Some(_) => {}
		}
		self.roles.remove(name);
		for role in self.roles.values_mut() {
			role.parents.retain(|p| p != name);
		}
		Ok(())
	}

	/// The registered role names
	pub fn names(&self) -> Vec<String> {
		self.roles.keys().cloned().collect()
	}

	/// Add a parent to a role, rejecting hierarchy cycles
	pub fn add_parent_role(&mut self, role: &str, parent: &str) -> Result<(), Error> {
		if !self.roles.contains_key(parent) {
			return Err(Error::RoleNotFound(parent.to_owned()));
		}
		// Walking up from the parent must never reach the child
		if role == parent || self.is_ancestor(role, parent) {
			return Err(Error::HierarchyCycle {
				role: role.to_owned(),
				parent: parent.to_owned(),
			});
		}
		let entry = self.roles.get_mut(role).ok_or_else(|| Error::RoleNotFound(role.to_owned()))?;
		if !entry.parents.iter().any(|p| p == parent) {
			entry.parents.push(parent.to_owned());
		}
		Ok(())
	}

	/// Remove a parent from a role
	pub fn remove_parent_role(&mut self, role: &str, parent: &str) -> Result<(), Error> {
		let entry = self.roles.get_mut(role).ok_or_else(|| Error::RoleNotFound(role.to_owned()))?;
		entry.parents.retain(|p| p != parent);
		Ok(())
	}

	/// Check whether `ancestor` is reachable walking up from `role`
	fn is_ancestor(&self, ancestor: &str, role: &str) -> bool {
		let mut visited = HashSet::new();
		let mut queue = vec![role.to_owned()];
		while let Some(current) = queue.pop() {
			if !visited.insert(current.clone()) {
				continue;
			}
			let Some(entry) = self.roles.get(&current) else {
				continue;
			};
			for parent in &entry.parents {
				if parent == ancestor {
					return true;
				}
				queue.push(parent.clone());
			}
		}
		false
	}

	/// The effective permission set of a list of granted roles
	///
	/// Walks the parent hierarchy with a visited set, so an accidental
	/// cycle in stored data degenerates to a finite walk instead of
	/// recursing forever.
	pub fn effective_permissions(&self, roles: &[String], inherit: bool) -> Vec<Permission> {
		let mut permissions = Vec::new();
		let mut visited = HashSet::new();
		let mut queue: Vec<String> = roles.to_vec();
		while let Some(name) = queue.pop() {
			if !visited.insert(name.clone()) {
				continue;
			}
			let Some(role) = self.roles.get(&name) else {
				continue;
			};
			for p in &role.permissions {
				if !permissions.contains(p) {
					permissions.push(p.clone());
				}
			}
			if inherit {
				queue.extend(role.parents.iter().cloned());
			}
		}
		permissions
	}

	/// A predefined permission template
	///
	/// Templates seed common roles without spelling out each grant.
	pub fn template(name: &str) -> Option<Vec<Permission>> {
		match name {
			"reader" => Some(vec![Permission::new("*", "read")]),
			"editor" => Some(vec![
				Permission::new("*", "read"),
				Permission::new("*", "write"),
				Permission::new("*", "update"),
			]),
			"administrator" => Some(vec![Permission::new("*", "*")]),
			_ => None,
		}
	}

	/// Register a role seeded from a permission template
	pub fn register_from_template(&mut self, role: &str, template: &str) -> Result<(), Error> {
		let permissions = Self::template(template)
			.ok_or_else(|| Error::InvalidRule(format!("unknown template '{template}'")))?;
		let mut new_role = Role::new(role);
		new_role.permissions = permissions;
		self.register(new_role)
	}

	/// Grant a set of roles to many users at once
	///
	/// Every role must exist before any user is touched, so a bad grant
	/// list changes nothing.
	pub fn assign_roles(
		&self,
		users: &mut [super::User],
		roles: &[String],
	) -> Result<(), Error> {
		for role in roles {
			if !self.roles.contains_key(role) {
				return Err(Error::RoleNotFound(role.clone()));
			}
		}
		for user in users {
			for role in roles {
				if !user.roles.contains(role) {
					user.roles.push(role.clone());
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::iam::entities::User;

	fn store() -> RoleStore {
		let mut store = RoleStore::new();
		store
			.register(Role::new("viewer").with_permission(Permission::new("collection:posts", "read")))
			.unwrap();
		store
			.register(
				Role::new("editor")
					.with_parent("viewer")
					.with_permission(Permission::new("collection:posts", "write")),
			)
			.unwrap();
		store
	}

	#[test]
	fn effective_permissions_walk_parents() {
		let store = store();
		let perms = store.effective_permissions(&["editor".to_owned()], true);
		assert_eq!(perms.len(), 2);
		let perms = store.effective_permissions(&["editor".to_owned()], false);
		assert_eq!(perms.len(), 1);
	}

	#[test]
	fn cycles_are_rejected() {
		let mut store = store();
		let err = store.add_parent_role("viewer", "editor").unwrap_err();
		assert!(matches!(err, Error::HierarchyCycle { .. }));
		let err = store.add_parent_role("viewer", "viewer").unwrap_err();
		assert!(matches!(err, Error::HierarchyCycle { .. }));
	}

	#[test]
	fn deep_cycles_are_rejected() {
		let mut store = store();
		store.register(Role::new("lead").with_parent("editor")).unwrap();
		// viewer <- editor <- lead, so viewer can not inherit lead
		let err = store.add_parent_role("viewer", "lead").unwrap_err();
		assert!(matches!(err, Error::HierarchyCycle { .. }));
	}

	#[test]
	fn stored_cycle_degenerates_to_finite_walk() {
		let mut store = store();
		// Bypass the guard to simulate corrupted stored data
		store.roles.get_mut("viewer").unwrap().parents.push("editor".to_owned());
		let perms = store.effective_permissions(&["viewer".to_owned()], true);
		assert_eq!(perms.len(), 2);
	}

	#[test]
	fn system_roles_are_protected() {
		let mut store = RoleStore::new();
		store.register(Role::new("root").system()).unwrap();
		assert!(matches!(store.remove("root"), Err(Error::RoleProtected(_))));
	}

	#[test]
	fn removal_detaches_children() {
		let mut store = store();
		store.remove("viewer").unwrap();
		assert!(store.get("editor").unwrap().parents.is_empty());
	}

	#[test]
	fn templates_seed_roles() {
		let mut store = RoleStore::new();
		store.register_from_template("ops", "administrator").unwrap();
		let perms = store.effective_permissions(&["ops".to_owned()], true);
		assert_eq!(perms, vec![Permission::new("*", "*")]);
		assert!(store.register_from_template("x", "nope").is_err());
	}

	#[test]
	fn bulk_assignment_is_all_or_nothing() {
		let store = store();
		let mut users = vec![User::new("u1", "one"), User::new("u2", "two")];
		let err = store
			.assign_roles(&mut users, &["viewer".to_owned(), "missing".to_owned()])
			.unwrap_err();
		assert!(matches!(err, Error::RoleNotFound(_)));
		assert!(users[0].roles.is_empty());
		store.assign_roles(&mut users, &["viewer".to_owned()]).unwrap();
		assert_eq!(users[1].roles, vec!["viewer".to_owned()]);
	}
}
