#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};

use imgate_domain::{GroupId, UserId};
use parking_lot::RwLock;

/// Group membership storage used by the group handlers.
///
/// [`GroupStore`] keeps membership in memory; a persistent repository implements this
/// trait to back the same handlers.
pub trait GroupRepository: Send + Sync + std::fmt::Debug + 'static {
	/// Add `user` to `group`, creating the group on first use.
	/// Returns `false` if the user was already a member.
	fn add_member(&self, group: GroupId, user: UserId) -> bool;

	/// Members of `group`; empty for an unknown group.
	fn members(&self, group: &GroupId) -> Vec<UserId>;
}

/// In-memory group membership. Groups only grow; nothing is persisted.
#[derive(Debug, Default)]
pub struct GroupStore {
	groups: RwLock<HashMap<GroupId, HashSet<UserId>>>,
}

impl GroupStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Add `user` to `group`, creating the group on first use.
	/// Returns `false` if the user was already a member.
	pub fn add_member(&self, group: GroupId, user: UserId) -> bool {
		self.groups.write().entry(group).or_default().insert(user)
	}

	/// Copy of the member list; empty for an unknown group.
	pub fn members(&self, group: &GroupId) -> Vec<UserId> {
		self.groups
			.read()
			.get(group)
			.map(|m| m.iter().cloned().collect())
			.unwrap_or_default()
	}

	pub fn contains(&self, group: &GroupId) -> bool {
		self.groups.read().contains_key(group)
	}

	pub fn group_count(&self) -> usize {
		self.groups.read().len()
	}
}

impl GroupRepository for GroupStore {
	fn add_member(&self, group: GroupId, user: UserId) -> bool {
		GroupStore::add_member(self, group, user)
	}

	fn members(&self, group: &GroupId) -> Vec<UserId> {
		GroupStore::members(self, group)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn g(id: &str) -> GroupId {
		GroupId::new(id).unwrap()
	}

	fn u(id: &str) -> UserId {
		UserId::new(id).unwrap()
	}

	#[test]
	fn first_add_creates_group() {
		let store = GroupStore::new();
		assert!(!store.contains(&g("g1")));

		assert!(store.add_member(g("g1"), u("u1")));
		assert!(store.contains(&g("g1")));
		assert_eq!(store.members(&g("g1")), vec![u("u1")]);
		assert_eq!(store.group_count(), 1);
	}

	#[test]
	fn adding_twice_keeps_one_membership() {
		let store = GroupStore::new();
		assert!(store.add_member(g("g1"), u("u1")));
		assert!(!store.add_member(g("g1"), u("u1")));
		assert!(store.add_member(g("g1"), u("u2")));

		let mut members = store.members(&g("g1"));
		members.sort();
		assert_eq!(members, vec![u("u1"), u("u2")]);
	}

	#[test]
	fn repository_view_shares_state() {
		let store = std::sync::Arc::new(GroupStore::new());
		let repo: std::sync::Arc<dyn GroupRepository> = store.clone();

		assert!(repo.add_member(g("g1"), u("u1")));
		assert!(!repo.add_member(g("g1"), u("u1")));
		assert_eq!(store.members(&g("g1")), vec![u("u1")]);
		assert_eq!(repo.members(&g("g1")), vec![u("u1")]);
	}

	#[test]
	fn unknown_group_has_no_members() {
		let store = GroupStore::new();
		assert!(store.members(&g("nope")).is_empty());
	}
}
