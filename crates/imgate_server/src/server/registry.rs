#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use imgate_domain::{DeviceId, UserId};
use parking_lot::Mutex;
use tracing::debug;

use crate::server::session::Session;

/// Reachable sessions keyed by `user -> device`.
///
/// Binding the same `(user, device)` twice replaces the earlier session. A user entry
/// disappears together with its last device. Lookups hand out owned snapshots, so
/// callers may send to sessions without holding the lock.
#[derive(Debug, Default)]
pub struct Registry {
	inner: Mutex<HashMap<UserId, HashMap<DeviceId, Arc<Session>>>>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Insert or replace the session for its `(user, device)`; returns the replaced one.
	pub fn bind(&self, session: Arc<Session>) -> Option<Arc<Session>> {
		let user = session.user_id().clone();
		let device = session.device_id().clone();

		let prev = {
			let mut inner = self.inner.lock();
			inner.entry(user.clone()).or_default().insert(device.clone(), session)
		};

		if let Some(prev) = &prev {
			debug!(user_id = %user, device_id = %device, replaced_conn_id = prev.id(), "registry: session replaced");
		}

		prev
	}

	/// Remove the `(user, device)` mapping, whatever session it points at.
	pub fn unbind(&self, user: &UserId, device: &DeviceId) -> Option<Arc<Session>> {
		let mut inner = self.inner.lock();
		let devices = inner.get_mut(user)?;
		let removed = devices.remove(device);

		if devices.is_empty() {
			inner.remove(user);
		}

		removed
	}

	/// Remove the mapping only if it still points at `session`.
	pub fn unbind_session(&self, session: &Session) -> bool {
		let mut inner = self.inner.lock();
		let Some(devices) = inner.get_mut(session.user_id()) else {
			return false;
		};

		let same = devices
			.get(session.device_id())
			.map(|s| s.id() == session.id())
			.unwrap_or(false);

		if !same {
			return false;
		}

		devices.remove(session.device_id());
		if devices.is_empty() {
			inner.remove(session.user_id());
		}

		true
	}

	/// Snapshot of every session currently bound for `user`.
	pub fn user_sessions(&self, user: &UserId) -> Vec<Arc<Session>> {
		let inner = self.inner.lock();
		inner
			.get(user)
			.map(|devices| devices.values().cloned().collect())
			.unwrap_or_default()
	}

	pub fn online_users(&self) -> usize {
		self.inner.lock().len()
	}

	pub fn session_count(&self) -> usize {
		self.inner.lock().values().map(HashMap::len).sum()
	}
}
