use std::sync::Arc;

use imgate_domain::GroupId;
use imgate_protocol::pb::{self, client_envelope::Payload};
use imgate_protocol::envelope;
use tracing::debug;

use crate::server::dispatch::{DispatchError, MessageHandler};
use crate::server::group_store::GroupRepository;
use crate::server::metrics::MetricsSink;
use crate::server::registry::Registry;
use crate::server::session::Session;

/// Acks the sender, then delivers to every online session of every group member
/// (the sender's own sessions included).
#[derive(Debug, Clone)]
pub struct GroupMessageHandler {
	registry: Arc<Registry>,
	groups: Arc<dyn GroupRepository>,
	metrics: Arc<dyn MetricsSink>,
}

impl GroupMessageHandler {
	pub fn new(registry: Arc<Registry>, groups: Arc<dyn GroupRepository>, metrics: Arc<dyn MetricsSink>) -> Self {
		Self {
			registry,
			groups,
			metrics,
		}
	}
}

#[async_trait::async_trait]
impl MessageHandler for GroupMessageHandler {
	async fn handle(&self, session: &Arc<Session>, env: &pb::ClientEnvelope) -> Result<(), DispatchError> {
		let Some(Payload::GroupMessage(req)) = &env.payload else {
			return Err(DispatchError::MissingField("group_message"));
		};
		let group = GroupId::new(req.uuid.as_str()).map_err(|_| DispatchError::MissingField("uuid"))?;

		let deliver = envelope::deliver_group(
			&env.trace_id,
			group.as_str(),
			session.user_id().as_str(),
			req.message.clone(),
		);
		let frame = super::encode_delivery(session, &deliver)?;

		super::reply(session, &envelope::ack_ok(&env.trace_id))?;

		let members = self.groups.members(&group);
		if members.is_empty() {
			debug!(trace_id = %env.trace_id, group_id = %group, "group message to empty group");
			return Ok(());
		}

		let mut delivered = 0;
		for member in &members {
			let targets = self.registry.user_sessions(member);
			delivered += super::fan_out(&targets, &frame, self.metrics.as_ref());
		}

		debug!(
			trace_id = %env.trace_id,
			group_id = %group,
			from = %session.user_id(),
			members = members.len(),
			delivered,
			"group message"
		);

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::server::group_store::GroupStore;
	use crate::server::handlers::test_support::{envelope as client_env, next, session, session_with_max_frame};
	use crate::server::metrics::CountingMetrics;
	use imgate_domain::UserId;
	use imgate_protocol::pb::server_envelope;

	fn group_msg(uuid: &str, body: &[u8]) -> Payload {
		Payload::GroupMessage(pb::GroupMessage {
			uuid: uuid.to_string(),
			message: body.to_vec(),
		})
	}

	fn assert_delivery(out: Option<pb::ServerEnvelope>, group: &str, from: &str, body: &[u8]) {
		let out = out.expect("delivery queued");
		match out.payload {
			Some(server_envelope::Payload::DeliverGroupMessage(d)) => {
				assert_eq!(d.group_uuid, group);
				assert_eq!(d.from, from);
				assert_eq!(d.message, body);
			}
			other => panic!("expected DeliverGroupMessage, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn delivers_to_members_only() {
		let registry = Arc::new(Registry::new());
		let groups = Arc::new(GroupStore::new());
		let h = GroupMessageHandler::new(Arc::clone(&registry), groups.clone(), Arc::new(CountingMetrics::new()));

		let (u1, mut u1_rx) = session("u1", "d1");
		let (u2, mut u2_rx) = session("u2", "d1");
		let (u3, mut u3_rx) = session("u3", "d1");
		registry.bind(Arc::clone(&u1));
		registry.bind(u2);
		registry.bind(u3);

		let g1 = GroupId::new("g1").unwrap();
		groups.add_member(g1.clone(), UserId::new("u1").unwrap());
		groups.add_member(g1, UserId::new("u2").unwrap());

		h.handle(&u1, &client_env("t1", group_msg("g1", b"m"))).await.unwrap();

		let ack = next(&mut u1_rx).expect("ack");
		assert!(matches!(ack.payload, Some(server_envelope::Payload::AckResp(_))));
		assert_delivery(next(&mut u1_rx), "g1", "u1", b"m");
		assert_delivery(next(&mut u2_rx), "g1", "u1", b"m");
		assert!(next(&mut u3_rx).is_none());
	}

	/// Repository with fixed membership, standing in for a persistent store.
	#[derive(Debug)]
	struct FixedGroups(Vec<UserId>);

	impl GroupRepository for FixedGroups {
		fn add_member(&self, _group: GroupId, _user: UserId) -> bool {
			false
		}

		fn members(&self, _group: &GroupId) -> Vec<UserId> {
			self.0.clone()
		}
	}

	#[tokio::test]
	async fn members_come_from_the_repository() {
		let registry = Arc::new(Registry::new());
		let repo = Arc::new(FixedGroups(vec![UserId::new("u2").unwrap()]));
		let h = GroupMessageHandler::new(Arc::clone(&registry), repo, Arc::new(CountingMetrics::new()));

		let (u1, mut u1_rx) = session("u1", "d1");
		let (u2, mut u2_rx) = session("u2", "d1");
		registry.bind(Arc::clone(&u1));
		registry.bind(u2);

		h.handle(&u1, &client_env("t1", group_msg("g-remote", b"m"))).await.unwrap();

		assert!(next(&mut u1_rx).is_some());
		assert!(next(&mut u1_rx).is_none());
		assert_delivery(next(&mut u2_rx), "g-remote", "u1", b"m");
	}

	#[tokio::test]
	async fn unknown_group_only_acks() {
		let h = GroupMessageHandler::new(
			Arc::new(Registry::new()),
			Arc::new(GroupStore::new()),
			Arc::new(CountingMetrics::new()),
		);
		let (s, mut rx) = session("u1", "d1");

		h.handle(&s, &client_env("t1", group_msg("nope", b"m"))).await.unwrap();
		assert!(next(&mut rx).is_some());
		assert!(next(&mut rx).is_none());
	}

	#[tokio::test]
	async fn oversize_delivery_is_refused_without_ack() {
		let registry = Arc::new(Registry::new());
		let groups = Arc::new(GroupStore::new());
		let h = GroupMessageHandler::new(Arc::clone(&registry), groups.clone(), Arc::new(CountingMetrics::new()));

		let (u1, mut u1_rx) = session_with_max_frame("u1", "d1", 256);
		let (u2, mut u2_rx) = session("u2", "d1");
		registry.bind(Arc::clone(&u1));
		registry.bind(u2);
		let g1 = GroupId::new("g1").unwrap();
		groups.add_member(g1.clone(), UserId::new("u1").unwrap());
		groups.add_member(g1, UserId::new("u2").unwrap());

		let req = client_env("t1", group_msg("g1", &[7u8; 240]));
		assert!(imgate_protocol::encode_client(&req, 256).is_ok());

		let err = h.handle(&u1, &req).await.unwrap_err();
		assert!(matches!(err, DispatchError::MessageTooLarge { max: 256, .. }));
		assert!(next(&mut u1_rx).is_none());
		assert!(next(&mut u2_rx).is_none());
	}

	#[tokio::test]
	async fn blank_uuid_is_invalid() {
		let h = GroupMessageHandler::new(
			Arc::new(Registry::new()),
			Arc::new(GroupStore::new()),
			Arc::new(CountingMetrics::new()),
		);
		let (s, mut rx) = session("u1", "d1");

		let err = h.handle(&s, &client_env("t1", group_msg(" \t", b"m"))).await.unwrap_err();
		assert!(matches!(err, DispatchError::MissingField("uuid")));
		assert!(next(&mut rx).is_none());
	}

	#[tokio::test]
	async fn empty_uuid_is_invalid() {
		let h = GroupMessageHandler::new(
			Arc::new(Registry::new()),
			Arc::new(GroupStore::new()),
			Arc::new(CountingMetrics::new()),
		);
		let (s, mut rx) = session("u1", "d1");

		let err = h.handle(&s, &client_env("t1", group_msg("", b"m"))).await.unwrap_err();
		assert!(matches!(err, DispatchError::MissingField("uuid")));
		assert!(next(&mut rx).is_none());
	}
}
