use std::sync::Arc;

use imgate_domain::GroupId;
use imgate_protocol::envelope;
use imgate_protocol::pb::{self, MessageType, client_envelope::Payload};
use tracing::debug;

use crate::server::dispatch::{DispatchError, MessageHandler};
use crate::server::group_store::GroupRepository;
use crate::server::session::Session;

/// Handles `CREATE_GROUP` and `LIST_GROUPS`.
#[derive(Debug, Clone)]
pub struct GroupHandler {
	groups: Arc<dyn GroupRepository>,
}

impl GroupHandler {
	pub fn new(groups: Arc<dyn GroupRepository>) -> Self {
		Self { groups }
	}

	fn create_group(&self, session: &Session, env: &pb::ClientEnvelope) -> Result<(), DispatchError> {
		let Some(Payload::CreateGroup(req)) = &env.payload else {
			return Err(DispatchError::MissingField("create_group"));
		};
		let group = GroupId::new(req.uuid.as_str()).map_err(|_| DispatchError::MissingField("uuid"))?;

		let added = self.groups.add_member(group.clone(), session.user_id().clone());
		debug!(group_id = %group, user_id = %session.user_id(), added, "group membership");

		super::reply(session, &envelope::ack_ok(&env.trace_id))
	}

	// Listing belongs to an external group repository; acknowledge only.
	fn list_groups(&self, session: &Session, env: &pb::ClientEnvelope) -> Result<(), DispatchError> {
		super::reply(session, &envelope::ack_ok(&env.trace_id))
	}
}

#[async_trait::async_trait]
impl MessageHandler for GroupHandler {
	async fn handle(&self, session: &Arc<Session>, env: &pb::ClientEnvelope) -> Result<(), DispatchError> {
		match MessageType::try_from(env.r#type) {
			Ok(MessageType::CreateGroup) => self.create_group(session, env),
			Ok(MessageType::ListGroups) => self.list_groups(session, env),
			_ => Err(DispatchError::HandlerNotFound(env.r#type)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::server::group_store::GroupStore;
	use crate::server::handlers::test_support::{envelope as client_env, next, session};
	use imgate_protocol::envelope::ACK_STATUS_OK;
	use imgate_protocol::pb::server_envelope;

	fn assert_ack(out: Option<pb::ServerEnvelope>, trace_id: &str) {
		let out = out.expect("ack queued");
		assert_eq!(out.trace_id, trace_id);
		match out.payload {
			Some(server_envelope::Payload::AckResp(ack)) => {
				assert_eq!(ack.status, ACK_STATUS_OK);
				assert_eq!(ack.message, "ok");
			}
			other => panic!("expected AckResp, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn create_group_adds_caller_and_acks() {
		let store = Arc::new(GroupStore::new());
		let h = GroupHandler::new(store.clone());
		let (s, mut rx) = session("u1", "d1");

		let env = client_env("c1", Payload::CreateGroup(pb::CreateGroup { uuid: "g1".to_string() }));
		h.handle(&s, &env).await.unwrap();

		assert_ack(next(&mut rx), "c1");
		assert_eq!(store.members(&GroupId::new("g1").unwrap()), vec![s.user_id().clone()]);
	}

	#[tokio::test]
	async fn create_group_requires_uuid() {
		let store = Arc::new(GroupStore::new());
		let h = GroupHandler::new(store.clone());
		let (s, mut rx) = session("u1", "d1");

		let env = client_env("c1", Payload::CreateGroup(pb::CreateGroup { uuid: String::new() }));
		let err = h.handle(&s, &env).await.unwrap_err();

		assert!(matches!(err, DispatchError::MissingField("uuid")));
		assert!(next(&mut rx).is_none());
		assert_eq!(store.group_count(), 0);
	}

	#[tokio::test]
	async fn list_groups_acks() {
		let h = GroupHandler::new(Arc::new(GroupStore::new()));
		let (s, mut rx) = session("u1", "d1");

		h.handle(&s, &client_env("l1", Payload::ListGroups(pb::ListGroups {})))
			.await
			.unwrap();
		assert_ack(next(&mut rx), "l1");
	}
}
