use std::sync::Arc;

use imgate_domain::UserId;
use imgate_protocol::pb::{self, client_envelope::Payload};
use imgate_protocol::envelope;
use tracing::debug;

use crate::server::dispatch::{DispatchError, MessageHandler};
use crate::server::metrics::MetricsSink;
use crate::server::registry::Registry;
use crate::server::session::Session;

/// Acks the sender, then delivers to every online session of the recipient.
#[derive(Debug, Clone)]
pub struct SingleMessageHandler {
	registry: Arc<Registry>,
	metrics: Arc<dyn MetricsSink>,
}

impl SingleMessageHandler {
	pub fn new(registry: Arc<Registry>, metrics: Arc<dyn MetricsSink>) -> Self {
		Self { registry, metrics }
	}
}

#[async_trait::async_trait]
impl MessageHandler for SingleMessageHandler {
	async fn handle(&self, session: &Arc<Session>, env: &pb::ClientEnvelope) -> Result<(), DispatchError> {
		let Some(Payload::SingleMessage(req)) = &env.payload else {
			return Err(DispatchError::MissingField("single_message"));
		};
		let to = UserId::new(req.to.as_str()).map_err(|_| DispatchError::MissingField("to"))?;

		let deliver = envelope::deliver_single(&env.trace_id, session.user_id().as_str(), req.message.clone());
		let frame = super::encode_delivery(session, &deliver)?;

		super::reply(session, &envelope::ack_ok(&env.trace_id))?;

		let targets = self.registry.user_sessions(&to);
		let delivered = super::fan_out(&targets, &frame, self.metrics.as_ref());
		debug!(
			trace_id = %env.trace_id,
			from = %session.user_id(),
			to = %to,
			targets = targets.len(),
			delivered,
			"single message"
		);

		Ok(())
	}
}
