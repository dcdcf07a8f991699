#![forbid(unsafe_code)]

mod echo;
mod group;
mod group_message;
mod single_message;

use std::sync::Arc;

use bytes::Bytes;
use imgate_protocol::{CodecError, encode_server, pb};
use tracing::debug;

use crate::server::dispatch::DispatchError;
use crate::server::metrics::MetricsSink;
use crate::server::session::Session;

pub use echo::EchoHandler;
pub use group::GroupHandler;
pub use group_message::GroupMessageHandler;
pub use single_message::SingleMessageHandler;

/// Encode `env` and enqueue it on the requesting session.
pub(crate) fn reply(session: &Session, env: &pb::ServerEnvelope) -> Result<(), DispatchError> {
	let frame = encode_server(env, session.max_frame_bytes())?;
	session.send(frame)?;
	Ok(())
}

/// Encode a delivery envelope with the sender's frame limit.
///
/// Called before the sender is acked: an oversize delivery is refused, never acked and lost.
pub(crate) fn encode_delivery(session: &Session, env: &pb::ServerEnvelope) -> Result<Bytes, DispatchError> {
	encode_server(env, session.max_frame_bytes()).map_err(|e| match e {
		CodecError::FrameTooLarge { len, max } => DispatchError::MessageTooLarge { len, max },
		other => DispatchError::Codec(other),
	})
}

/// Best-effort delivery of one encoded frame; returns how many sessions accepted it.
pub(crate) fn fan_out(targets: &[Arc<Session>], frame: &Bytes, metrics: &dyn MetricsSink) -> usize {
	let mut delivered = 0;
	for target in targets {
		match target.send(frame.clone()) {
			Ok(()) => delivered += 1,
			Err(e) => {
				metrics.delivery_dropped();
				debug!(
					conn_id = target.id(),
					user_id = %target.user_id(),
					device_id = %target.device_id(),
					error = %e,
					"delivery dropped"
				);
			}
		}
	}
	delivered
}
