use std::sync::Arc;

use imgate_protocol::envelope;
use imgate_protocol::pb::{self, client_envelope::Payload};

use crate::server::dispatch::{DispatchError, MessageHandler};
use crate::server::session::Session;

/// Sends the echo payload back to the requesting session.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

#[async_trait::async_trait]
impl MessageHandler for EchoHandler {
	async fn handle(&self, session: &Arc<Session>, env: &pb::ClientEnvelope) -> Result<(), DispatchError> {
		let Some(Payload::Echo(echo)) = &env.payload else {
			return Err(DispatchError::MissingField("echo"));
		};

		super::reply(session, &envelope::echo(&env.trace_id, echo.message.clone()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::server::handlers::test_support::{envelope as client_env, next, session};
	use imgate_protocol::pb::server_envelope;

	#[tokio::test]
	async fn echoes_bytes_verbatim_with_trace_id() {
		let (s, mut rx) = session("u1", "d1");
		let env = client_env("t-42", Payload::Echo(pb::Echo { message: vec![0, 159, 146, 150] }));

		EchoHandler.handle(&s, &env).await.unwrap();

		let out = next(&mut rx).expect("echo reply");
		assert_eq!(out.trace_id, "t-42");
		match out.payload {
			Some(server_envelope::Payload::Echo(e)) => assert_eq!(e.message, vec![0, 159, 146, 150]),
			other => panic!("expected Echo, got {other:?}"),
		}
		assert!(next(&mut rx).is_none());
	}

	#[tokio::test]
	async fn mismatched_payload_is_rejected() {
		let (s, mut rx) = session("u1", "d1");
		let env = pb::ClientEnvelope {
			trace_id: "t".to_string(),
			r#type: pb::MessageType::Echo as i32,
			payload: None,
		};

		let err = EchoHandler.handle(&s, &env).await.unwrap_err();
		assert!(matches!(err, DispatchError::MissingField("echo")));
		assert!(next(&mut rx).is_none());
	}
}
