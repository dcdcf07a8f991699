//! Builders for server envelopes.

use crate::pb;
use crate::pb::server_envelope::Payload;

/// `AckResp.status` for a successful request.
pub const ACK_STATUS_OK: i32 = 0;

fn server(trace_id: &str, payload: Payload) -> pb::ServerEnvelope {
	pb::ServerEnvelope {
		trace_id: trace_id.to_string(),
		payload: Some(payload),
	}
}

pub fn ack_ok(trace_id: &str) -> pb::ServerEnvelope {
	server(
		trace_id,
		Payload::AckResp(pb::AckResp {
			status: ACK_STATUS_OK,
			message: "ok".to_string(),
		}),
	)
}

pub fn error(trace_id: &str, code: &str, message: impl Into<String>) -> pb::ServerEnvelope {
	server(
		trace_id,
		Payload::Error(pb::Error {
			code: code.to_string(),
			message: message.into(),
		}),
	)
}

pub fn echo(trace_id: &str, message: Vec<u8>) -> pb::ServerEnvelope {
	server(trace_id, Payload::Echo(pb::Echo { message }))
}

pub fn deliver_single(trace_id: &str, from: &str, message: Vec<u8>) -> pb::ServerEnvelope {
	server(
		trace_id,
		Payload::DeliverSingleMessage(pb::DeliverSingleMessage {
			from: from.to_string(),
			message,
		}),
	)
}

pub fn deliver_group(trace_id: &str, group_uuid: &str, from: &str, message: Vec<u8>) -> pb::ServerEnvelope {
	server(
		trace_id,
		Payload::DeliverGroupMessage(pb::DeliverGroupMessage {
			group_uuid: group_uuid.to_string(),
			from: from.to_string(),
			message,
		}),
	)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ack_carries_trace_id_and_ok_status() {
		let env = ack_ok("abc");
		assert_eq!(env.trace_id, "abc");
		match env.payload {
			Some(Payload::AckResp(ack)) => {
				assert_eq!(ack.status, ACK_STATUS_OK);
				assert_eq!(ack.message, "ok");
			}
			other => panic!("expected AckResp, got {other:?}"),
		}
	}

	#[test]
	fn error_sets_code_and_message() {
		let env = error("", crate::error_code::BAD_PROTO, "Protocol error");
		match env.payload {
			Some(Payload::Error(e)) => {
				assert_eq!(e.code, "BAD_PROTO");
				assert_eq!(e.message, "Protocol error");
			}
			other => panic!("expected Error, got {other:?}"),
		}
	}
}
