#![forbid(unsafe_code)]

pub mod codec;
pub mod envelope;

pub use codec::{
	CodecError, DEFAULT_MAX_FRAME_SIZE, decode, decode_client, decode_server, encode, encode_client, encode_server,
};

/// Generated protobuf types (`imgate.v1`).
pub mod pb {
	include!(concat!(env!("OUT_DIR"), "/imgate.v1.rs"));
}

impl pb::client_envelope::Payload {
	/// The message type this payload is routed under.
	pub fn message_type(&self) -> pb::MessageType {
		use pb::client_envelope::Payload;

		match self {
			Payload::Echo(_) => pb::MessageType::Echo,
			Payload::CreateGroup(_) => pb::MessageType::CreateGroup,
			Payload::ListGroups(_) => pb::MessageType::ListGroups,
			Payload::SingleMessage(_) => pb::MessageType::SingleMessage,
			Payload::GroupMessage(_) => pb::MessageType::GroupMessage,
		}
	}
}

/// Error codes carried in `pb::Error.code`.
pub mod error_code {
	/// Non-binary data frame.
	pub const BAD_REQUEST: &str = "BAD_REQUEST";
	/// Binary frame that does not decode as a `ClientEnvelope`.
	pub const BAD_PROTO: &str = "BAD_PROTO";
	/// Required request field missing or empty.
	pub const INVALID_ARGUMENT: &str = "INVALID_ARGUMENT";
	/// No handler registered for the requested message type.
	pub const UNKNOWN_TYPE: &str = "UNKNOWN_TYPE";
	/// Untyped envelope whose payload has no fallback route.
	pub const UNSUPPORTED: &str = "UNSUPPORTED";
	/// Message whose delivery envelope would exceed the frame limit.
	pub const MESSAGE_TOO_LARGE: &str = "MESSAGE_TOO_LARGE";
	/// Server-side failure (e.g. response encoding).
	pub const INTERNAL: &str = "INTERNAL";
}
