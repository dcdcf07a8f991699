#![forbid(unsafe_code)]

use bytes::{Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::pb;

/// Default maximum envelope size carried by one binary frame.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

#[derive(Debug, Error)]
pub enum CodecError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge {
		len: usize,
		max: usize,
	},

	#[error("protobuf decode error: {0}")]
	Decode(#[from] prost::DecodeError),

	#[error("protobuf encode error: {0}")]
	Encode(#[from] prost::EncodeError),
}

/// Encode a message into one frame payload.
pub fn encode<M: Message>(msg: &M, max_frame_size: usize) -> Result<Bytes, CodecError> {
	let len = msg.encoded_len();
	if len > max_frame_size {
		return Err(CodecError::FrameTooLarge {
			len,
			max: max_frame_size,
		});
	}

	let mut buf = BytesMut::with_capacity(len);
	msg.encode(&mut buf)?;
	Ok(buf.freeze())
}

/// Decode one frame payload.
pub fn decode<M: Message + Default>(src: &[u8], max_frame_size: usize) -> Result<M, CodecError> {
	if src.len() > max_frame_size {
		return Err(CodecError::FrameTooLarge {
			len: src.len(),
			max: max_frame_size,
		});
	}

	Ok(M::decode(src)?)
}

pub fn decode_client(src: &[u8], max_frame_size: usize) -> Result<pb::ClientEnvelope, CodecError> {
	decode(src, max_frame_size)
}

pub fn decode_server(src: &[u8], max_frame_size: usize) -> Result<pb::ServerEnvelope, CodecError> {
	decode(src, max_frame_size)
}

pub fn encode_client(env: &pb::ClientEnvelope, max_frame_size: usize) -> Result<Bytes, CodecError> {
	encode(env, max_frame_size)
}

pub fn encode_server(env: &pb::ServerEnvelope, max_frame_size: usize) -> Result<Bytes, CodecError> {
	encode(env, max_frame_size)
}
