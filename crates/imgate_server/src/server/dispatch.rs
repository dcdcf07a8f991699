#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;

use imgate_protocol::pb::{self, MessageType, client_envelope};
use imgate_protocol::{CodecError, error_code};
use thiserror::Error;

use crate::server::group_store::GroupRepository;
use crate::server::handlers::{EchoHandler, GroupHandler, GroupMessageHandler, SingleMessageHandler};
use crate::server::metrics::MetricsSink;
use crate::server::registry::Registry;
use crate::server::session::{Session, SessionError};

#[derive(Debug, Error)]
pub enum DispatchError {
	/// No handler for the type; carries the raw wire value.
	#[error("no handler for message type {}", type_name(*.0))]
	HandlerNotFound(i32),

	#[error("unsupported payload for untyped envelope")]
	UnsupportedPayload,

	#[error("{0} is required")]
	MissingField(&'static str),

	/// The delivery envelope would not fit in one frame.
	#[error("message too large to deliver: {len} bytes exceeds {max}")]
	MessageTooLarge {
		len: usize,
		max: usize,
	},

	#[error(transparent)]
	Codec(#[from] CodecError),

	#[error("reply not delivered: {0}")]
	Session(#[from] SessionError),
}

impl DispatchError {
	/// Code reported to the client in `pb::Error.code`.
	pub fn code(&self) -> &'static str {
		match self {
			DispatchError::HandlerNotFound(_) => error_code::UNKNOWN_TYPE,
			DispatchError::UnsupportedPayload => error_code::UNSUPPORTED,
			DispatchError::MissingField(_) => error_code::INVALID_ARGUMENT,
			DispatchError::MessageTooLarge { .. } => error_code::MESSAGE_TOO_LARGE,
			DispatchError::Codec(_) | DispatchError::Session(_) => error_code::INTERNAL,
		}
	}
}

fn type_name(raw: i32) -> String {
	match MessageType::try_from(raw) {
		Ok(t) => t.as_str_name().to_string(),
		Err(_) => raw.to_string(),
	}
}

#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync + 'static {
	/// Handle one decoded envelope sent by `session`.
	async fn handle(&self, session: &Arc<Session>, env: &pb::ClientEnvelope) -> Result<(), DispatchError>;
}

/// Routes client envelopes to handlers by message type.
#[derive(Default)]
pub struct Dispatcher {
	handlers: HashMap<MessageType, Arc<dyn MessageHandler>>,
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let mut types: Vec<_> = self.handlers.keys().map(|t| t.as_str_name()).collect();
		types.sort_unstable();
		f.debug_struct("Dispatcher").field("handlers", &types).finish()
	}
}

impl Dispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Dispatcher with the built-in echo, group and delivery handlers.
	pub fn with_default_handlers(
		registry: Arc<Registry>,
		groups: Arc<dyn GroupRepository>,
		metrics: Arc<dyn MetricsSink>,
	) -> Self {
		let mut d = Self::new();

		let group = Arc::new(GroupHandler::new(Arc::clone(&groups)));
		d.register_handler(MessageType::Echo, Arc::new(EchoHandler));
		d.register_handler(MessageType::CreateGroup, group.clone());
		d.register_handler(MessageType::ListGroups, group);
		d.register_handler(
			MessageType::SingleMessage,
			Arc::new(SingleMessageHandler::new(Arc::clone(&registry), Arc::clone(&metrics))),
		);
		d.register_handler(
			MessageType::GroupMessage,
			Arc::new(GroupMessageHandler::new(registry, groups, metrics)),
		);

		d
	}

	/// Register `handler` for `ty`, replacing any earlier one.
	pub fn register_handler(&mut self, ty: MessageType, handler: Arc<dyn MessageHandler>) {
		self.handlers.insert(ty, handler);
	}

	pub fn has_handler(&self, ty: MessageType) -> bool {
		self.handlers.contains_key(&ty)
	}

	pub async fn dispatch(&self, session: &Arc<Session>, env: &pb::ClientEnvelope) -> Result<(), DispatchError> {
		let handler = self.route(env)?;
		handler.handle(session, env).await
	}

	fn route(&self, env: &pb::ClientEnvelope) -> Result<&Arc<dyn MessageHandler>, DispatchError> {
		let ty = match MessageType::try_from(env.r#type) {
			Ok(MessageType::Unspecified) => match env.payload {
				// Untyped clients may still send a bare echo.
				Some(client_envelope::Payload::Echo(_)) => MessageType::Echo,
				_ => return Err(DispatchError::UnsupportedPayload),
			},
			Ok(ty) => ty,
			Err(_) => return Err(DispatchError::HandlerNotFound(env.r#type)),
		};

		self.handlers.get(&ty).ok_or(DispatchError::HandlerNotFound(ty as i32))
	}
}
