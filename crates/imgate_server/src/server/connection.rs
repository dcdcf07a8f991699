#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use imgate_protocol::{decode_client, encode_server, envelope, error_code};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior, timeout, timeout_at};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use crate::server::dispatch::Dispatcher;
use crate::server::metrics::MetricsSink;
use crate::server::registry::Registry;
use crate::server::session::{MAX_SESSION_TIMER, Session, SessionSettings};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Shared collaborators handed to every connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
	pub registry: Arc<Registry>,
	pub dispatcher: Arc<Dispatcher>,
	pub metrics: Arc<dyn MetricsSink>,
	pub settings: SessionSettings,
}

struct ConnectionGaugeGuard(Arc<dyn MetricsSink>);

impl Drop for ConnectionGaugeGuard {
	fn drop(&mut self) {
		self.0.connection_closed();
	}
}

/// Drive one upgraded connection until either side gives up.
///
/// The session is bound before the first frame is read and unbound (only if still
/// current) after both the read and write loops have finished.
#[instrument(
	skip_all,
	fields(conn_id = session.id(), user_id = %session.user_id(), device_id = %session.device_id())
)]
pub async fn run_session(
	ws: WebSocketStream<TcpStream>,
	session: Arc<Session>,
	rx: mpsc::Receiver<Bytes>,
	ctx: Arc<ConnectionContext>,
) {
	ctx.metrics.connection_opened();
	let _gauge = ConnectionGaugeGuard(Arc::clone(&ctx.metrics));

	if let Some(prev) = ctx.registry.bind(Arc::clone(&session)) {
		info!(replaced_conn_id = prev.id(), "device reconnected; previous session no longer routable");
	}
	info!(node_id = %session.node_id(), "session bound");

	let (sink, stream) = ws.split();

	let writer = tokio::spawn(write_loop(
		sink,
		rx,
		Arc::clone(&session),
		ctx.settings.clone(),
		Arc::clone(&ctx.metrics),
	));

	read_loop(stream, &session, &ctx).await;

	session.cancel_token().cancel();
	if let Err(e) = writer.await {
		warn!(error = %e, "write loop panicked");
	}

	session.close();
	let unbound = ctx.registry.unbind_session(&session);
	info!(unbound, "session closed");
}

async fn read_loop(mut stream: WsStream, session: &Arc<Session>, ctx: &ConnectionContext) {
	let cancel = session.cancel_token().clone();
	let pong_wait = ctx.settings.pong_wait;
	let mut deadline = deadline_after(pong_wait);

	loop {
		let next = tokio::select! {
			_ = cancel.cancelled() => {
				debug!("read loop cancelled");
				return;
			}
			next = timeout_at(deadline, stream.next()) => next,
		};

		let msg = match next {
			Err(_) => {
				info!(pong_wait_ms = pong_wait.as_millis() as u64, "read deadline expired");
				return;
			}
			Ok(None) => {
				debug!("peer closed stream");
				return;
			}
			Ok(Some(Err(e))) => {
				debug!(error = %e, "read error");
				return;
			}
			Ok(Some(Ok(msg))) => msg,
		};

		match msg {
			Message::Binary(data) => {
				ctx.metrics.frame_read();
				handle_binary(session, &data, ctx).await;
			}
			Message::Text(_) => {
				ctx.metrics.frame_read();
				send_error(session, "", error_code::BAD_REQUEST, "binary frames only");
			}
			Message::Pong(_) => {
				deadline = deadline_after(pong_wait);
			}
			Message::Ping(_) | Message::Frame(_) => {}
			Message::Close(frame) => {
				debug!(?frame, "close frame received");
				return;
			}
		}
	}
}

fn deadline_after(d: Duration) -> Instant {
	Instant::now() + d.min(MAX_SESSION_TIMER)
}

async fn handle_binary(session: &Arc<Session>, data: &[u8], ctx: &ConnectionContext) {
	let env = match decode_client(data, ctx.settings.max_frame_bytes) {
		Ok(env) => env,
		Err(e) => {
			ctx.metrics.protocol_error();
			debug!(error = %e, len = data.len(), "undecodable frame");
			send_error(session, "", error_code::BAD_PROTO, "Protocol error");
			return;
		}
	};

	debug!(trace_id = %env.trace_id, msg_type = env.r#type, "envelope received");

	if let Err(e) = ctx.dispatcher.dispatch(session, &env).await {
		debug!(trace_id = %env.trace_id, error = %e, code = e.code(), "dispatch failed");
		send_error(session, &env.trace_id, e.code(), e.to_string());
	}
}

fn send_error(session: &Session, trace_id: &str, code: &str, message: impl Into<String>) {
	let env = envelope::error(trace_id, code, message);
	let frame = match encode_server(&env, session.max_frame_bytes()) {
		Ok(frame) => frame,
		Err(e) => {
			warn!(error = %e, "failed to encode error envelope");
			return;
		}
	};

	if let Err(e) = session.send(frame) {
		debug!(error = %e, code, "error envelope not queued");
	}
}

async fn write_loop(
	mut sink: WsSink,
	mut rx: mpsc::Receiver<Bytes>,
	session: Arc<Session>,
	settings: SessionSettings,
	metrics: Arc<dyn MetricsSink>,
) {
	let cancel = session.cancel_token().clone();
	let write_timeout = settings.write_timeout;

	let heartbeat = settings
		.heartbeat_interval
		.clamp(Duration::from_millis(1), MAX_SESSION_TIMER);
	let mut ping = tokio::time::interval_at(deadline_after(heartbeat), heartbeat);
	ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		let msg = tokio::select! {
			_ = cancel.cancelled() => break,
			_ = ping.tick() => Message::Ping(Bytes::new()),
			frame = rx.recv() => match frame {
				Some(frame) => Message::Binary(frame),
				None => break,
			},
		};

		let is_data = matches!(msg, Message::Binary(_));
		match timeout(write_timeout, sink.send(msg)).await {
			Ok(Ok(())) => {
				if is_data {
					metrics.frame_sent();
				}
			}
			Ok(Err(e)) => {
				debug!(error = %e, "write failed");
				break;
			}
			Err(_) => {
				info!(write_timeout_ms = write_timeout.as_millis() as u64, "write timed out");
				break;
			}
		}
	}

	cancel.cancel();
	drop(rx);

	let _ = timeout(write_timeout, sink.send(Message::Close(None))).await;
	let _ = timeout(write_timeout, sink.close()).await;
}
