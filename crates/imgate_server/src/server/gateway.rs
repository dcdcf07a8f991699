#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use imgate_domain::{NodeId, Principal};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::auth::{Authenticator, authenticate_header};
use crate::server::connection::{ConnectionContext, run_session};
use crate::server::dispatch::Dispatcher;
use crate::server::group_store::GroupStore;
use crate::server::metrics::MetricsSink;
use crate::server::registry::Registry;
use crate::server::session::{Session, SessionSettings};

/// Gateway-wide options.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
	pub node_id: NodeId,
	/// Request path accepted for upgrades (e.g. `/ws`).
	pub ws_path: String,
	pub session: SessionSettings,
}

impl Default for GatewayOptions {
	fn default() -> Self {
		Self {
			node_id: NodeId::generate(),
			ws_path: imgate_util::endpoint::DEFAULT_WS_PATH.to_string(),
			session: SessionSettings::default(),
		}
	}
}

/// Accepts WebSocket upgrades, authenticates them, and runs one session per connection.
#[derive(Debug, Clone)]
pub struct Gateway {
	inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
	opts: GatewayOptions,
	authenticator: Arc<dyn Authenticator>,
	groups: Arc<GroupStore>,
	ctx: Arc<ConnectionContext>,
	next_conn_id: AtomicU64,
}

impl Gateway {
	/// Gateway with a fresh registry, group store and the default handlers.
	pub fn new(opts: GatewayOptions, authenticator: Arc<dyn Authenticator>, metrics: Arc<dyn MetricsSink>) -> Self {
		let registry = Arc::new(Registry::new());
		let groups = Arc::new(GroupStore::new());
		let dispatcher =
			Dispatcher::with_default_handlers(Arc::clone(&registry), groups.clone(), Arc::clone(&metrics));

		Self::with_parts(opts, authenticator, metrics, registry, groups, dispatcher)
	}

	pub fn with_parts(
		opts: GatewayOptions,
		authenticator: Arc<dyn Authenticator>,
		metrics: Arc<dyn MetricsSink>,
		registry: Arc<Registry>,
		groups: Arc<GroupStore>,
		dispatcher: Dispatcher,
	) -> Self {
		let ctx = Arc::new(ConnectionContext {
			registry,
			dispatcher: Arc::new(dispatcher),
			metrics,
			settings: opts.session.clone(),
		});

		Self {
			inner: Arc::new(Inner {
				opts,
				authenticator,
				groups,
				ctx,
				next_conn_id: AtomicU64::new(1),
			}),
		}
	}

	pub fn registry(&self) -> &Arc<Registry> {
		&self.inner.ctx.registry
	}

	pub fn groups(&self) -> &Arc<GroupStore> {
		&self.inner.groups
	}

	pub fn options(&self) -> &GatewayOptions {
		&self.inner.opts
	}

	/// Accept connections until `shutdown` is cancelled; open sessions are closed with it.
	pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> anyhow::Result<()> {
		let local = listener.local_addr()?;
		info!(
			addr = %local,
			path = %self.inner.opts.ws_path,
			node_id = %self.inner.opts.node_id,
			"gateway listening"
		);

		loop {
			let (stream, peer) = tokio::select! {
				_ = shutdown.cancelled() => break,
				accepted = listener.accept() => match accepted {
					Ok(v) => v,
					Err(e) => {
						warn!(error = %e, "accept failed");
						continue;
					}
				},
			};

			let gateway = self.clone();
			let shutdown = shutdown.clone();
			tokio::spawn(async move {
				gateway.handle_stream(stream, peer, shutdown).await;
			});
		}

		info!("gateway stopped accepting");
		Ok(())
	}

	async fn handle_stream(&self, stream: TcpStream, peer: SocketAddr, shutdown: CancellationToken) {
		let _ = stream.set_nodelay(true);

		let inner = &self.inner;
		let mut principal: Option<Principal> = None;

		let callback = |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
			if req.uri().path() != inner.opts.ws_path {
				debug!(%peer, path = req.uri().path(), "upgrade to unknown path");
				return Err(reject(StatusCode::NOT_FOUND, "not found"));
			}

			let header = req.headers().get("authorization").and_then(|v| v.to_str().ok());

			match authenticate_header(inner.authenticator.as_ref(), header) {
				Ok(p) => {
					principal = Some(p);
					Ok(response)
				}
				Err(e) => {
					inner.ctx.metrics.auth_rejected();
					warn!(%peer, error = %e, "upgrade rejected");
					Err(reject(StatusCode::UNAUTHORIZED, "unauthorized"))
				}
			}
		};

		let max = inner.opts.session.max_frame_bytes;
		let ws_config = WebSocketConfig::default()
			.max_message_size(Some(max))
			.max_frame_size(Some(max));

		let ws = match tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config)).await {
			Ok(ws) => ws,
			Err(e) => {
				debug!(%peer, error = %e, "websocket handshake failed");
				return;
			}
		};

		let Some(principal) = principal else {
			warn!(%peer, "handshake completed without a principal");
			return;
		};

		let conn_id = inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
		let (session, rx) = Session::new(conn_id, principal, inner.opts.node_id.clone(), &inner.opts.session);
		info!(conn_id, %peer, user_id = %session.user_id(), device_id = %session.device_id(), "accepted connection");

		let watcher = {
			let session = Arc::clone(&session);
			tokio::spawn(async move {
				shutdown.cancelled().await;
				session.close();
			})
		};

		run_session(ws, session, rx, Arc::clone(&inner.ctx)).await;
		watcher.abort();
	}
}

fn reject(status: StatusCode, body: &str) -> ErrorResponse {
	let mut resp = ErrorResponse::new(Some(body.to_string()));
	*resp.status_mut() = status;
	resp
}
