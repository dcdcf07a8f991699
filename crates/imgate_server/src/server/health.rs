#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::warn;

use crate::server::registry::Registry;

#[derive(Clone, Debug)]
pub struct HealthState {
	ready: Arc<AtomicBool>,
	registry: Arc<Registry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
	pub online_users: usize,
	pub sessions: usize,
}

impl HealthState {
	pub fn new(registry: Arc<Registry>) -> Self {
		Self {
			ready: Arc::new(AtomicBool::new(false)),
			registry,
		}
	}

	pub fn mark_ready(&self) {
		self.ready.store(true, Ordering::Relaxed);
	}

	pub fn is_ready(&self) -> bool {
		self.ready.load(Ordering::Relaxed)
	}

	pub fn stats(&self) -> Stats {
		Stats {
			online_users: self.registry.online_users(),
			sessions: self.registry.session_count(),
		}
	}
}

pub fn spawn_health_server(bind: SocketAddr, state: HealthState) {
	tokio::spawn(async move {
		if let Err(err) = run_health_server(bind, state).await {
			warn!(error = %err, "health server stopped");
		}
	});
}

async fn run_health_server(bind: SocketAddr, state: HealthState) -> anyhow::Result<()> {
	let listener = TcpListener::bind(bind).await?;
	serve_health(listener, state).await
}

/// Serve health endpoints on an already bound listener.
pub async fn serve_health(listener: TcpListener, state: HealthState) -> anyhow::Result<()> {
	loop {
		let (stream, _addr) = listener.accept().await?;
		let io = TokioIo::new(stream);
		let state = state.clone();
		tokio::spawn(async move {
			let service = service_fn(move |req| handle_health(req, state.clone()));
			if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
				warn!(error = %err, "health connection error");
			}
		});
	}
}

fn respond(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
	let mut resp = Response::new(Full::new(body));
	*resp.status_mut() = status;
	resp
}

async fn handle_health(req: Request<Incoming>, state: HealthState) -> Result<Response<Full<Bytes>>, hyper::Error> {
	if req.method() != Method::GET {
		return Ok(respond(StatusCode::METHOD_NOT_ALLOWED, Bytes::new()));
	}

	let resp = match req.uri().path() {
		"/healthz" => respond(StatusCode::OK, Bytes::from_static(b"ok")),
		"/readyz" => {
			if state.is_ready() {
				respond(StatusCode::OK, Bytes::from_static(b"ready"))
			} else {
				respond(StatusCode::SERVICE_UNAVAILABLE, Bytes::from_static(b"not-ready"))
			}
		}
		"/stats" => match serde_json::to_vec(&state.stats()) {
			Ok(body) => {
				let mut resp = respond(StatusCode::OK, Bytes::from(body));
				resp.headers_mut()
					.insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
				resp
			}
			Err(e) => {
				warn!(error = %e, "failed to serialize stats");
				respond(StatusCode::INTERNAL_SERVER_ERROR, Bytes::new())
			}
		},
		_ => respond(StatusCode::NOT_FOUND, Bytes::new()),
	};

	Ok(resp)
}

#[cfg(test)]
mod tests {
	use super::*;
	use imgate_domain::{NodeId, Principal};

	use crate::server::session::{Session, SessionSettings};

	#[test]
	fn stats_reflect_registry() {
		let registry = Arc::new(Registry::new());
		let state = HealthState::new(Arc::clone(&registry));
		assert!(!state.is_ready());
		assert_eq!(
			state.stats(),
			Stats {
				online_users: 0,
				sessions: 0
			}
		);

		let (s, _rx) = Session::new(
			1,
			Principal::parse("u1", "d1").unwrap(),
			NodeId::new("node-test").unwrap(),
			&SessionSettings::default(),
		);
		registry.bind(s);
		state.mark_ready();

		assert!(state.is_ready());
		assert_eq!(
			state.stats(),
			Stats {
				online_users: 1,
				sessions: 1
			}
		);
		assert_eq!(
			serde_json::to_string(&state.stats()).unwrap(),
			r#"{"online_users":1,"sessions":1}"#
		);
	}
}
