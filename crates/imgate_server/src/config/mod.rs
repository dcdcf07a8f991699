#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use imgate_domain::{NodeId, SecretString};
use imgate_util::endpoint::WsEndpoint;
use serde::Deserialize;
use tracing::{info, warn};

use crate::server::session::{MAX_SESSION_TIMER, SessionSettings};

/// Default bind endpoint.
pub const DEFAULT_BIND: &str = "ws://127.0.0.1:18080/ws";

/// Default config path: `~/.imgate/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".imgate").join("config.toml"))
}

/// Load the server config from TOML and `IMGATE_*` env overrides.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg)?;
	apply_overrides(&mut cfg, |key| std::env::var(key).ok())?;
	cfg.normalize();

	Ok(cfg)
}

/// Parse a TOML document without consulting the environment.
pub fn parse_server_config(toml_src: &str) -> anyhow::Result<ServerConfig> {
	let file_cfg: FileConfig = toml::from_str(toml_src).context("parse TOML")?;
	let mut cfg = ServerConfig::from_file(file_cfg)?;
	cfg.normalize();
	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub node_id: NodeId,
	pub server: ServerSettings,
	pub session: SessionSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// WebSocket bind endpoint (`ws://host:port/path`).
	pub bind: WsEndpoint,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	/// HMAC secret for stateless access tokens; test tokens are accepted when unset.
	pub auth_hmac_secret: Option<SecretString>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
	node_id: Option<String>,

	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	session: FileSessionSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileServerSettings {
	bind: Option<String>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,
	auth_hmac_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSessionSettings {
	heartbeat_interval_ms: Option<u64>,
	pong_wait_ms: Option<u64>,
	write_timeout_ms: Option<u64>,
	send_queue_capacity: Option<usize>,
	max_frame_bytes: Option<usize>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> anyhow::Result<Self> {
		let node_id = match file.node_id.filter(|s| !s.trim().is_empty()) {
			Some(id) => NodeId::new(id).context("invalid node_id")?,
			None => NodeId::generate(),
		};

		let bind = file
			.server
			.bind
			.filter(|s| !s.trim().is_empty())
			.unwrap_or_else(|| DEFAULT_BIND.to_string());
		let bind = WsEndpoint::parse(&bind).map_err(|e| anyhow!(e)).context("invalid server.bind")?;

		let defaults = SessionSettings::default();
		let session = SessionSettings {
			heartbeat_interval: file
				.session
				.heartbeat_interval_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.heartbeat_interval),
			pong_wait: file
				.session
				.pong_wait_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.pong_wait),
			write_timeout: file
				.session
				.write_timeout_ms
				.map(Duration::from_millis)
				.unwrap_or(defaults.write_timeout),
			send_queue_capacity: file.session.send_queue_capacity.unwrap_or(defaults.send_queue_capacity),
			max_frame_bytes: file.session.max_frame_bytes.unwrap_or(defaults.max_frame_bytes),
		};

		Ok(Self {
			node_id,
			server: ServerSettings {
				bind,
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				health_bind: file.server.health_bind.filter(|s| !s.trim().is_empty()),
				auth_hmac_secret: file
					.server
					.auth_hmac_secret
					.filter(|s| !s.trim().is_empty())
					.map(SecretString::new),
			},
			session,
		})
	}

	/// Clamp values that would make sessions misbehave.
	fn normalize(&mut self) {
		let s = &mut self.session;

		if s.heartbeat_interval.is_zero() {
			warn!("session config: heartbeat_interval is zero; using default");
			s.heartbeat_interval = SessionSettings::default().heartbeat_interval;
		}

		// pong_wait may be raised to twice the heartbeat below.
		cap_timer("heartbeat_interval", &mut s.heartbeat_interval, MAX_SESSION_TIMER / 2);
		cap_timer("pong_wait", &mut s.pong_wait, MAX_SESSION_TIMER);
		cap_timer("write_timeout", &mut s.write_timeout, MAX_SESSION_TIMER);

		if s.pong_wait <= s.heartbeat_interval {
			let corrected = s.heartbeat_interval * 2;
			warn!(
				pong_wait_ms = s.pong_wait.as_millis() as u64,
				heartbeat_interval_ms = s.heartbeat_interval.as_millis() as u64,
				corrected_ms = corrected.as_millis() as u64,
				"session config: pong_wait must exceed heartbeat_interval; correcting"
			);
			s.pong_wait = corrected;
		}

		if s.write_timeout.is_zero() {
			warn!("session config: write_timeout is zero; using default");
			s.write_timeout = SessionSettings::default().write_timeout;
		}

		if s.send_queue_capacity == 0 {
			warn!("session config: send_queue_capacity is zero; using 1");
			s.send_queue_capacity = 1;
		}

		if s.max_frame_bytes == 0 {
			warn!("session config: max_frame_bytes is zero; using default");
			s.max_frame_bytes = SessionSettings::default().max_frame_bytes;
		}
	}
}

fn cap_timer(name: &str, value: &mut Duration, max: Duration) {
	if *value > max {
		warn!(
			setting = name,
			configured_ms = value.as_millis() as u64,
			max_ms = max.as_millis() as u64,
			"session config: timer too large; capping"
		);
		*value = max;
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn apply_overrides(cfg: &mut ServerConfig, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
	if let Some(v) = non_empty(env("IMGATE_NODE_ID")) {
		cfg.node_id = NodeId::new(v).context("invalid IMGATE_NODE_ID")?;
		info!("server config: node_id overridden by env");
	}

	if let Some(v) = non_empty(env("IMGATE_BIND")) {
		cfg.server.bind = WsEndpoint::parse(&v).map_err(|e| anyhow!(e)).context("invalid IMGATE_BIND")?;
		info!("server config: bind overridden by env");
	}

	if let Some(v) = non_empty(env("IMGATE_METRICS_BIND")) {
		cfg.server.metrics_bind = Some(v);
		info!("server config: metrics_bind overridden by env");
	}

	if let Some(v) = non_empty(env("IMGATE_HEALTH_BIND")) {
		cfg.server.health_bind = Some(v);
		info!("server config: health_bind overridden by env");
	}

	if let Some(v) = non_empty(env("IMGATE_AUTH_HMAC_SECRET")) {
		cfg.server.auth_hmac_secret = Some(SecretString::new(v));
		info!("server auth: auth_hmac_secret overridden by env");
	}

	if let Some(v) = env("IMGATE_HEARTBEAT_INTERVAL_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.session.heartbeat_interval = Duration::from_millis(ms);
		info!(ms, "session config: heartbeat_interval overridden by env");
	}

	if let Some(v) = env("IMGATE_PONG_WAIT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.session.pong_wait = Duration::from_millis(ms);
		info!(ms, "session config: pong_wait overridden by env");
	}

	if let Some(v) = env("IMGATE_WRITE_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.session.write_timeout = Duration::from_millis(ms);
		info!(ms, "session config: write_timeout overridden by env");
	}

	if let Some(v) = env("IMGATE_SEND_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
	{
		cfg.session.send_queue_capacity = capacity;
		info!(capacity, "session config: send_queue_capacity overridden by env");
	}

	if let Some(v) = env("IMGATE_MAX_FRAME_BYTES")
		&& let Ok(bytes) = v.trim().parse::<usize>()
	{
		cfg.session.max_frame_bytes = bytes;
		info!(bytes, "session config: max_frame_bytes overridden by env");
	}

	Ok(())
}
