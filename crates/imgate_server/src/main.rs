#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context as _;
use imgate_server::config::{self, ServerConfig};
use imgate_server::server::auth::{Authenticator, HmacAuthenticator, TestTokenAuthenticator};
use imgate_server::server::gateway::{Gateway, GatewayOptions};
use imgate_server::server::health::{HealthState, spawn_health_server};
use imgate_server::server::metrics::{MetricsSink, RecorderMetrics};
use imgate_util::endpoint::WsEndpoint;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: imgate_server [--bind ws://host:port/path] [--config path]\n\
\n\
Options:\n\
\t--bind     Bind endpoint (default: ws://127.0.0.1:18080/ws)\n\
\t          Format: ws://host:port[/path]\n\
\t--config   Config file (default: ~/.imgate/config.toml)\n\
\t--help     Show this help\n\
"
	);
	std::process::exit(2)
}

struct Args {
	bind: Option<WsEndpoint>,
	config: Option<std::path::PathBuf>,
}

fn parse_args() -> Args {
	let mut args = Args { bind: None, config: None };

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--bind" | "--listen" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				let endpoint = WsEndpoint::parse(&v).unwrap_or_else(|e| {
					eprintln!("{e}");
					usage_and_exit();
				});
				args.bind = Some(endpoint);
			}
			"--config" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--config must be non-empty");
					usage_and_exit();
				}
				args.config = Some(v.into());
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,imgate_server=debug".to_string());

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(tracing_subscriber::fmt::layer().with_target(false));

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("imgate_server");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn build_authenticator(cfg: &ServerConfig) -> Arc<dyn Authenticator> {
	match cfg.server.auth_hmac_secret.clone() {
		Some(secret) => {
			info!("auth: hmac tokens");
			Arc::new(HmacAuthenticator::new(secret))
		}
		None => {
			warn!("auth: no auth_hmac_secret configured; accepting test:<user>:<device> tokens");
			Arc::new(TestTokenAuthenticator)
		}
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = match args.config {
		Some(path) => path,
		None => config::default_config_path()?,
	};
	let mut server_cfg = config::load_server_config_from_path(&config_path)?;
	if let Some(bind) = args.bind {
		server_cfg.server.bind = bind;
	}
	info!(path = %config_path.display(), "loaded server config (toml + env overrides)");

	init_metrics(server_cfg.server.metrics_bind.as_deref());

	let bind_addr = server_cfg
		.server
		.bind
		.to_socket_addr_if_ip_literal()
		.map_err(|e| anyhow::anyhow!(e))?;

	let metrics: Arc<dyn MetricsSink> = Arc::new(RecorderMetrics);
	let gateway = Gateway::new(
		GatewayOptions {
			node_id: server_cfg.node_id.clone(),
			ws_path: server_cfg.server.bind.path.clone(),
			session: server_cfg.session.clone(),
		},
		build_authenticator(&server_cfg),
		metrics,
	);

	let health_state = HealthState::new(Arc::clone(gateway.registry()));
	if let Some(bind) = server_cfg.server.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let listener = TcpListener::bind(bind_addr)
		.await
		.with_context(|| format!("bind {}", server_cfg.server.bind.url()))?;

	let shutdown = CancellationToken::new();
	{
		let shutdown = shutdown.clone();
		tokio::spawn(async move {
			if let Err(e) = tokio::signal::ctrl_c().await {
				warn!(error = %e, "failed to listen for ctrl-c");
				return;
			}
			info!("shutdown requested");
			shutdown.cancel();
		});
	}

	health_state.mark_ready();
	info!(url = %server_cfg.server.bind.url(), "imgate_server ready");

	gateway.serve(listener, shutdown).await
}
