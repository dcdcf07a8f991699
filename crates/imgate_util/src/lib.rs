#![forbid(unsafe_code)]

pub mod endpoint {
	use std::net::SocketAddr;

	/// Path used when a `ws://` endpoint has none.
	pub const DEFAULT_WS_PATH: &str = "/ws";

	/// Parsed `ws://host:port[/path]` endpoint.
	#[derive(Debug, Clone, PartialEq, Eq, Hash)]
	pub struct WsEndpoint {
		pub host: String,
		pub port: u16,
		pub path: String,
	}

	impl WsEndpoint {
		/// Returns `host:port` (host preserved, IPv6 stays bracketed).
		pub fn hostport(&self) -> String {
			format!("{}:{}", self.host, self.port)
		}

		/// Convert to `SocketAddr` only if the host is an IP literal.
		pub fn to_socket_addr_if_ip_literal(&self) -> Result<SocketAddr, String> {
			self.hostport()
				.parse()
				.map_err(|_| format!("host must be an IP literal (DNS names not supported here): {}", self.host))
		}

		/// Full `ws://` URL, suitable for clients.
		pub fn url(&self) -> String {
			format!("ws://{}{}", self.hostport(), self.path)
		}

		/// Parse a WebSocket endpoint string in the form `ws://host:port[/path]`.
		pub fn parse(s: &str) -> Result<Self, String> {
			let s = s.trim();
			if s.is_empty() {
				return Err("endpoint must be non-empty (expected ws://host:port/path)".to_string());
			}

			let rest = s
				.strip_prefix("ws://")
				.ok_or_else(|| format!("invalid endpoint (expected ws://host:port/path): {s}"))?;

			if rest.contains('?') || rest.contains('#') {
				return Err(format!(
					"invalid endpoint (expected ws://host:port/path without query/fragment): {s}"
				));
			}

			let (authority, path) = match rest.find('/') {
				Some(idx) => (&rest[..idx], &rest[idx..]),
				None => (rest, ""),
			};

			let (host, port_str) = authority
				.rsplit_once(':')
				.ok_or_else(|| format!("invalid endpoint (missing :port, expected ws://host:port/path): {s}"))?;

			let host = host.trim();
			if host.is_empty() {
				return Err(format!("invalid endpoint host (expected ws://host:port/path): {s}"));
			}

			if host.contains(':') && !(host.starts_with('[') && host.ends_with(']')) {
				return Err(format!(
					"invalid endpoint host (IPv6 must be bracketed like ws://[::1]:18080/ws): {s}"
				));
			}

			let port: u16 = port_str
				.trim()
				.parse()
				.map_err(|_| format!("invalid endpoint port (expected 1..=65535): {s}"))?;

			if port == 0 {
				return Err(format!("invalid endpoint port (expected 1..=65535): {s}"));
			}

			let path = match path.trim_end_matches('/') {
				"" => DEFAULT_WS_PATH.to_string(),
				p => p.to_string(),
			};

			Ok(Self {
				host: host.to_string(),
				port,
				path,
			})
		}
	}

	#[cfg(test)]
	mod tests {
		use super::*;

		#[test]
		fn parses_dns_hostname_with_path() {
			let e = WsEndpoint::parse("ws://im.example.com:443/gateway").unwrap();
			assert_eq!(e.host, "im.example.com");
			assert_eq!(e.port, 443);
			assert_eq!(e.path, "/gateway");
			assert_eq!(e.hostport(), "im.example.com:443");
		}

		#[test]
		fn missing_path_defaults_to_ws() {
			let e = WsEndpoint::parse("ws://127.0.0.1:18080").unwrap();
			assert_eq!(e.path, DEFAULT_WS_PATH);

			let e = WsEndpoint::parse("ws://127.0.0.1:18080/").unwrap();
			assert_eq!(e.path, DEFAULT_WS_PATH);
		}

		#[test]
		fn parses_bracketed_ipv6() {
			let e = WsEndpoint::parse("ws://[::1]:18080/ws").unwrap();
			assert_eq!(e.host, "[::1]");
			assert_eq!(e.hostport(), "[::1]:18080");
			assert_eq!(e.url(), "ws://[::1]:18080/ws");
		}

		#[test]
		fn rejects_unbracketed_ipv6() {
			let err = WsEndpoint::parse("ws://::1:18080/ws").unwrap_err();
			assert!(err.to_lowercase().contains("ipv6"));
		}

		#[test]
		fn rejects_wrong_scheme_query_fragment() {
			assert!(WsEndpoint::parse("wss://127.0.0.1:18080/ws").is_err());
			assert!(WsEndpoint::parse("ws://127.0.0.1:18080/ws?x=y").is_err());
			assert!(WsEndpoint::parse("ws://127.0.0.1:18080/ws#frag").is_err());
		}

		#[test]
		fn rejects_port_zero_and_missing_port() {
			assert!(WsEndpoint::parse("ws://127.0.0.1:0/ws").is_err());
			assert!(WsEndpoint::parse("ws://127.0.0.1/ws").is_err());
		}

		#[test]
		fn to_socket_addr_if_ip_literal() {
			let e = WsEndpoint::parse("ws://127.0.0.1:18080/ws").unwrap();
			assert_eq!(e.to_socket_addr_if_ip_literal().unwrap().to_string(), "127.0.0.1:18080");

			let e = WsEndpoint::parse("ws://im.example.com:443/ws").unwrap();
			assert!(e.to_socket_addr_if_ip_literal().is_err());
		}
	}
}
