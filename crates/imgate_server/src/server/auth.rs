#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use imgate_domain::{Principal, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Device id assigned when an HMAC token carries no `dev` claim.
pub const DEFAULT_DEVICE_ID: &str = "default";

#[derive(Debug, Error)]
pub enum AuthError {
	#[error("missing bearer token")]
	MissingToken,

	#[error("invalid token format")]
	InvalidFormat,

	#[error("invalid token signature")]
	InvalidSignature,

	#[error("token expired")]
	Expired,

	#[error("invalid token claims: {0}")]
	InvalidClaims(String),
}

/// Decides which principal a bearer token belongs to.
///
/// Runs inside the WebSocket upgrade callback, so implementations must not block.
pub trait Authenticator: Send + Sync + std::fmt::Debug + 'static {
	fn authenticate(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
	let mut parts = header_value.split(' ');
	let scheme = parts.next()?;
	let token = parts.next()?;
	if scheme != "Bearer" || token.is_empty() || parts.next().is_some() {
		return None;
	}
	Some(token)
}

/// Resolve the principal for an upgrade request's `Authorization` header.
///
/// A missing header or one that is not a well-formed bearer credential is `MissingToken`.
pub fn authenticate_header(authenticator: &dyn Authenticator, header: Option<&str>) -> Result<Principal, AuthError> {
	let token = header.and_then(bearer_token).ok_or(AuthError::MissingToken)?;
	authenticator.authenticate(token)
}

/// Development authenticator accepting `test:<user>:<device>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TestTokenAuthenticator;

impl Authenticator for TestTokenAuthenticator {
	fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
		let mut parts = token.split(':');
		let (Some("test"), Some(user), Some(device), None) = (parts.next(), parts.next(), parts.next(), parts.next())
		else {
			return Err(AuthError::InvalidFormat);
		};

		Principal::parse(user, device).map_err(|e| AuthError::InvalidClaims(e.to_string()))
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
	pub sub: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub dev: Option<String>,
	pub exp: u64,
}

/// Stateless `v1.<claims>.<signature>` tokens signed with HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct HmacAuthenticator {
	secret: SecretString,
}

impl HmacAuthenticator {
	pub fn new(secret: SecretString) -> Self {
		Self { secret }
	}

	pub fn verify(&self, token: &str) -> Result<AuthClaims, AuthError> {
		verify_hmac_token(token, self.secret.expose())
	}
}

impl Authenticator for HmacAuthenticator {
	fn authenticate(&self, token: &str) -> Result<Principal, AuthError> {
		let claims = self.verify(token)?;
		let device = claims.dev.as_deref().unwrap_or(DEFAULT_DEVICE_ID);
		Principal::parse(&claims.sub, device).map_err(|e| AuthError::InvalidClaims(e.to_string()))
	}
}

pub fn verify_hmac_token(token: &str, secret: &str) -> Result<AuthClaims, AuthError> {
	let parts = token.split('.').collect::<Vec<_>>();
	if parts.len() != 3 || parts[0] != "v1" {
		return Err(AuthError::InvalidFormat);
	}

	let payload_b64 = parts[1];
	let sig_b64 = parts[2];

	let payload = URL_SAFE_NO_PAD
		.decode(payload_b64)
		.map_err(|_| AuthError::InvalidFormat)?;
	let expected_sig = sign(payload_b64.as_bytes(), secret.as_bytes())?;
	let provided_sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthError::InvalidFormat)?;

	if !constant_time_eq(&expected_sig, &provided_sig) {
		return Err(AuthError::InvalidSignature);
	}

	let claims: AuthClaims =
		serde_json::from_slice(&payload).map_err(|e| AuthError::InvalidClaims(e.to_string()))?;
	if claims.exp <= unix_now() {
		return Err(AuthError::Expired);
	}

	Ok(claims)
}

/// Sign `claims` into a token accepted by [`HmacAuthenticator`].
pub fn mint_token(claims: &AuthClaims, secret: &str) -> Result<String, AuthError> {
	let payload = serde_json::to_vec(claims).map_err(|e| AuthError::InvalidClaims(e.to_string()))?;
	let payload_b64 = URL_SAFE_NO_PAD.encode(payload);
	let sig = URL_SAFE_NO_PAD.encode(sign(payload_b64.as_bytes(), secret.as_bytes())?);
	Ok(format!("v1.{payload_b64}.{sig}"))
}

pub fn unix_now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

fn sign(payload_b64: &[u8], secret: &[u8]) -> Result<Vec<u8>, AuthError> {
	let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(|_| AuthError::InvalidSignature)?;
	mac.update(payload_b64);
	Ok(mac.finalize().into_bytes().to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}

	let mut diff = 0u8;
	for (x, y) in a.iter().zip(b.iter()) {
		diff |= x ^ y;
	}

	diff == 0
}
