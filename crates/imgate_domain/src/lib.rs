#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
		#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
		#[cfg_attr(feature = "serde", serde(transparent))]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty identifier.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				Ok(Self(id))
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				$name::new(s.to_string())
			}
		}

		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
	};
}

string_id!(
	/// Account identifier as asserted by the authenticator.
	UserId
);

string_id!(
	/// Per-user device identifier. One user may be online on several devices.
	DeviceId
);

string_id!(
	/// Client-chosen group identifier (the `uuid` field on the wire).
	GroupId
);

/// Identity of the process hosting a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct NodeId(String);

impl NodeId {
	pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
		let id = id.into();
		if id.trim().is_empty() {
			return Err(ParseIdError::Empty);
		}
		if id.chars().any(char::is_whitespace) {
			return Err(ParseIdError::InvalidFormat(format!("node id must not contain whitespace: {id:?}")));
		}
		Ok(Self(id))
	}

	/// Random node id (`node-<uuid>`), used when none is configured.
	pub fn generate() -> Self {
		Self(format!("node-{}", uuid::Uuid::new_v4()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Authenticated identity of a connection: `(user, device)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Principal {
	pub user_id: UserId,
	pub device_id: DeviceId,
}

impl Principal {
	pub fn new(user_id: UserId, device_id: DeviceId) -> Self {
		Self { user_id, device_id }
	}

	/// Build a principal from raw strings, rejecting empty parts.
	pub fn parse(user_id: &str, device_id: &str) -> Result<Self, ParseIdError> {
		Ok(Self::new(UserId::new(user_id)?, DeviceId::new(device_id)?))
	}
}

impl fmt::Display for Principal {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.user_id, self.device_id)
	}
}

/// Wrapper that redacts in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_empty_ids() {
		assert_eq!(UserId::new(""), Err(ParseIdError::Empty));
		assert!(DeviceId::new("   ").is_err());
		assert!("".parse::<GroupId>().is_err());
	}

	#[test]
	fn ids_display_their_value() {
		let u = UserId::new("u1").unwrap();
		assert_eq!(u.to_string(), "u1");
		assert_eq!(u.as_str(), "u1");
		assert_eq!("g1".parse::<GroupId>().unwrap().into_string(), "g1");
	}

	#[test]
	fn principal_parse_and_display() {
		let p = Principal::parse("u1", "phone").unwrap();
		assert_eq!(p.user_id.as_str(), "u1");
		assert_eq!(p.to_string(), "u1/phone");
		assert!(Principal::parse("u1", "").is_err());
	}

	#[test]
	fn node_id_rules() {
		assert!(NodeId::new("edge 1").is_err());
		assert!(NodeId::generate().as_str().starts_with("node-"));
		assert_ne!(NodeId::generate(), NodeId::generate());
	}

	#[test]
	fn secret_string_is_redacted() {
		let s = SecretString::new("hunter2");
		assert_eq!(format!("{s:?}"), "SecretString(<redacted>)");
		assert_eq!(s.to_string(), "<redacted>");
		assert_eq!(s.expose(), "hunter2");
	}
}
