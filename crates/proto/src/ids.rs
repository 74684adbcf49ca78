use std::fmt;

use serde::{Deserialize, Serialize};

/// Random token identifying one side of one handshake attempt.
///
/// Only equality and ordering are meaningful: the side holding the greater id leads
/// the handshake.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub String);

impl ParticipantId {
	/// Wraps an already generated token.
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	/// Returns the token text.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ParticipantId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Correlation id of a `CALL` and its `REPLY`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
	/// Returns the id text.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<u64> for CallId {
	fn from(value: u64) -> Self {
		Self(value.to_string())
	}
}

impl fmt::Display for CallId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}
