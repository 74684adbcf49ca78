use std::fmt;

use serde::{Deserialize, Serialize};

/// Error codes surfaced to callers and preserved across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// The handshake did not complete within the connection timeout.
	ConnectionTimeout,
	/// The connection was destroyed before or while the operation ran.
	ConnectionDestroyed,
	/// Invalid setup input, such as a transport that is already bound.
	InvalidArgument,
	/// A call did not receive its reply within the call timeout.
	MethodCallTimeout,
	/// The remote side has no method at the requested path.
	MethodNotFound,
	/// The transport refused to carry a message.
	TransmissionFailed,
}

impl ErrorCode {
	/// Returns the wire spelling of the code.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
			Self::ConnectionDestroyed => "CONNECTION_DESTROYED",
			Self::InvalidArgument => "INVALID_ARGUMENT",
			Self::MethodCallTimeout => "METHOD_CALL_TIMEOUT",
			Self::MethodNotFound => "METHOD_NOT_FOUND",
			Self::TransmissionFailed => "TRANSMISSION_FAILED",
		}
	}
}

impl fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Structured error carried by a `REPLY` flagged as an error instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
	/// Error class name, `"Error"` unless something more specific is known.
	pub name: String,
	/// Human-readable message.
	pub message: String,
	/// Stack or cause chain rendered as text.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
	/// Protocol error code when the error originated in the protocol layer itself.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub code: Option<ErrorCode>,
}

impl SerializedError {
	/// Creates a plain `Error` with a single-frame stack.
	pub fn new(message: impl Into<String>) -> Self {
		Self::named("Error", message)
	}

	/// Creates an error with an explicit class name.
	pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
		let name = name.into();
		let message = message.into();
		let stack = Some(format!("{name}: {message}"));
		Self {
			name,
			message,
			stack,
			code: None,
		}
	}

	/// Creates an error tagged with a protocol error code.
	pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code: Some(code),
			..Self::named("TetherError", message)
		}
	}

	/// Captures a Rust error and its `source()` chain.
	///
	/// The chain becomes the stack, one `Caused by:` line per source.
	pub fn from_error(name: impl Into<String>, error: &(dyn std::error::Error + 'static)) -> Self {
		let mut this = Self::named(name, error.to_string());
		let mut stack = this.stack.take().unwrap_or_default();
		let mut source = error.source();
		while let Some(cause) = source {
			stack.push_str("\n    Caused by: ");
			stack.push_str(&cause.to_string());
			source = cause.source();
		}
		this.stack = Some(stack);
		this
	}
}

impl fmt::Display for SerializedError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.name, self.message)
	}
}
