use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tether_proto::{ErrorCode, MethodPath, SerializedError};
use tether_transport::TransportError;

/// A convenient type alias for `Result` with `E` = [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by connections and remote calls.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The handshake did not complete in time.
	#[error("Connection timed out after {}ms", .0.as_millis())]
	ConnectionTimeout(Duration),
	/// The connection was destroyed before the operation could finish.
	#[error("{0}")]
	ConnectionDestroyed(String),
	/// Invalid setup input, such as a transport already bound to another connection.
	#[error("{0}")]
	InvalidArgument(String),
	/// A call received no reply within its timeout.
	#[error("Method call {path}() timed out after {}ms", .timeout.as_millis())]
	MethodCallTimeout {
		/// Called method.
		path: MethodPath,
		/// Timeout that elapsed.
		timeout: Duration,
	},
	/// The remote side has no method at the requested path.
	#[error("{0}")]
	MethodNotFound(String),
	/// The transport refused to carry a message.
	#[error("{0}")]
	TransmissionFailed(String),
	/// The remote method failed.
	#[error("{0}")]
	Remote(RemoteError),
}

/// Failure reported by a remote method.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
	/// A structured error, reconstituted from its serialized form.
	Error(SerializedError),
	/// An arbitrary rejection value, passed through unchanged.
	Value(Value),
}

impl fmt::Display for RemoteError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Error(err) => f.write_str(&err.message),
			Self::Value(value) => write!(f, "remote rejected with {value}"),
		}
	}
}

impl Error {
	/// Returns the protocol error code, if this error carries one.
	///
	/// Remote failures only have a code when the remote side's own protocol layer raised them.
	pub fn code(&self) -> Option<ErrorCode> {
		match self {
			Self::ConnectionTimeout(_) => Some(ErrorCode::ConnectionTimeout),
			Self::ConnectionDestroyed(_) => Some(ErrorCode::ConnectionDestroyed),
			Self::InvalidArgument(_) => Some(ErrorCode::InvalidArgument),
			Self::MethodCallTimeout { .. } => Some(ErrorCode::MethodCallTimeout),
			Self::MethodNotFound(_) => Some(ErrorCode::MethodNotFound),
			Self::TransmissionFailed(_) => Some(ErrorCode::TransmissionFailed),
			Self::Remote(RemoteError::Error(err)) => err.code,
			Self::Remote(RemoteError::Value(_)) => None,
		}
	}

	/// Reconstitutes an error received in a `REPLY`.
	///
	/// Codes with a message-only variant map back onto it; everything else stays a
	/// [`RemoteError::Error`].
	pub fn from_serialized(err: SerializedError) -> Self {
		match err.code {
			Some(ErrorCode::MethodNotFound) => Self::MethodNotFound(err.message),
			Some(ErrorCode::ConnectionDestroyed) => Self::ConnectionDestroyed(err.message),
			Some(ErrorCode::InvalidArgument) => Self::InvalidArgument(err.message),
			Some(ErrorCode::TransmissionFailed) => Self::TransmissionFailed(err.message),
			_ => Self::Remote(RemoteError::Error(err)),
		}
	}

	/// Decodes the `error` field of a `REPLY`.
	pub(crate) fn from_reply(error: Value, is_error_instance: bool) -> Self {
		if !is_error_instance {
			return Self::Remote(RemoteError::Value(error));
		}
		match serde_json::from_value::<SerializedError>(error.clone()) {
			Ok(err) => Self::from_serialized(err),
			Err(_) => Self::Remote(RemoteError::Value(error)),
		}
	}

	pub(crate) fn transmission(err: &TransportError) -> Self {
		Self::TransmissionFailed(format!("Failed to send message: {err}"))
	}

	pub(crate) fn destroyed_call(path: &MethodPath) -> Self {
		Self::ConnectionDestroyed(format!("Method call {path}() failed due to destroyed connection"))
	}

	pub(crate) fn connection_destroyed() -> Self {
		Self::ConnectionDestroyed("Connection destroyed".into())
	}
}
