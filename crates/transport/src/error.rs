/// Errors raised by transports and the messaging substrate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
	/// The transport was already initialized, i.e. it is bound to another connection.
	#[error("transport is already initialized")]
	AlreadyInitialized,
	/// The transport was destroyed.
	#[error("transport is destroyed")]
	Destroyed,
	/// The channel or port is closed.
	#[error("channel is closed")]
	Closed,
	/// The payload or its transfer list could not be cloned across the boundary.
	#[error("could not clone message: {0}")]
	DataClone(String),
	/// Invalid construction input.
	#[error("invalid argument: {0}")]
	InvalidArgument(String),
	/// Internal protocol invariant broken, e.g. traffic before the side channel exists.
	#[error("protocol violation: {0}")]
	ProtocolViolation(String),
}

impl TransportError {
	/// Returns true for failures caused by the payload itself rather than the channel.
	pub const fn is_data_clone(&self) -> bool {
		matches!(self, Self::DataClone(_))
	}
}
