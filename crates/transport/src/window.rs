use crate::side_channel::{Boundary, SideChannel};
use crate::{
	AllowedOrigin, Endpoint, HandlerId, InitializeOptions, MessageEnvelope, MessageHandler, MessagePort, Result, Transport,
	TransportError,
};

/// Configuration of a [`WindowTransport`].
#[derive(Debug, Clone)]
pub struct WindowTransportOptions {
	/// The window this side lives in; incoming events are read from here.
	pub local: Endpoint,
	/// The counterpart window messages are posted to.
	pub remote: Endpoint,
	/// Origins accepted from `remote`. Empty means the local window's own origin.
	pub allowed_origins: Vec<AllowedOrigin>,
}

impl WindowTransportOptions {
	/// Creates options that only accept the local window's own origin.
	pub fn new(local: Endpoint, remote: Endpoint) -> Self {
		Self {
			local,
			remote,
			allowed_origins: Vec::new(),
		}
	}

	/// Adds an allowed origin.
	#[must_use]
	pub fn allow(mut self, origin: impl Into<AllowedOrigin>) -> Self {
		self.allowed_origins.push(origin.into());
		self
	}
}

/// Transport between two windows, e.g. a page and an embedded frame.
///
/// Accepts events only from the configured remote window and from allowed origins.
/// Handshake traffic uses the windows directly; everything after `ACK2` moves to a
/// dedicated port pair.
pub struct WindowTransport {
	channel: SideChannel,
}

impl WindowTransport {
	/// Creates a window transport.
	///
	/// # Errors
	///
	/// [`TransportError::InvalidArgument`] when `local` and `remote` are the same window.
	pub fn new(options: WindowTransportOptions) -> Result<Self> {
		let WindowTransportOptions {
			local,
			remote,
			mut allowed_origins,
		} = options;
		if local.ptr_eq(&remote) {
			return Err(TransportError::InvalidArgument("remote window must differ from the local window".into()));
		}
		if allowed_origins.is_empty() {
			allowed_origins.push(AllowedOrigin::Exact(local.origin().to_owned()));
		}
		Ok(Self {
			channel: SideChannel::new("window", local, remote, Boundary::Window { allowed: allowed_origins }),
		})
	}
}

impl Transport for WindowTransport {
	fn initialize(&self, options: InitializeOptions) -> Result<()> {
		self.channel.initialize(options)
	}

	fn send_message(&self, envelope: MessageEnvelope, transfer: Vec<MessagePort>) -> Result<()> {
		self.channel.send_message(envelope, transfer)
	}

	fn add_message_handler(&self, handler: MessageHandler) -> HandlerId {
		self.channel.add_message_handler(handler)
	}

	fn remove_message_handler(&self, id: HandlerId) {
		self.channel.remove_message_handler(id);
	}

	fn destroy(&self) {
		self.channel.destroy();
	}
}
