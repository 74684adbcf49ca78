//! Message transports for tether.
//!
//! The handshake and RPC layers in `tether-rpc` only ever talk to a [`Transport`]. This
//! crate defines that contract and ships three variants of it:
//!
//! * [`PortTransport`]: one side of a point-to-point [`MessageChannel`]. No filtering, no upgrade.
//! * [`WorkerTransport`]: talks to a worker scope over a shared [`Endpoint`]; once the
//!   handshake reaches `ACK2` all further traffic moves to a dedicated side channel.
//! * [`WindowTransport`]: like the worker transport, but events are also checked against
//!   the remote window and an allow-list of origins.
//!
//! [`Endpoint`] and [`MessagePort`] are the in-process messaging substrate these run over:
//! asynchronous, FIFO per channel, and carrying [`serde_json::Value`] payloads so that
//! foreign traffic can share an endpoint with protocol envelopes.

#![warn(missing_docs)]

use std::sync::Arc;

pub use tether_proto::MessageEnvelope;

mod endpoint;
mod error;
mod handlers;
mod origin;
mod port;
mod port_transport;
mod side_channel;
mod spawn;
mod window;
mod worker;

pub use endpoint::{ANY_ORIGIN, Endpoint, ListenerId, MessageEvent};
pub use error::TransportError;
pub use handlers::{HandlerId, HandlerSet, MessageHandler};
pub use origin::AllowedOrigin;
pub use port::{MessageChannel, MessagePort, PortMessage};
pub use port_transport::{PortTransport, port_transport_pair};
pub use spawn::spawn;
pub use window::{WindowTransport, WindowTransportOptions};
pub use worker::WorkerTransport;

/// A convenient type alias for `Result` with `E` = [`TransportError`].
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Predicate separating this connection's envelopes from everything else on the transport.
pub type MessagePredicate = Arc<dyn Fn(&MessageEnvelope) -> bool + Send + Sync>;

/// An envelope delivered to message handlers, with any ports transferred alongside it.
#[derive(Debug)]
pub struct ReceivedMessage {
	/// The decoded protocol envelope.
	pub envelope: MessageEnvelope,
	/// Ports moved across with the message.
	pub transfer: Vec<MessagePort>,
}

/// Options handed to [`Transport::initialize`].
#[derive(Clone)]
pub struct InitializeOptions {
	/// Accepts envelopes belonging to the connection; everything else is dropped.
	pub is_protocol_message: MessagePredicate,
	/// Diagnostic span the transport logs under.
	pub span: tracing::Span,
}

impl InitializeOptions {
	/// Creates options with the given predicate and no diagnostic span.
	pub fn new(is_protocol_message: impl Fn(&MessageEnvelope) -> bool + Send + Sync + 'static) -> Self {
		Self {
			is_protocol_message: Arc::new(is_protocol_message),
			span: tracing::Span::none(),
		}
	}

	/// Sets the diagnostic span.
	#[must_use]
	pub fn with_span(mut self, span: tracing::Span) -> Self {
		self.span = span;
		self
	}
}

/// Uniform contract every transport variant implements.
///
/// A transport carries [`MessageEnvelope`]s between exactly two contexts on a best-effort
/// basis. It may be initialized once; a second [`Transport::initialize`] fails with
/// [`TransportError::AlreadyInitialized`], which is how reuse across connections is rejected.
pub trait Transport: Send + Sync + 'static {
	/// Starts listening, filtering incoming traffic through `options.is_protocol_message`.
	///
	/// # Errors
	///
	/// [`TransportError::AlreadyInitialized`] on a second call, [`TransportError::Destroyed`]
	/// after [`Transport::destroy`].
	fn initialize(&self, options: InitializeOptions) -> Result<()>;

	/// Sends an envelope, moving `transfer` to the other side.
	///
	/// # Errors
	///
	/// Fails when the underlying channel rejects the payload: closed channel, unclonable
	/// transfer list, unknown target, or traffic sent before the side channel exists.
	fn send_message(&self, envelope: MessageEnvelope, transfer: Vec<MessagePort>) -> Result<()>;

	/// Subscribes a handler to incoming envelopes.
	fn add_message_handler(&self, handler: MessageHandler) -> HandlerId;

	/// Unsubscribes a handler. Unknown ids are ignored.
	fn remove_message_handler(&self, id: HandlerId);

	/// Releases listeners and channels. Idempotent.
	fn destroy(&self);
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
	fn initialize(&self, options: InitializeOptions) -> Result<()> {
		(**self).initialize(options)
	}

	fn send_message(&self, envelope: MessageEnvelope, transfer: Vec<MessagePort>) -> Result<()> {
		(**self).send_message(envelope, transfer)
	}

	fn add_message_handler(&self, handler: MessageHandler) -> HandlerId {
		(**self).add_message_handler(handler)
	}

	fn remove_message_handler(&self, id: HandlerId) {
		(**self).remove_message_handler(id)
	}

	fn destroy(&self) {
		(**self).destroy()
	}
}
