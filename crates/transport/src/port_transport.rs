use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Span;

use crate::{
	HandlerId, HandlerSet, InitializeOptions, MessageChannel, MessageEnvelope, MessageHandler, MessagePort, PortMessage,
	ReceivedMessage, Result, Transport, TransportError,
};

/// Transport over one end of a dedicated [`MessageChannel`].
///
/// Point-to-point already, so there is neither origin filtering nor a side-channel upgrade.
pub struct PortTransport {
	shared: Arc<Shared>,
}

struct Shared {
	port: MessagePort,
	handlers: HandlerSet,
	state: Mutex<State>,
}

#[derive(Default)]
struct State {
	initialized: bool,
	destroyed: bool,
	options: Option<InitializeOptions>,
}

/// Creates two transports connected back to back.
pub fn port_transport_pair() -> (PortTransport, PortTransport) {
	let (a, b) = MessageChannel::new();
	(PortTransport::new(a), PortTransport::new(b))
}

impl PortTransport {
	/// Wraps `port`. Nothing is received until [`Transport::initialize`].
	pub fn new(port: MessagePort) -> Self {
		Self {
			shared: Arc::new(Shared {
				port,
				handlers: HandlerSet::new(),
				state: Mutex::new(State::default()),
			}),
		}
	}
}

impl Shared {
	fn on_message(&self, message: PortMessage) {
		let options = {
			let state = self.state.lock();
			if state.destroyed {
				return;
			}
			let Some(options) = state.options.clone() else {
				return;
			};
			options
		};
		let Ok(envelope) = MessageEnvelope::from_value(message.data) else {
			tracing::trace!(parent: &options.span, transport = "port", "tether.transport.foreign_message");
			return;
		};
		if !(options.is_protocol_message)(&envelope) {
			return;
		}
		tracing::trace!(parent: &options.span, transport = "port", kind = envelope.message.kind(), "tether.transport.received");
		self.handlers.dispatch(&ReceivedMessage {
			envelope,
			transfer: message.ports,
		});
	}
}

impl Transport for PortTransport {
	fn initialize(&self, options: InitializeOptions) -> Result<()> {
		{
			let mut state = self.shared.state.lock();
			if state.destroyed {
				return Err(TransportError::Destroyed);
			}
			if state.initialized {
				return Err(TransportError::AlreadyInitialized);
			}
			state.initialized = true;
			tracing::debug!(parent: &options.span, transport = "port", "tether.transport.initialized");
			state.options = Some(options);
		}
		let weak = Arc::downgrade(&self.shared);
		self.shared.port.start(move |message| {
			if let Some(shared) = weak.upgrade() {
				shared.on_message(message);
			}
		})
	}

	fn send_message(&self, envelope: MessageEnvelope, transfer: Vec<MessagePort>) -> Result<()> {
		let span = {
			let state = self.shared.state.lock();
			if state.destroyed {
				return Err(TransportError::Destroyed);
			}
			state.options.as_ref().map_or_else(Span::none, |o| o.span.clone())
		};
		let data = envelope.to_value().map_err(|err| TransportError::DataClone(err.to_string()))?;
		tracing::trace!(parent: &span, transport = "port", kind = envelope.message.kind(), "tether.transport.send");
		self.shared.port.post_message(data, transfer)
	}

	fn add_message_handler(&self, handler: MessageHandler) -> HandlerId {
		self.shared.handlers.add(handler)
	}

	fn remove_message_handler(&self, id: HandlerId) {
		self.shared.handlers.remove(id);
	}

	fn destroy(&self) {
		let span = {
			let mut state = self.shared.state.lock();
			if state.destroyed {
				return;
			}
			state.destroyed = true;
			state.options.take().map_or_else(Span::none, |o| o.span)
		};
		self.shared.port.close();
		self.shared.handlers.clear();
		tracing::debug!(parent: &span, transport = "port", "tether.transport.destroyed");
	}
}
