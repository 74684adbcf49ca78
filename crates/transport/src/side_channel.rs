//! Shared machinery of the window and worker transports.
//!
//! Handshake messages travel over the broadcast-style [`Endpoint`]. The side sending
//! `ACK2` opens a [`MessageChannel`], keeps one port and transfers the other with the
//! `ACK2`; from then on both sides carry every other message over that dedicated
//! channel. A fresh `SYN` (the remote restarted) drops the previous side channel.

use std::sync::Arc;

use parking_lot::Mutex;
use tether_proto::{Message, MessageEnvelope};
use tracing::Span;

use crate::endpoint::ANY_ORIGIN;
use crate::{
	AllowedOrigin, Endpoint, HandlerId, HandlerSet, InitializeOptions, ListenerId, MessageChannel, MessageEvent,
	MessageHandler, MessagePort, PortMessage, ReceivedMessage, Result, TransportError,
};

/// Filtering applied to events arriving on the local endpoint.
pub(crate) enum Boundary {
	/// Same-origin worker scope: no origin or source checks.
	Worker,
	/// Window: events must come from the remote window and an allowed origin.
	Window { allowed: Vec<AllowedOrigin> },
}

pub(crate) struct SideChannel {
	shared: Arc<Shared>,
}

struct Shared {
	kind: &'static str,
	local: Endpoint,
	remote: Endpoint,
	boundary: Boundary,
	handlers: HandlerSet,
	state: Mutex<State>,
}

#[derive(Default)]
struct State {
	initialized: bool,
	destroyed: bool,
	options: Option<InitializeOptions>,
	listener: Option<ListenerId>,
	port: Option<MessagePort>,
	concrete_origin: Option<String>,
	/// An event is being dispatched to handlers.
	dispatching: bool,
	/// Side channel opened by an `ACK2` sent during dispatch, started once it returns.
	deferred_start: Option<MessagePort>,
}

impl SideChannel {
	pub(crate) fn new(kind: &'static str, local: Endpoint, remote: Endpoint, boundary: Boundary) -> Self {
		Self {
			shared: Arc::new(Shared {
				kind,
				local,
				remote,
				boundary,
				handlers: HandlerSet::new(),
				state: Mutex::new(State::default()),
			}),
		}
	}

	pub(crate) fn initialize(&self, options: InitializeOptions) -> Result<()> {
		let shared = &self.shared;
		let mut state = shared.state.lock();
		if state.destroyed {
			return Err(TransportError::Destroyed);
		}
		if state.initialized {
			return Err(TransportError::AlreadyInitialized);
		}
		state.initialized = true;
		tracing::debug!(parent: &options.span, transport = shared.kind, origin = shared.local.origin(), "tether.transport.initialized");
		state.options = Some(options);

		let weak = Arc::downgrade(shared);
		state.listener = Some(shared.local.add_listener(move |event| {
			if let Some(shared) = weak.upgrade() {
				shared.on_event(event);
			}
		}));
		Ok(())
	}

	pub(crate) fn send_message(&self, envelope: MessageEnvelope, transfer: Vec<MessagePort>) -> Result<()> {
		self.shared.send(envelope, transfer)
	}

	pub(crate) fn add_message_handler(&self, handler: MessageHandler) -> HandlerId {
		self.shared.handlers.add(handler)
	}

	pub(crate) fn remove_message_handler(&self, id: HandlerId) {
		self.shared.handlers.remove(id);
	}

	pub(crate) fn destroy(&self) {
		let shared = &self.shared;
		let (listener, port, span) = {
			let mut state = shared.state.lock();
			if state.destroyed {
				return;
			}
			state.destroyed = true;
			let span = state.options.take().map_or_else(Span::none, |o| o.span);
			state.deferred_start = None;
			(state.listener.take(), state.port.take(), span)
		};
		if let Some(id) = listener {
			shared.local.remove_listener(id);
		}
		if let Some(port) = port {
			port.close();
		}
		shared.handlers.clear();
		tracing::debug!(parent: &span, transport = shared.kind, "tether.transport.destroyed");
	}
}

impl Shared {
	/// Options of a live, initialized transport.
	fn options(&self) -> Option<InitializeOptions> {
		let state = self.state.lock();
		if state.destroyed {
			return None;
		}
		state.options.clone()
	}

	fn span(&self) -> Span {
		self.state.lock().options.as_ref().map_or_else(Span::none, |o| o.span.clone())
	}

	fn on_event(self: &Arc<Self>, event: &MessageEvent) {
		let Some(options) = self.options() else {
			return;
		};
		if let Boundary::Window { .. } = self.boundary
			&& !event.source.as_ref().is_some_and(|source| source.ptr_eq(&self.remote))
		{
			return;
		}
		let Ok(envelope) = MessageEnvelope::from_value(event.data.clone()) else {
			tracing::trace!(parent: &options.span, transport = self.kind, "tether.transport.foreign_message");
			return;
		};
		if !(options.is_protocol_message)(&envelope) {
			return;
		}
		if let Boundary::Window { allowed } = &self.boundary
			&& !allowed.iter().any(|entry| entry.matches(&event.origin))
		{
			tracing::debug!(
				parent: &options.span,
				origin = %event.origin,
				allowed = ?allowed,
				"tether.transport.origin_rejected"
			);
			return;
		}

		let mut transfer = event.ports.clone();
		let mut adopted = None;
		match &envelope.message {
			Message::Syn { .. } => {
				let stale = {
					let mut state = self.state.lock();
					state.concrete_origin = Some(event.origin.clone());
					state.port.take()
				};
				if let Some(stale) = stale {
					stale.close();
					tracing::debug!(parent: &options.span, transport = self.kind, "tether.transport.side_channel_reset");
				}
			}
			Message::Ack2 { .. } => {
				if transfer.is_empty() {
					tracing::error!(
						parent: &options.span,
						transport = self.kind,
						"tether.transport.ack2_missing_port"
					);
					return;
				}
				let port = transfer.remove(0);
				let stale = {
					let mut state = self.state.lock();
					if state.destroyed {
						return;
					}
					state.port.replace(port.clone())
				};
				if let Some(stale) = stale {
					stale.close();
				}
				adopted = Some(port);
			}
			_ => {}
		}

		tracing::trace!(parent: &options.span, transport = self.kind, kind = envelope.message.kind(), "tether.transport.received");
		self.state.lock().dispatching = true;
		self.handlers.dispatch(&ReceivedMessage { envelope, transfer });
		let opened = {
			let mut state = self.state.lock();
			state.dispatching = false;
			state.deferred_start.take()
		};

		// Side channels start only after the ACK2 that created them has been handled, so
		// their traffic cannot overtake the handshake completion that registers consumers.
		if let Some(port) = adopted {
			self.start_port(&port, &options.span);
			tracing::debug!(parent: &options.span, transport = self.kind, "tether.transport.side_channel_adopted");
		}
		if let Some(port) = opened
			&& !port.is_closed()
		{
			self.start_port(&port, &options.span);
			tracing::debug!(parent: &options.span, transport = self.kind, "tether.transport.side_channel_opened");
		}
	}

	fn on_port_message(&self, message: PortMessage) {
		let Some(options) = self.options() else {
			return;
		};
		let Ok(envelope) = MessageEnvelope::from_value(message.data) else {
			tracing::trace!(parent: &options.span, transport = self.kind, "tether.transport.foreign_message");
			return;
		};
		if !(options.is_protocol_message)(&envelope) {
			return;
		}
		tracing::trace!(parent: &options.span, transport = self.kind, kind = envelope.message.kind(), "tether.transport.received");
		self.handlers.dispatch(&ReceivedMessage {
			envelope,
			transfer: message.ports,
		});
	}

	fn start_port(self: &Arc<Self>, port: &MessagePort, span: &Span) {
		let weak = Arc::downgrade(self);
		let started = port.start(move |message| {
			if let Some(shared) = weak.upgrade() {
				shared.on_port_message(message);
			}
		});
		if let Err(err) = started {
			tracing::warn!(parent: span, transport = self.kind, error = %err, "tether.transport.side_channel_start_failed");
		}
	}

	fn target_origin(&self) -> Result<String> {
		let Boundary::Window { allowed } = &self.boundary else {
			return Ok(ANY_ORIGIN.to_owned());
		};
		let concrete = self
			.state
			.lock()
			.concrete_origin
			.clone()
			.ok_or_else(|| TransportError::ProtocolViolation("remote origin is unknown before SYN is received".into()))?;
		if concrete == "null" && allowed.iter().any(AllowedOrigin::is_any) {
			return Ok(ANY_ORIGIN.to_owned());
		}
		Ok(concrete)
	}

	fn send(self: &Arc<Self>, envelope: MessageEnvelope, transfer: Vec<MessagePort>) -> Result<()> {
		if self.state.lock().destroyed {
			return Err(TransportError::Destroyed);
		}
		let span = self.span();
		let data = envelope.to_value().map_err(|err| TransportError::DataClone(err.to_string()))?;
		tracing::trace!(parent: &span, transport = self.kind, kind = envelope.message.kind(), "tether.transport.send");

		match &envelope.message {
			Message::Syn { .. } => self.remote.post_message(&self.local, data, ANY_ORIGIN, transfer),
			Message::Ack1 { .. } => {
				let origin = self.target_origin()?;
				self.remote.post_message(&self.local, data, &origin, transfer)
			}
			Message::Ack2 { .. } => {
				let origin = self.target_origin()?;
				let (ours, theirs) = MessageChannel::new();
				let mut ports = Vec::with_capacity(transfer.len() + 1);
				ports.push(theirs);
				ports.extend(transfer);
				if let Err(err) = self.remote.post_message(&self.local, data, &origin, ports) {
					ours.close();
					return Err(err);
				}

				let (stale, deferred) = {
					let mut state = self.state.lock();
					if state.destroyed {
						drop(state);
						ours.close();
						return Ok(());
					}
					let deferred = state.dispatching;
					if deferred {
						state.deferred_start = Some(ours.clone());
					}
					(state.port.replace(ours.clone()), deferred)
				};
				if let Some(stale) = stale {
					stale.close();
				}
				if !deferred {
					self.start_port(&ours, &span);
					tracing::debug!(parent: &span, transport = self.kind, "tether.transport.side_channel_opened");
				}
				Ok(())
			}
			_ => {
				let port = self.state.lock().port.clone().ok_or_else(|| {
					TransportError::ProtocolViolation(format!("{} side channel is not established", self.kind))
				})?;
				port.post_message(data, transfer)
			}
		}
	}
}
