//! Caller-facing connection handle.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_proto::{Message, MessageEnvelope, ParticipantId};
use tether_transport::{HandlerId, InitializeOptions, ReceivedMessage, Transport, TransportError};
use tokio::sync::watch;
use tracing::Span;

use crate::call_handler::CallHandler;
use crate::handshake::{Handshake, HandshakeOptions, RemotePaths};
use crate::id::{IdGenerator, uuid_id_generator};
use crate::methods::Methods;
use crate::remote_proxy::RemoteProxy;
use crate::{Error, Result};

/// Connection settings an application can load from its own configuration.
///
/// ```toml
/// [tether]
/// timeout_ms = 5000
/// channel = "editor"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectSettings {
	/// Handshake timeout in milliseconds. No timeout when absent.
	pub timeout_ms: Option<u64>,
	/// Logical channel sharing the transport.
	pub channel: Option<String>,
}

/// Everything [`connect`] needs.
pub struct ConnectOptions {
	transport: Arc<dyn Transport>,
	methods: Methods,
	timeout: Option<Duration>,
	channel: Option<String>,
	id_generator: IdGenerator,
}

impl ConnectOptions {
	/// Connects over `transport`, exposing no methods, with no timeout.
	pub fn new(transport: impl Transport) -> Self {
		Self {
			transport: Arc::new(transport),
			methods: Methods::new(),
			timeout: None,
			channel: None,
			id_generator: uuid_id_generator(),
		}
	}

	/// Sets the methods exposed to the remote side.
	#[must_use]
	pub fn methods(mut self, methods: Methods) -> Self {
		self.methods = methods;
		self
	}

	/// Fails the handshake if it has not completed after `timeout`.
	#[must_use]
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Selects the logical channel, so several connections can share one underlying target.
	#[must_use]
	pub fn channel(mut self, channel: impl Into<String>) -> Self {
		self.channel = Some(channel.into());
		self
	}

	/// Replaces the participant id generator.
	#[must_use]
	pub fn id_generator(mut self, generate: impl Fn() -> String + Send + Sync + 'static) -> Self {
		self.id_generator = Arc::new(generate);
		self
	}

	/// Applies loaded settings on top of the current options.
	#[must_use]
	pub fn settings(mut self, settings: &ConnectSettings) -> Self {
		if let Some(ms) = settings.timeout_ms {
			self.timeout = Some(Duration::from_millis(ms));
		}
		if let Some(channel) = &settings.channel {
			self.channel = Some(channel.clone());
		}
		self
	}
}

impl fmt::Debug for ConnectOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectOptions")
			.field("methods", &self.methods)
			.field("timeout", &self.timeout)
			.field("channel", &self.channel)
			.finish_non_exhaustive()
	}
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
	/// Handshake in progress.
	Pending,
	/// Handshake complete; the remote proxy is available.
	Established,
	/// Destroyed locally, by the remote side, or by a failed handshake.
	Destroyed,
}

#[derive(Clone)]
enum Status {
	Pending,
	Established(RemoteProxy),
	Failed(Error),
}

/// A connection to the remote side.
///
/// Clones share the same connection. Dropping the last handle destroys the connection
/// as [`Connection::destroy`] does.
///
/// If the remote restarts after the handshake, a fresh [`RemoteProxy`] bound to the new
/// remote's paths replaces the old one, whose pending calls are rejected with
/// [`Error::ConnectionDestroyed`]. Await [`Connection::remote`] again to pick it up.
#[derive(Clone)]
pub struct Connection {
	inner: Arc<Inner>,
}

struct Inner {
	transport: Arc<dyn Transport>,
	channel: Option<String>,
	span: Span,
	status: watch::Sender<Status>,
	parts: Mutex<Parts>,
}

#[derive(Default)]
struct Parts {
	destroyed: bool,
	handshake: Option<Handshake>,
	call_handler: Option<CallHandler>,
	proxy: Option<RemoteProxy>,
	destroy_listener: Option<HandlerId>,
}

/// Starts connecting over the transport in `options`.
///
/// Returns immediately; await [`Connection::remote`] for the handshake outcome.
///
/// # Errors
///
/// [`Error::InvalidArgument`] if the transport is already bound to another connection or
/// cannot be initialized.
pub fn connect(options: ConnectOptions) -> Result<Connection> {
	let ConnectOptions {
		transport,
		methods,
		timeout,
		channel,
		id_generator,
	} = options;
	let participant_id = ParticipantId::new(id_generator());
	let span = tracing::debug_span!(
		"tether.connection",
		channel = channel.as_deref().unwrap_or_default(),
		participant_id = %participant_id,
	);

	let filter_channel = channel.clone();
	let initialize = InitializeOptions::new(move |envelope| envelope.is_for(filter_channel.as_deref())).with_span(span.clone());
	transport.initialize(initialize).map_err(|err| match err {
		TransportError::AlreadyInitialized => Error::InvalidArgument("A transport can only be used for a single connection".into()),
		other => Error::InvalidArgument(other.to_string()),
	})?;

	let inner = Arc::new(Inner {
		transport: Arc::clone(&transport),
		channel: channel.clone(),
		span: span.clone(),
		status: watch::Sender::new(Status::Pending),
		parts: Mutex::new(Parts::default()),
	});

	let weak = Arc::downgrade(&inner);
	let destroy_listener = transport.add_message_handler(Arc::new(move |received: &ReceivedMessage| {
		if matches!(received.envelope.message, Message::Destroy)
			&& let Some(inner) = weak.upgrade()
		{
			tracing::debug!(parent: &inner.span, "tether.connection.remote_destroyed");
			inner.destroy(false);
		}
	}));

	let weak = Arc::downgrade(&inner);
	let rebind = Arc::downgrade(&inner);
	let handshake = Handshake::new(
		HandshakeOptions {
			transport,
			channel,
			participant_id,
			local_paths: methods.paths(),
			timeout,
			span,
		},
		move |outcome| {
			if let Some(inner) = weak.upgrade() {
				inner.on_handshake(outcome, methods);
			}
		},
	)
	.on_rebound(move |remote_paths| {
		if let Some(inner) = rebind.upgrade() {
			inner.on_remote_restart(remote_paths);
		}
	});
	{
		let mut parts = inner.parts.lock();
		parts.destroy_listener = Some(destroy_listener);
		parts.handshake = Some(handshake.clone());
	}
	handshake.start();

	Ok(Connection { inner })
}

impl Connection {
	/// Waits for the handshake and returns the remote proxy.
	///
	/// May be awaited any number of times. Once established, the proxy is returned even
	/// after the connection is destroyed; calls on it then fail with
	/// [`Error::ConnectionDestroyed`].
	///
	/// # Errors
	///
	/// The handshake failure: [`Error::ConnectionTimeout`], [`Error::TransmissionFailed`], or
	/// [`Error::ConnectionDestroyed`] if destroyed before completing.
	pub async fn remote(&self) -> Result<RemoteProxy> {
		let mut status = self.inner.status.subscribe();
		let settled = status
			.wait_for(|status| !matches!(status, Status::Pending))
			.await
			.map(|status| status.clone())
			.map_err(|_| Error::connection_destroyed())?;
		match settled {
			Status::Established(proxy) => Ok(proxy),
			Status::Failed(err) => Err(err),
			Status::Pending => Err(Error::connection_destroyed()),
		}
	}

	/// Returns the current lifecycle state.
	pub fn state(&self) -> ConnectionState {
		if self.inner.parts.lock().destroyed {
			return ConnectionState::Destroyed;
		}
		match &*self.inner.status.borrow() {
			Status::Pending => ConnectionState::Pending,
			Status::Established(_) => ConnectionState::Established,
			Status::Failed(_) => ConnectionState::Destroyed,
		}
	}

	/// Returns the logical channel of this connection.
	pub fn channel(&self) -> Option<&str> {
		self.inner.channel.as_deref()
	}

	/// Notifies the remote side, then tears the connection down. Idempotent.
	///
	/// Synchronous: when this returns, listeners are detached and every pending call has
	/// been rejected with [`Error::ConnectionDestroyed`].
	pub fn destroy(&self) {
		self.inner.destroy(true);
	}
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("channel", &self.inner.channel)
			.field("state", &self.state())
			.finish()
	}
}

impl Inner {
	fn on_handshake(&self, outcome: Result<RemotePaths>, methods: Methods) {
		match outcome {
			Ok(remote_paths) => {
				let mut parts = self.parts.lock();
				if parts.destroyed {
					return;
				}
				let call_handler = CallHandler::new(Arc::clone(&self.transport), self.channel.clone(), methods, self.span.clone());
				let proxy = RemoteProxy::new(Arc::clone(&self.transport), self.channel.clone(), remote_paths, self.span.clone());
				parts.call_handler = Some(call_handler);
				parts.proxy = Some(proxy.clone());
				self.status.send_replace(Status::Established(proxy));
				tracing::debug!(parent: &self.span, "tether.connection.established");
			}
			Err(err) => {
				tracing::debug!(parent: &self.span, error = %err, "tether.connection.handshake_failed");
				self.status.send_replace(Status::Failed(err));
				self.destroy(false);
			}
		}
	}

	fn on_remote_restart(&self, remote_paths: RemotePaths) {
		let stale = {
			let mut parts = self.parts.lock();
			if parts.destroyed {
				return;
			}
			let proxy = RemoteProxy::new(Arc::clone(&self.transport), self.channel.clone(), remote_paths, self.span.clone());
			self.status.send_replace(Status::Established(proxy.clone()));
			parts.proxy.replace(proxy)
		};
		if let Some(stale) = stale {
			stale.dispose();
		}
		tracing::debug!(parent: &self.span, "tether.connection.rebound");
	}

	fn destroy(&self, notify: bool) {
		let parts = {
			let mut parts = self.parts.lock();
			if parts.destroyed {
				return;
			}
			let taken = std::mem::take(&mut *parts);
			parts.destroyed = true;
			taken
		};

		if notify {
			let envelope = MessageEnvelope::new(self.channel.clone(), Message::Destroy);
			if let Err(err) = self.transport.send_message(envelope, Vec::new()) {
				tracing::debug!(parent: &self.span, error = %err, "tether.connection.destroy_notify_failed");
			}
		}
		if let Some(handshake) = parts.handshake {
			handshake.stop();
		}
		if let Some(call_handler) = parts.call_handler {
			call_handler.dispose();
		}
		if let Some(proxy) = parts.proxy {
			proxy.dispose();
		}
		if let Some(listener) = parts.destroy_listener {
			self.transport.remove_message_handler(listener);
		}
		self.transport.destroy();

		self.status.send_if_modified(|status| {
			if matches!(status, Status::Pending) {
				*status = Status::Failed(Error::connection_destroyed());
				true
			} else {
				false
			}
		});
		tracing::debug!(parent: &self.span, notify, "tether.connection.destroyed");
	}
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.destroy(true);
	}
}
