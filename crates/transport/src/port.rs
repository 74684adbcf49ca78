//! Entangled point-to-point message ports.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Result, TransportError, spawn};

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// A message posted through a [`MessagePort`].
#[derive(Debug)]
pub struct PortMessage {
	/// Cloned payload.
	pub data: Value,
	/// Ports transferred with the payload.
	pub ports: Vec<MessagePort>,
}

/// Constructor for a pair of entangled [`MessagePort`]s.
pub struct MessageChannel;

impl MessageChannel {
	/// Creates two ports; posting on one delivers to the other.
	#[allow(clippy::new_ret_no_self, reason = "mirrors the MessageChannel constructor shape")]
	pub fn new() -> (MessagePort, MessagePort) {
		let (tx_a, rx_b) = mpsc::unbounded_channel();
		let (tx_b, rx_a) = mpsc::unbounded_channel();
		let id_a = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);
		let id_b = NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed);

		let a = MessagePort::from_parts(id_a, id_b, tx_a, rx_a);
		let b = MessagePort::from_parts(id_b, id_a, tx_b, rx_b);
		(a, b)
	}
}

/// One end of a [`MessageChannel`].
///
/// Cloning yields another handle to the same port. Messages posted to this port's
/// peer queue up until [`MessagePort::start`] installs a handler, then arrive in order.
#[derive(Clone)]
pub struct MessagePort {
	inner: Arc<PortInner>,
}

struct PortInner {
	id: u64,
	peer_id: u64,
	peer_tx: mpsc::UnboundedSender<PortMessage>,
	state: Mutex<PortState>,
}

struct PortState {
	rx: Option<mpsc::UnboundedReceiver<PortMessage>>,
	pump: Option<JoinHandle<()>>,
	closed: bool,
}

impl MessagePort {
	fn from_parts(
		id: u64,
		peer_id: u64,
		peer_tx: mpsc::UnboundedSender<PortMessage>,
		rx: mpsc::UnboundedReceiver<PortMessage>,
	) -> Self {
		Self {
			inner: Arc::new(PortInner {
				id,
				peer_id,
				peer_tx,
				state: Mutex::new(PortState {
					rx: Some(rx),
					pump: None,
					closed: false,
				}),
			}),
		}
	}

	/// Returns true once [`MessagePort::close`] ran.
	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}

	/// Returns true if both handles refer to the same port.
	pub fn ptr_eq(&self, other: &MessagePort) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Posts `data` to the peer port, moving `transfer` along.
	///
	/// A message to a peer that has been closed is silently dropped.
	///
	/// # Errors
	///
	/// [`TransportError::Closed`] if this port is closed; [`TransportError::DataClone`] if a
	/// transferred port is closed or is one of the two ends of this channel.
	pub fn post_message(&self, data: Value, transfer: Vec<MessagePort>) -> Result<()> {
		if self.is_closed() {
			return Err(TransportError::Closed);
		}
		for port in &transfer {
			if port.inner.id == self.inner.id || port.inner.id == self.inner.peer_id {
				return Err(TransportError::DataClone("a port cannot be transferred through its own channel".into()));
			}
		}
		check_transferable(&transfer)?;

		if self.inner.peer_tx.send(PortMessage { data, ports: transfer }).is_err() {
			tracing::trace!(port = self.inner.id, "tether.port.peer_closed");
		}
		Ok(())
	}

	/// Starts delivering queued and future messages to `handler`, in order.
	///
	/// # Errors
	///
	/// [`TransportError::Closed`] if the port is closed or was already started.
	pub fn start(&self, handler: impl Fn(PortMessage) + Send + Sync + 'static) -> Result<()> {
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(TransportError::Closed);
		}
		let Some(mut rx) = state.rx.take() else {
			return Err(TransportError::Closed);
		};
		state.pump = Some(spawn(async move {
			while let Some(message) = rx.recv().await {
				handler(message);
			}
		}));
		Ok(())
	}

	/// Closes the port. Pending and future messages to it are discarded. Idempotent.
	pub fn close(&self) {
		let mut state = self.inner.state.lock();
		if state.closed {
			return;
		}
		state.closed = true;
		state.rx = None;
		if let Some(pump) = state.pump.take() {
			pump.abort();
		}
		tracing::trace!(port = self.inner.id, "tether.port.closed");
	}
}

impl fmt::Debug for MessagePort {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MessagePort")
			.field("id", &self.inner.id)
			.field("closed", &self.is_closed())
			.finish()
	}
}

/// Rejects transfer lists containing closed ports.
pub(crate) fn check_transferable(transfer: &[MessagePort]) -> Result<()> {
	if transfer.iter().any(MessagePort::is_closed) {
		return Err(TransportError::DataClone("a transferred port is already closed".into()));
	}
	Ok(())
}
