//! Broadcast-style message targets with an origin: windows and worker scopes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::port::check_transferable;
use crate::{MessagePort, Result, TransportError, spawn};

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// Target origin accepting any receiver.
pub const ANY_ORIGIN: &str = "*";

/// An event observed by [`Endpoint`] listeners.
#[derive(Debug, Clone)]
pub struct MessageEvent {
	/// Cloned payload. Anything may arrive here, not just protocol envelopes.
	pub data: Value,
	/// Origin of the sending endpoint.
	pub origin: String,
	/// The sending endpoint.
	pub source: Option<Endpoint>,
	/// Ports transferred with the event.
	pub ports: Vec<MessagePort>,
}

type Listener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// Listener registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A message target shared by unrelated traffic, like a browsing context or worker scope.
///
/// Every event posted to an endpoint is delivered, in posting order, to every listener
/// registered at delivery time.
#[derive(Clone)]
pub struct Endpoint {
	inner: Arc<EndpointInner>,
}

struct EndpointInner {
	id: u64,
	origin: String,
	tx: mpsc::UnboundedSender<MessageEvent>,
	listeners: Mutex<Vec<(ListenerId, Listener)>>,
	next_listener: AtomicU64,
}

impl Endpoint {
	/// Creates an endpoint for `origin` and starts its delivery pump.
	pub fn new(origin: impl Into<String>) -> Self {
		let (tx, rx) = mpsc::unbounded_channel();
		let inner = Arc::new(EndpointInner {
			id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed),
			origin: origin.into(),
			tx,
			listeners: Mutex::new(Vec::new()),
			next_listener: AtomicU64::new(0),
		});
		spawn(pump(Arc::downgrade(&inner), rx));
		Self { inner }
	}

	/// Returns this endpoint's origin.
	pub fn origin(&self) -> &str {
		&self.inner.origin
	}

	/// Returns true if both handles refer to the same endpoint.
	pub fn ptr_eq(&self, other: &Endpoint) -> bool {
		Arc::ptr_eq(&self.inner, &other.inner)
	}

	/// Registers a listener for every event delivered to this endpoint.
	pub fn add_listener(&self, listener: impl Fn(&MessageEvent) + Send + Sync + 'static) -> ListenerId {
		let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
		self.inner.listeners.lock().push((id, Arc::new(listener)));
		id
	}

	/// Removes a listener. Unknown ids are ignored.
	pub fn remove_listener(&self, id: ListenerId) {
		self.inner.listeners.lock().retain(|(entry, _)| *entry != id);
	}

	/// Posts `data` to this endpoint on behalf of `source`.
	///
	/// When `target_origin` is neither [`ANY_ORIGIN`] nor this endpoint's origin the
	/// event is dropped without error, so a sender cannot probe where a target navigated.
	///
	/// # Errors
	///
	/// [`TransportError::DataClone`] for an unclonable transfer list,
	/// [`TransportError::Closed`] when the endpoint's pump is gone.
	pub fn post_message(&self, source: &Endpoint, data: Value, target_origin: &str, ports: Vec<MessagePort>) -> Result<()> {
		check_transferable(&ports)?;
		if target_origin != ANY_ORIGIN && target_origin != self.inner.origin {
			tracing::debug!(
				target_origin,
				origin = %self.inner.origin,
				"tether.endpoint.target_origin_mismatch"
			);
			return Ok(());
		}
		let event = MessageEvent {
			data,
			origin: source.origin().to_owned(),
			source: Some(source.clone()),
			ports,
		};
		self.inner.tx.send(event).map_err(|_| TransportError::Closed)
	}
}

async fn pump(inner: Weak<EndpointInner>, mut rx: mpsc::UnboundedReceiver<MessageEvent>) {
	while let Some(event) = rx.recv().await {
		let Some(inner) = inner.upgrade() else {
			break;
		};
		let snapshot: Vec<Listener> = inner.listeners.lock().iter().map(|(_, l)| Arc::clone(l)).collect();
		drop(inner);
		for listener in snapshot {
			listener(&event);
		}
	}
}

impl fmt::Debug for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Endpoint")
			.field("id", &self.inner.id)
			.field("origin", &self.inner.origin)
			.finish()
	}
}
