use std::sync::Arc;

use parking_lot::Mutex;

use crate::ReceivedMessage;

/// Callback invoked for every accepted incoming envelope.
pub type MessageHandler = Arc<dyn Fn(&ReceivedMessage) + Send + Sync>;

/// Subscription handle returned by [`crate::Transport::add_message_handler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Subscriber set shared by the transport implementations.
///
/// Dispatch snapshots the set before calling out, so handlers may subscribe or
/// unsubscribe (themselves included) while being invoked.
#[derive(Default)]
pub struct HandlerSet {
	inner: Mutex<Subscribers>,
}

#[derive(Default)]
struct Subscribers {
	next_id: u64,
	entries: Vec<(HandlerId, MessageHandler)>,
}

impl HandlerSet {
	/// Creates an empty set.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a handler.
	pub fn add(&self, handler: MessageHandler) -> HandlerId {
		let mut inner = self.inner.lock();
		let id = HandlerId(inner.next_id);
		inner.next_id += 1;
		inner.entries.push((id, handler));
		id
	}

	/// Removes a handler, returning whether it was present.
	pub fn remove(&self, id: HandlerId) -> bool {
		let mut inner = self.inner.lock();
		let before = inner.entries.len();
		inner.entries.retain(|(entry_id, _)| *entry_id != id);
		inner.entries.len() != before
	}

	/// Drops every handler.
	pub fn clear(&self) {
		self.inner.lock().entries.clear();
	}

	/// Returns the number of subscribed handlers.
	pub fn len(&self) -> usize {
		self.inner.lock().entries.len()
	}

	/// Returns true if nothing is subscribed.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Delivers `message` to every handler subscribed at the time of the call.
	pub fn dispatch(&self, message: &ReceivedMessage) {
		let snapshot: Vec<MessageHandler> = self.inner.lock().entries.iter().map(|(_, h)| Arc::clone(h)).collect();
		for handler in snapshot {
			handler(message);
		}
	}
}
