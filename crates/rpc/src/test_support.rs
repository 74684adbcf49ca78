use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tether_proto::{Message, MessageEnvelope};
use tether_transport::{
	HandlerId, HandlerSet, InitializeOptions, MessageHandler, MessagePort, ReceivedMessage, Transport, TransportError,
};

/// Synchronous transport that records what is sent and delivers what the test injects.
#[derive(Default)]
pub(crate) struct RecordingTransport {
	handlers: HandlerSet,
	sent: Mutex<Vec<Message>>,
	fail_sends: AtomicBool,
	destroyed: AtomicBool,
}

impl RecordingTransport {
	pub(crate) fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn deliver(&self, message: Message) {
		self.deliver_with(message, Vec::new());
	}

	pub(crate) fn deliver_with(&self, message: Message, transfer: Vec<MessagePort>) {
		self.handlers.dispatch(&ReceivedMessage {
			envelope: MessageEnvelope::new(None, message),
			transfer,
		});
	}

	pub(crate) fn take_sent(&self) -> Vec<Message> {
		std::mem::take(&mut *self.sent.lock())
	}

	pub(crate) fn fail_sends(&self, fail: bool) {
		self.fail_sends.store(fail, Ordering::SeqCst);
	}

	pub(crate) fn is_destroyed(&self) -> bool {
		self.destroyed.load(Ordering::SeqCst)
	}

	pub(crate) fn handler_count(&self) -> usize {
		self.handlers.len()
	}
}

impl Transport for RecordingTransport {
	fn initialize(&self, _options: InitializeOptions) -> tether_transport::Result<()> {
		Ok(())
	}

	fn send_message(&self, envelope: MessageEnvelope, _transfer: Vec<MessagePort>) -> tether_transport::Result<()> {
		if self.fail_sends.load(Ordering::SeqCst) {
			return Err(TransportError::Closed);
		}
		self.sent.lock().push(envelope.message);
		Ok(())
	}

	fn add_message_handler(&self, handler: MessageHandler) -> HandlerId {
		self.handlers.add(handler)
	}

	fn remove_message_handler(&self, id: HandlerId) {
		self.handlers.remove(id);
	}

	fn destroy(&self) {
		self.destroyed.store(true, Ordering::SeqCst);
		self.handlers.clear();
	}
}
