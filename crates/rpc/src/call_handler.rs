use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tether_proto::{CallId, ErrorCode, Message, MessageEnvelope, MethodPath, SerializedError};
use tether_transport::{HandlerId, MessagePort, ReceivedMessage, Transport};
use tracing::Span;

use crate::methods::{Args, MethodError, MethodResult, Methods};

/// Serves incoming `CALL`s from the local [`Methods`].
///
/// Every call runs on its own task, so slow methods never hold up dispatch and replies go
/// out in completion order.
pub(crate) struct CallHandler {
	inner: Arc<Inner>,
}

struct Inner {
	transport: Arc<dyn Transport>,
	channel: Option<String>,
	methods: Methods,
	span: Span,
	disposed: AtomicBool,
	handler: Mutex<Option<HandlerId>>,
}

impl CallHandler {
	/// Starts serving `methods` over `transport`.
	pub(crate) fn new(transport: Arc<dyn Transport>, channel: Option<String>, methods: Methods, span: Span) -> Self {
		let inner = Arc::new(Inner {
			transport,
			channel,
			methods,
			span,
			disposed: AtomicBool::new(false),
			handler: Mutex::new(None),
		});
		let weak = Arc::downgrade(&inner);
		let handler = inner.transport.add_message_handler(Arc::new(move |received: &ReceivedMessage| {
			if let Some(inner) = weak.upgrade()
				&& let Message::Call { id, method_path, args } = &received.envelope.message
			{
				inner.on_call(id.clone(), method_path.clone(), args.clone());
			}
		}));
		*inner.handler.lock() = Some(handler);
		Self { inner }
	}

	/// Stops serving. Calls still running finish, but their replies are dropped.
	pub(crate) fn dispose(&self) {
		if self.inner.disposed.swap(true, Ordering::AcqRel) {
			return;
		}
		if let Some(handler) = self.inner.handler.lock().take() {
			self.inner.transport.remove_message_handler(handler);
		}
		tracing::debug!(parent: &self.inner.span, "tether.call_handler.disposed");
	}
}

impl Inner {
	fn on_call(self: Arc<Self>, id: CallId, path: MethodPath, args: Vec<Value>) {
		if self.disposed.load(Ordering::Acquire) {
			return;
		}
		tracing::trace!(parent: &self.span, call_id = %id, path = %path, "tether.call.received");

		let Some(method) = self.methods.get(&path) else {
			tracing::debug!(parent: &self.span, call_id = %id, path = %path, "tether.call.method_not_found");
			let not_found = SerializedError::with_code(ErrorCode::MethodNotFound, format!("Method `{path}` is not found."));
			self.reply(id, Err(MethodError::Error(not_found)));
			return;
		};

		tether_transport::spawn(async move {
			let outcome = method(Args::new(args)).await;
			self.reply(id, outcome);
		});
	}

	fn reply(&self, id: CallId, outcome: MethodResult) {
		if self.disposed.load(Ordering::Acquire) {
			tracing::trace!(parent: &self.span, call_id = %id, "tether.call.reply_after_dispose");
			return;
		}
		let (message, transfer): (Message, Vec<MessagePort>) = match outcome {
			Ok(reply) => (Message::reply_value(id.clone(), reply.value), reply.transfer),
			Err(MethodError::Error(err)) => (Message::reply_error(id.clone(), &err), Vec::new()),
			Err(MethodError::Value(value)) => (Message::reply_rejection(id.clone(), value), Vec::new()),
		};

		let Err(err) = self.transport.send_message(self.envelope(message), transfer) else {
			tracing::trace!(parent: &self.span, call_id = %id, "tether.call.replied");
			return;
		};

		// Every call gets a reply, even when its own reply cannot be carried.
		tracing::warn!(parent: &self.span, call_id = %id, error = %err, "tether.call.reply_failed");
		let fallback = SerializedError::with_code(ErrorCode::TransmissionFailed, format!("Failed to send reply: {err}"));
		if let Err(err) = self.transport.send_message(self.envelope(Message::reply_error(id.clone(), &fallback)), Vec::new()) {
			tracing::warn!(parent: &self.span, call_id = %id, error = %err, "tether.call.fallback_reply_failed");
		}
	}

	fn envelope(&self, message: Message) -> MessageEnvelope {
		MessageEnvelope::new(self.channel.clone(), message)
	}
}
