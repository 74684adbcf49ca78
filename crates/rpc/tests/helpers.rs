//! Shared test utilities for connection tests.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tether_proto::{Message, MessageEnvelope, ParticipantId};
use tether_rpc::{ConnectOptions, Connection, Methods, connect};
use tether_transport::{
	HandlerId, HandlerSet, InitializeOptions, MessageHandler, MessagePort, ReceivedMessage, Transport, TransportError,
	port_transport_pair,
};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Installs a test log subscriber once per test binary.
#[allow(dead_code, reason = "test helper used by individual test files")]
pub fn init_tracing() {
	let _ = tracing_subscriber::fmt()
		.with_test_writer()
		.with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
		.try_init();
}

/// Awaits `fut`, failing the test instead of hanging.
#[allow(dead_code, reason = "test helper used by individual test files")]
pub async fn settle<T>(fut: impl Future<Output = T>) -> T {
	tokio::time::timeout(SETTLE_TIMEOUT, fut).await.expect("future should settle")
}

/// Polls `condition` until it holds.
#[allow(dead_code, reason = "test helper used by individual test files")]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
	settle(async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(1)).await;
		}
	})
	.await;
}

/// Returns an id generator that always yields `id`.
#[allow(dead_code, reason = "test helper used by individual test files")]
pub fn fixed_id(id: &'static str) -> impl Fn() -> String + Send + Sync + 'static {
	move || id.to_owned()
}

/// Connects two sides over a loopback port pair.
#[allow(dead_code, reason = "test helper used by individual test files")]
pub fn connect_pair(a: Methods, b: Methods) -> (Connection, Connection) {
	let (left, right) = port_transport_pair();
	let a = connect(ConnectOptions::new(left).methods(a)).expect("left side connects");
	let b = connect(ConnectOptions::new(right).methods(b)).expect("right side connects");
	(a, b)
}

/// Transport driven by the test: records sends and delivers injected messages synchronously.
#[derive(Default)]
pub struct ScriptedTransport {
	handlers: HandlerSet,
	sent: Mutex<Vec<Message>>,
	initialized: AtomicBool,
	fail_sends: AtomicBool,
	destroyed: AtomicBool,
}

#[allow(dead_code, reason = "test helper used by individual test files")]
impl ScriptedTransport {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn deliver(&self, message: Message) {
		self.handlers.dispatch(&ReceivedMessage {
			envelope: MessageEnvelope::new(None, message),
			transfer: Vec::new(),
		});
	}

	pub fn syn(&self, id: &str) {
		self.deliver(Message::Syn {
			participant_id: ParticipantId::new(id),
		});
	}

	pub fn sent(&self) -> Vec<Message> {
		self.sent.lock().clone()
	}

	pub fn take_sent(&self) -> Vec<Message> {
		std::mem::take(&mut *self.sent.lock())
	}

	pub fn replies(&self) -> usize {
		self.sent.lock().iter().filter(|m| matches!(m, Message::Reply { .. })).count()
	}

	pub fn fail_sends(&self, fail: bool) {
		self.fail_sends.store(fail, Ordering::SeqCst);
	}

	pub fn is_destroyed(&self) -> bool {
		self.destroyed.load(Ordering::SeqCst)
	}

	pub fn handler_count(&self) -> usize {
		self.handlers.len()
	}
}

impl Transport for ScriptedTransport {
	fn initialize(&self, _options: InitializeOptions) -> tether_transport::Result<()> {
		if self.initialized.swap(true, Ordering::SeqCst) {
			return Err(TransportError::AlreadyInitialized);
		}
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
