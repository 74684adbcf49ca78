//! Outgoing calls to the remote side's methods.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use parking_lot::Mutex;
use pin_project_lite::pin_project;
use serde_json::Value;
use tether_proto::{CallId, Message, MessageEnvelope, MethodPath};
use tether_transport::{HandlerId, MessagePort, ReceivedMessage, Transport};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::Span;

use crate::id::CounterIdGen;
use crate::{Error, Result};

/// Per-call settings, passed separately from the call arguments.
#[derive(Debug, Default)]
pub struct CallOptions {
	/// Rejects the call with a method-call timeout if no reply arrives in time.
	pub timeout: Option<Duration>,
	/// Ports moved to the remote side with the call.
	pub transfer: Vec<MessagePort>,
}

impl CallOptions {
	/// Sets the call timeout.
	#[must_use]
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Adds ports to transfer with the call.
	#[must_use]
	pub fn transfer(mut self, ports: impl IntoIterator<Item = MessagePort>) -> Self {
		self.transfer.extend(ports);
		self
	}
}

/// Value a remote method returned, with any ports it transferred.
#[derive(Debug)]
pub struct Returned {
	/// The returned value.
	pub value: Value,
	/// Ports moved across with the reply.
	pub transfer: Vec<MessagePort>,
}

/// Handle for calling the methods the remote side advertised.
///
/// Cheap to clone; all clones share one pending-call table. After the connection is
/// destroyed every call fails synchronously with [`Error::ConnectionDestroyed`].
#[derive(Clone)]
pub struct RemoteProxy {
	inner: Arc<Inner>,
}

struct Inner {
	transport: Arc<dyn Transport>,
	channel: Option<String>,
	paths: Option<Vec<MethodPath>>,
	span: Span,
	state: Mutex<State>,
}

struct State {
	ids: CounterIdGen,
	pending: HashMap<CallId, PendingCall>,
	disposed: bool,
	handler: Option<HandlerId>,
}

struct PendingCall {
	path: MethodPath,
	tx: oneshot::Sender<Result<Returned>>,
	timer: Option<JoinHandle<()>>,
}

impl PendingCall {
	fn settle(self, result: Result<Returned>) {
		if let Some(timer) = self.timer {
			timer.abort();
		}
		// The caller may have dropped its future.
		let _ = self.tx.send(result);
	}
}

impl RemoteProxy {
	/// Binds a proxy to `paths`, or to any path when the remote did not advertise them.
	pub(crate) fn new(transport: Arc<dyn Transport>, channel: Option<String>, paths: Option<Vec<MethodPath>>, span: Span) -> Self {
		let inner = Arc::new(Inner {
			transport,
			channel,
			paths,
			span,
			state: Mutex::new(State {
				ids: CounterIdGen::new(),
				pending: HashMap::new(),
				disposed: false,
				handler: None,
			}),
		});
		let weak = Arc::downgrade(&inner);
		let handler = inner.transport.add_message_handler(Arc::new(move |received: &ReceivedMessage| {
			if let Some(inner) = weak.upgrade() {
				inner.on_message(received);
			}
		}));
		inner.state.lock().handler = Some(handler);
		Self { inner }
	}

	/// Returns the advertised paths, or `None` if the proxy accepts any path.
	pub fn paths(&self) -> Option<&[MethodPath]> {
		self.inner.paths.as_deref()
	}

	/// Returns a callable for `path` if the remote advertised it.
	pub fn method(&self, path: impl Into<MethodPath>) -> Option<RemoteMethod> {
		let path = path.into();
		let known = self.inner.paths.as_ref().is_none_or(|paths| paths.contains(&path));
		known.then(|| RemoteMethod {
			proxy: self.clone(),
			path,
		})
	}

	/// Returns one callable per advertised path.
	pub fn methods(&self) -> Vec<RemoteMethod> {
		self.paths()
			.unwrap_or_default()
			.iter()
			.map(|path| RemoteMethod {
				proxy: self.clone(),
				path: path.clone(),
			})
			.collect()
	}

	/// Calls `path` with positional `args`.
	///
	/// # Errors
	///
	/// [`Error::ConnectionDestroyed`] if the connection is already destroyed. Every other
	/// failure is reported by the returned future.
	pub fn call(&self, path: impl Into<MethodPath>, args: Vec<Value>) -> Result<CallFuture> {
		self.call_with(path, args, CallOptions::default())
	}

	/// Calls `path` with positional `args` and per-call `options`.
	///
	/// # Errors
	///
	/// [`Error::ConnectionDestroyed`] if the connection is already destroyed.
	pub fn call_with(&self, path: impl Into<MethodPath>, args: Vec<Value>, options: CallOptions) -> Result<CallFuture> {
		let inner = &self.inner;
		let path = path.into();
		let (tx, rx) = oneshot::channel();
		let id = {
			let mut state = inner.state.lock();
			if state.disposed {
				return Err(Error::destroyed_call(&path));
			}
			let id = CallId::from(state.ids.next());
			state.pending.insert(
				id.clone(),
				PendingCall {
					path: path.clone(),
					tx,
					timer: None,
				},
			);
			id
		};
		let future = CallFuture {
			rx,
			path: path.clone(),
			_guard: PendingGuard {
				proxy: Arc::downgrade(inner),
				id: id.clone(),
			},
		};

		tracing::trace!(parent: &inner.span, call_id = %id, path = %path, "tether.call.send");
		let call = Message::Call {
			id: id.clone(),
			method_path: path,
			args,
		};
		let envelope = MessageEnvelope::new(inner.channel.clone(), call);
		if let Err(err) = inner.transport.send_message(envelope, options.transfer) {
			tracing::debug!(parent: &inner.span, call_id = %id, error = %err, "tether.call.send_failed");
			inner.settle(&id, Err(Error::transmission(&err)));
			return Ok(future);
		}

		if let Some(timeout) = options.timeout {
			inner.arm_timeout(&id, timeout);
		}
		Ok(future)
	}

	/// Rejects every pending call with [`Error::ConnectionDestroyed`] and refuses new ones.
	pub(crate) fn dispose(&self) {
		let (pending, handler) = {
			let mut state = self.inner.state.lock();
			if state.disposed {
				return;
			}
			state.disposed = true;
			(std::mem::take(&mut state.pending), state.handler.take())
		};
		if let Some(handler) = handler {
			self.inner.transport.remove_message_handler(handler);
		}
		tracing::debug!(parent: &self.inner.span, pending = pending.len(), "tether.remote_proxy.disposed");
		for (_, call) in pending {
			let err = Error::destroyed_call(&call.path);
			call.settle(Err(err));
		}
	}

	/// Returns true once the connection has been destroyed.
	pub fn is_disposed(&self) -> bool {
		self.inner.state.lock().disposed
	}
}

impl fmt::Debug for RemoteProxy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RemoteProxy")
			.field("paths", &self.inner.paths)
			.field("disposed", &self.is_disposed())
			.finish_non_exhaustive()
	}
}

impl Inner {
	fn on_message(&self, received: &ReceivedMessage) {
		let Message::Reply {
			call_id,
			value,
			error,
			is_error_instance,
		} = &received.envelope.message
		else {
			return;
		};
		let result = match error {
			Some(error) => Err(Error::from_reply(error.clone(), *is_error_instance)),
			None => Ok(Returned {
				value: value.clone().unwrap_or(Value::Null),
				transfer: received.transfer.clone(),
			}),
		};
		if !self.settle(call_id, result) {
			tracing::trace!(parent: &self.span, call_id = %call_id, "tether.call.unmatched_reply");
		}
	}

	/// Settles and forgets a pending call. Returns false if it was already settled.
	fn settle(&self, id: &CallId, result: Result<Returned>) -> bool {
		let Some(call) = self.state.lock().pending.remove(id) else {
			return false;
		};
		call.settle(result);
		true
	}

	fn arm_timeout(self: &Arc<Self>, id: &CallId, timeout: Duration) {
		let weak = Arc::downgrade(self);
		let timer_id = id.clone();
		let timer = tether_transport::spawn(async move {
			tokio::time::sleep(timeout).await;
			if let Some(inner) = weak.upgrade() {
				inner.time_out(&timer_id, timeout);
			}
		});
		let mut state = self.state.lock();
		match state.pending.get_mut(id) {
			Some(call) => call.timer = Some(timer),
			None => timer.abort(),
		}
	}

	fn time_out(&self, id: &CallId, timeout: Duration) {
		let Some(call) = self.state.lock().pending.remove(id) else {
			return;
		};
		tracing::debug!(parent: &self.span, call_id = %id, path = %call.path, "tether.call.timeout");
		let err = Error::MethodCallTimeout {
			path: call.path.clone(),
			timeout,
		};
		call.settle(Err(err));
	}
}

/// A remote method bound to one advertised path.
#[derive(Clone)]
pub struct RemoteMethod {
	proxy: RemoteProxy,
	path: MethodPath,
}

impl RemoteMethod {
	/// Returns the method path.
	pub fn path(&self) -> &MethodPath {
		&self.path
	}

	/// Calls the method with positional `args`.
	///
	/// # Errors
	///
	/// [`Error::ConnectionDestroyed`] if the connection is already destroyed.
	pub fn call(&self, args: Vec<Value>) -> Result<CallFuture> {
		self.proxy.call(&self.path, args)
	}

	/// Calls the method with positional `args` and per-call `options`.
	///
	/// # Errors
	///
	/// [`Error::ConnectionDestroyed`] if the connection is already destroyed.
	pub fn call_with(&self, args: Vec<Value>, options: CallOptions) -> Result<CallFuture> {
		self.proxy.call_with(&self.path, args, options)
	}
}

impl fmt::Debug for RemoteMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("RemoteMethod").field(&self.path.to_string()).finish()
	}
}

/// Forgets the pending call when its future is dropped unsettled.
struct PendingGuard {
	proxy: Weak<Inner>,
	id: CallId,
}

impl Drop for PendingGuard {
	fn drop(&mut self) {
		if let Some(inner) = self.proxy.upgrade()
			&& let Some(call) = inner.state.lock().pending.remove(&self.id)
			&& let Some(timer) = call.timer
		{
			timer.abort();
		}
	}
}

pin_project! {
	/// Resolves to the value returned by a remote call.
	///
	/// Dropping the future abandons the call: a reply arriving later is ignored.
	pub struct CallFuture {
		#[pin]
		rx: oneshot::Receiver<Result<Returned>>,
		path: MethodPath,
		_guard: PendingGuard,
	}
}

impl CallFuture {
	/// Resolves to the returned value together with any ports the remote transferred.
	pub async fn returned(self) -> Result<Returned> {
		let Self { rx, path, _guard: guard } = self;
		let outcome = rx.await;
		drop(guard);
		flatten(outcome, &path)
	}

	/// Returns the called path.
	pub fn path(&self) -> &MethodPath {
		&self.path
	}
}

impl fmt::Debug for CallFuture {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CallFuture").field("path", &self.path.to_string()).finish_non_exhaustive()
	}
}

impl Future for CallFuture {
	type Output = Result<Value>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		let this = self.project();
		let outcome = ready!(this.rx.poll(cx));
		Poll::Ready(flatten(outcome, this.path).map(|returned| returned.value))
	}
}

fn flatten(outcome: std::result::Result<Result<Returned>, oneshot::error::RecvError>, path: &MethodPath) -> Result<Returned> {
	outcome.unwrap_or_else(|_| Err(Error::destroyed_call(path)))
}
