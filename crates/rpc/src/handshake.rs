//! Symmetric SYN/ACK1/ACK2 rendezvous.
//!
//! Both sides send `SYN` on start, and re-send it whenever a new remote id shows up, so
//! that a `SYN` posted before the other side was listening is always followed by one it
//! can receive. The side with the greater participant id leads: it answers the remote
//! `SYN` with `ACK1`, the follower answers `ACK1` with `ACK2`, and each side completes on
//! the acknowledgment it receives.
//!
//! Completion settles exactly once. A `SYN` carrying a fresh remote id after completion
//! means the remote restarted: the exchange runs again, and its outcome is reported to
//! the rebind callback with the new remote's paths instead of settling a second time.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tether_proto::{Message, MessageEnvelope, MethodPath, ParticipantId};
use tether_transport::{HandlerId, ReceivedMessage, Transport};
use tokio::task::JoinHandle;
use tracing::Span;

use crate::{Error, Result};

/// Remote method paths learned on completion; `None` when the remote did not advertise.
pub(crate) type RemotePaths = Option<Vec<MethodPath>>;

type OnSettled = Box<dyn FnOnce(Result<RemotePaths>) + Send>;
type OnRebound = Arc<dyn Fn(RemotePaths) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
	Init,
	SynSent,
	LeaderAwaitingAck2,
	FollowerAwaitingAck1,
	Complete,
	Failed,
	Stopped,
}

pub(crate) struct HandshakeOptions {
	pub transport: Arc<dyn Transport>,
	pub channel: Option<String>,
	pub participant_id: ParticipantId,
	pub local_paths: Vec<MethodPath>,
	pub timeout: Option<Duration>,
	pub span: Span,
}

/// Drives one handshake attempt over a transport.
#[derive(Clone)]
pub(crate) struct Handshake {
	inner: Arc<Inner>,
}

struct Inner {
	options: HandshakeOptions,
	state: Mutex<State>,
}

struct State {
	phase: Phase,
	last_remote_id: Option<ParticipantId>,
	handler: Option<HandlerId>,
	timer: Option<JoinHandle<()>>,
	on_settled: Option<OnSettled>,
	on_rebound: Option<OnRebound>,
	/// A restarted remote is being handshaken with after completion.
	rebinding: bool,
}

impl Handshake {
	/// Prepares a handshake. `on_settled` runs once, on completion or failure, but never after
	/// [`Handshake::stop`].
	pub(crate) fn new(options: HandshakeOptions, on_settled: impl FnOnce(Result<RemotePaths>) + Send + 'static) -> Self {
		Self {
			inner: Arc::new(Inner {
				options,
				state: Mutex::new(State {
					phase: Phase::Init,
					last_remote_id: None,
					handler: None,
					timer: None,
					on_settled: Some(Box::new(on_settled)),
					on_rebound: None,
					rebinding: false,
				}),
			}),
		}
	}

	/// Sets the callback that receives the paths of a remote that restarted after completion.
	#[must_use]
	pub(crate) fn on_rebound(self, on_rebound: impl Fn(RemotePaths) + Send + Sync + 'static) -> Self {
		self.inner.state.lock().on_rebound = Some(Arc::new(on_rebound));
		self
	}

	/// Subscribes to the transport, sends the first `SYN` and arms the timeout.
	pub(crate) fn start(&self) {
		let inner = &self.inner;
		let weak = Arc::downgrade(inner);
		let handler = inner.options.transport.add_message_handler(Arc::new(move |received: &ReceivedMessage| {
			if let Some(inner) = weak.upgrade() {
				inner.on_message(&received.envelope.message);
			}
		}));
		{
			let mut state = inner.state.lock();
			state.handler = Some(handler);
			state.phase = Phase::SynSent;
		}

		if let Some(timeout) = inner.options.timeout {
			let weak = Arc::downgrade(inner);
			let timer = tether_transport::spawn(async move {
				tokio::time::sleep(timeout).await;
				if let Some(inner) = weak.upgrade() {
					inner.fail(Error::ConnectionTimeout(timeout));
				}
			});
			let mut state = inner.state.lock();
			if state.on_settled.is_some() {
				state.timer = Some(timer);
			} else {
				timer.abort();
			}
		}

		tracing::debug!(parent: &inner.options.span, "tether.handshake.started");
		inner.send_syn();
	}

	/// Detaches from the transport and cancels the timer without settling.
	pub(crate) fn stop(&self) {
		let (handler, timer) = {
			let mut state = self.inner.state.lock();
			state.phase = Phase::Stopped;
			state.on_settled = None;
			state.on_rebound = None;
			(state.handler.take(), state.timer.take())
		};
		if let Some(timer) = timer {
			timer.abort();
		}
		if let Some(handler) = handler {
			self.inner.options.transport.remove_message_handler(handler);
		}
	}

	#[cfg(test)]
	pub(crate) fn phase(&self) -> Phase {
		self.inner.state.lock().phase
	}
}

impl Inner {
	fn is_stopped(&self) -> bool {
		matches!(self.state.lock().phase, Phase::Stopped | Phase::Failed)
	}

	fn on_message(&self, message: &Message) {
		match message {
			Message::Syn { participant_id } => self.on_syn(participant_id),
			Message::Ack1 { method_paths } => self.on_ack1(method_paths),
			Message::Ack2 { method_paths } => self.on_ack2(method_paths.clone()),
			_ => {}
		}
	}

	fn on_syn(&self, remote_id: &ParticipantId) {
		let local_id = &self.options.participant_id;
		let is_leader = {
			let mut state = self.state.lock();
			if matches!(state.phase, Phase::Stopped | Phase::Failed) {
				return;
			}
			if remote_id == local_id {
				return;
			}
			if state.last_remote_id.as_ref() == Some(remote_id) {
				tracing::trace!(parent: &self.options.span, remote_id = %remote_id, "tether.handshake.duplicate_syn");
				return;
			}
			if state.phase == Phase::Complete {
				tracing::debug!(parent: &self.options.span, remote_id = %remote_id, "tether.handshake.remote_restarted");
				state.rebinding = true;
			}
			state.last_remote_id = Some(remote_id.clone());
			let is_leader = local_id > remote_id;
			if state.phase != Phase::Complete {
				state.phase = if is_leader {
					Phase::LeaderAwaitingAck2
				} else {
					Phase::FollowerAwaitingAck1
				};
			}
			is_leader
		};
		tracing::debug!(parent: &self.options.span, remote_id = %remote_id, is_leader, "tether.handshake.syn_received");

		if !self.send_syn() {
			return;
		}
		if is_leader {
			let ack1 = Message::Ack1 {
				method_paths: self.options.local_paths.clone(),
			};
			if self.send(ack1) {
				tracing::debug!(parent: &self.options.span, "tether.handshake.ack1_sent");
			}
		}
	}

	fn on_ack1(&self, remote_paths: &[MethodPath]) {
		if self.is_stopped() {
			return;
		}
		let ack2 = Message::Ack2 {
			method_paths: Some(self.options.local_paths.clone()),
		};
		if !self.send(ack2) {
			return;
		}
		tracing::debug!(parent: &self.options.span, "tether.handshake.ack2_sent");
		self.complete(Some(remote_paths.to_vec()));
	}

	fn on_ack2(&self, remote_paths: RemotePaths) {
		if self.is_stopped() {
			return;
		}
		self.complete(remote_paths);
	}

	fn send_syn(&self) -> bool {
		let syn = Message::Syn {
			participant_id: self.options.participant_id.clone(),
		};
		let sent = self.send(syn);
		if sent {
			tracing::trace!(parent: &self.options.span, "tether.handshake.syn_sent");
		}
		sent
	}

	/// Sends a handshake message, failing the handshake on a transport error.
	fn send(&self, message: Message) -> bool {
		let envelope = MessageEnvelope::new(self.options.channel.clone(), message);
		match self.options.transport.send_message(envelope, Vec::new()) {
			Ok(()) => true,
			Err(err) => {
				self.fail(Error::transmission(&err));
				false
			}
		}
	}

	fn complete(&self, remote_paths: RemotePaths) {
		let (on_settled, timer) = {
			let mut state = self.state.lock();
			let Some(on_settled) = state.on_settled.take() else {
				let rebound = if state.rebinding { state.on_rebound.clone() } else { None };
				state.rebinding = false;
				drop(state);
				self.rebind(rebound, remote_paths);
				return;
			};
			state.phase = Phase::Complete;
			(on_settled, state.timer.take())
		};
		if let Some(timer) = timer {
			timer.abort();
		}
		tracing::debug!(
			parent: &self.options.span,
			remote_paths = remote_paths.as_ref().map(Vec::len),
			"tether.handshake.complete"
		);
		on_settled(Ok(remote_paths));
	}

	fn rebind(&self, on_rebound: Option<OnRebound>, remote_paths: RemotePaths) {
		let Some(on_rebound) = on_rebound else {
			tracing::trace!(parent: &self.options.span, "tether.handshake.already_complete");
			return;
		};
		tracing::debug!(
			parent: &self.options.span,
			remote_paths = remote_paths.as_ref().map(Vec::len),
			"tether.handshake.rebound"
		);
		on_rebound(remote_paths);
	}

	fn fail(&self, err: Error) {
		let (on_settled, timer, handler) = {
			let mut state = self.state.lock();
			let Some(on_settled) = state.on_settled.take() else {
				tracing::warn!(parent: &self.options.span, error = %err, "tether.handshake.late_failure");
				return;
			};
			state.phase = Phase::Failed;
			(on_settled, state.timer.take(), state.handler.take())
		};
		if let Some(timer) = timer {
			timer.abort();
		}
		if let Some(handler) = handler {
			self.options.transport.remove_message_handler(handler);
		}
		tracing::debug!(parent: &self.options.span, error = %err, "tether.handshake.failed");
		on_settled(Err(err));
	}
}
