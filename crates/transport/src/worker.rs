use crate::side_channel::{Boundary, SideChannel};
use crate::{Endpoint, HandlerId, InitializeOptions, MessageEnvelope, MessageHandler, MessagePort, Result, Transport};

/// Transport between a host and a worker scope.
///
/// Behaves like [`crate::WindowTransport`] without origin or source filtering: the host
/// guarantees that a worker shares its origin.
pub struct WorkerTransport {
	channel: SideChannel,
}

impl WorkerTransport {
	/// Creates a transport reading from `local` and posting to `remote`.
	///
	/// On the host side `local` is where the worker's messages arrive and `remote` is the
	/// worker; inside the worker the roles are swapped.
	pub fn new(local: Endpoint, remote: Endpoint) -> Self {
		Self {
			channel: SideChannel::new("worker", local, remote, Boundary::Worker),
		}
	}
}

impl Transport for WorkerTransport {
	fn initialize(&self, options: InitializeOptions) -> Result<()> {
		self.channel.initialize(options)
	}

	fn send_message(&self, envelope: MessageEnvelope, transfer: Vec<MessagePort>) -> Result<()> {
		self.channel.send_message(envelope, transfer)
	}

	fn add_message_handler(&self, handler: MessageHandler) -> HandlerId {
		self.channel.add_message_handler(handler)
	}

	fn remove_message_handler(&self, id: HandlerId) {
		self.channel.remove_message_handler(id);
	}

	fn destroy(&self) {
		self.channel.destroy();
	}
}
