//! Protocol messages and the envelope that routes them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{CallId, MethodPath, ParticipantId, SerializedError};

/// Namespace tag separating tether traffic from unrelated data on a shared transport.
pub const NAMESPACE: &str = "tether";

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE", rename_all_fields = "camelCase")]
pub enum Message {
	/// Handshake opener, sent by both sides.
	Syn {
		/// Sender's id for this handshake attempt.
		participant_id: ParticipantId,
	},
	/// Leader's acknowledgment advertising its method paths.
	Ack1 {
		/// Paths the leader exposes.
		method_paths: Vec<MethodPath>,
	},
	/// Follower's acknowledgment, completing the handshake.
	Ack2 {
		/// Paths the follower exposes. Absent when the peer does not advertise.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		method_paths: Option<Vec<MethodPath>>,
	},
	/// Remote invocation.
	Call {
		/// Correlation id echoed by the reply.
		id: CallId,
		/// Target method.
		method_path: MethodPath,
		/// Positional arguments.
		#[serde(default)]
		args: Vec<Value>,
	},
	/// Outcome of a call.
	Reply {
		/// Id of the call being answered.
		call_id: CallId,
		/// Return value on success.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		value: Option<Value>,
		/// Rejection payload on failure.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<Value>,
		/// Whether `error` is a [`SerializedError`] rather than an arbitrary value.
		#[serde(default, skip_serializing_if = "std::ops::Not::not")]
		is_error_instance: bool,
	},
	/// Best-effort notice that the sender tore its connection down.
	Destroy,
}

impl Message {
	/// Builds a successful reply.
	pub fn reply_value(call_id: CallId, value: Value) -> Self {
		Self::Reply {
			call_id,
			value: Some(value),
			error: None,
			is_error_instance: false,
		}
	}

	/// Builds a reply carrying a structured error.
	pub fn reply_error(call_id: CallId, error: &SerializedError) -> Self {
		Self::Reply {
			call_id,
			value: None,
			error: Some(serde_json::to_value(error).unwrap_or(Value::Null)),
			is_error_instance: true,
		}
	}

	/// Builds a reply carrying an arbitrary rejection value.
	pub fn reply_rejection(call_id: CallId, value: Value) -> Self {
		Self::Reply {
			call_id,
			value: None,
			error: Some(value),
			is_error_instance: false,
		}
	}

	/// Returns the wire `type` tag, for logging.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Syn { .. } => "SYN",
			Self::Ack1 { .. } => "ACK1",
			Self::Ack2 { .. } => "ACK2",
			Self::Call { .. } => "CALL",
			Self::Reply { .. } => "REPLY",
			Self::Destroy => "DESTROY",
		}
	}
}

/// Outer wrapper routing a [`Message`] to one logical connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
	/// Always [`NAMESPACE`] for envelopes produced by this crate.
	pub namespace: String,
	/// Logical connection sharing the transport, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub channel: Option<String>,
	/// The wrapped message.
	pub message: Message,
}

impl MessageEnvelope {
	/// Wraps `message` for `channel` under the tether namespace.
	pub fn new(channel: Option<String>, message: Message) -> Self {
		Self {
			namespace: NAMESPACE.to_owned(),
			channel,
			message,
		}
	}

	/// Returns true if the envelope belongs to the tether namespace and `channel`.
	pub fn is_for(&self, channel: Option<&str>) -> bool {
		self.namespace == NAMESPACE && self.channel.as_deref() == channel
	}

	/// Encodes the envelope as a dynamic value.
	pub fn to_value(&self) -> serde_json::Result<Value> {
		serde_json::to_value(self)
	}

	/// Decodes an envelope, failing for foreign data.
	pub fn from_value(value: Value) -> serde_json::Result<Self> {
		serde_json::from_value(value)
	}
}
