//! Shared wire types for the tether protocol.
//!
//! Two isolated contexts exchange [`MessageEnvelope`]s over a transport: first the
//! three-step handshake (`SYN`, `ACK1`, `ACK2`), then `CALL`/`REPLY` traffic and an
//! optional `DESTROY` notification. Everything here is plain data with serde support;
//! the state machines that drive it live in `tether-rpc`.

#![warn(missing_docs)]

mod error;
mod ids;
mod message;
mod path;

pub use error::{ErrorCode, SerializedError};
pub use ids::{CallId, ParticipantId};
pub use message::{Message, MessageEnvelope, NAMESPACE};
pub use path::MethodPath;
/// Re-export of the dynamic value type carried as call arguments and return values.
pub use serde_json::Value;
