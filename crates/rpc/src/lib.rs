//! Bidirectional RPC between two isolated contexts.
//!
//! Neither side knows whether the other is ready, so [`connect`] first runs a symmetric
//! rendezvous over a [`tether_transport::Transport`]:
//! * Both sides send `SYN` carrying a random participant id.
//! * The side with the greater id leads and answers with `ACK1`, advertising its method paths.
//! * The follower answers `ACK1` with `ACK2`, advertising its own paths.
//!
//! Once a side completes, it serves its [`Methods`] to incoming calls and hands out a
//! [`RemoteProxy`] for calling the remote side's methods. Calls are correlated by id,
//! optionally bounded by a per-call timeout, and all rejected when the connection is
//! destroyed.
//!
//! ```ignore
//! let methods = Methods::new().method_sync("multiply", |args| Ok(args.arg::<i64>(0)? * args.arg::<i64>(1)?));
//! let connection = connect(ConnectOptions::new(transport).methods(methods).timeout(Duration::from_secs(5)))?;
//! let remote = connection.remote().await?;
//! let product = remote.call("multiply", vec![json!(2), json!(5)])?.await?;
//! ```

#![warn(missing_docs)]

mod call_handler;
mod connection;
mod error;
mod handshake;
mod id;
mod methods;
mod remote_proxy;
#[cfg(test)]
mod test_support;

pub use connection::{ConnectOptions, ConnectSettings, Connection, ConnectionState, connect};
pub use error::{Error, RemoteError, Result};
pub use id::{CounterIdGen, IdGenerator, uuid_id_generator};
pub use methods::{Args, MethodError, MethodReply, MethodResult, Methods};
pub use remote_proxy::{CallFuture, CallOptions, RemoteMethod, RemoteProxy, Returned};
pub use tether_proto::{ErrorCode, MethodPath, SerializedError, Value};
