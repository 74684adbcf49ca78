//! Local method registry served to the remote side.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tether_proto::{MethodPath, SerializedError};
use tether_transport::MessagePort;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Outcome of a local method.
pub type MethodResult = Result<MethodReply, MethodError>;

pub(crate) type Method = Arc<dyn Fn(Args) -> BoxFuture<MethodResult> + Send + Sync>;

/// Positional arguments of an incoming call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
	/// Wraps raw argument values.
	pub fn new(values: Vec<Value>) -> Self {
		Self(values)
	}

	/// Returns the number of arguments the caller passed.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no arguments were passed.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns the raw argument at `index`.
	pub fn get(&self, index: usize) -> Option<&Value> {
		self.0.get(index)
	}

	/// Decodes the argument at `index`. A missing argument decodes from `null`.
	///
	/// # Errors
	///
	/// A `TypeError` [`MethodError`] if the value does not decode as `T`.
	pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T, MethodError> {
		let value = self.0.get(index).cloned().unwrap_or(Value::Null);
		serde_json::from_value(value)
			.map_err(|err| MethodError::Error(SerializedError::named("TypeError", format!("argument {index}: {err}"))))
	}

	/// Returns the raw argument values.
	pub fn into_vec(self) -> Vec<Value> {
		self.0
	}
}

/// Return value of a method, with ports to move to the caller.
#[derive(Debug, Default)]
pub struct MethodReply {
	/// Value sent back to the caller.
	pub value: Value,
	/// Ports transferred alongside the value.
	pub transfer: Vec<MessagePort>,
}

impl MethodReply {
	/// Creates a reply without transfers.
	pub fn new(value: Value) -> Self {
		Self {
			value,
			transfer: Vec::new(),
		}
	}

	/// Adds ports to transfer with the reply.
	#[must_use]
	pub fn with_transfer(mut self, transfer: Vec<MessagePort>) -> Self {
		self.transfer.extend(transfer);
		self
	}
}

/// Failure of a local method, sent back as an error reply.
///
/// Any [`std::error::Error`] converts into [`MethodError::Error`], so `?` works inside
/// method bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodError {
	/// A structured error; the caller sees [`crate::RemoteError::Error`].
	Error(SerializedError),
	/// An arbitrary rejection value; the caller sees [`crate::RemoteError::Value`].
	Value(Value),
}

impl MethodError {
	/// Creates a plain `Error` with `message`.
	pub fn message(message: impl Into<String>) -> Self {
		Self::Error(SerializedError::new(message))
	}

	/// Rejects with an arbitrary value.
	pub fn value(value: impl Into<Value>) -> Self {
		Self::Value(value.into())
	}
}

impl<E: std::error::Error + 'static> From<E> for MethodError {
	fn from(err: E) -> Self {
		Self::Error(SerializedError::from_error("Error", &err))
	}
}

/// Methods exposed to the remote side, keyed by path.
///
/// ```ignore
/// let methods = Methods::new()
/// 	.method_sync("multiply", |args| Ok(args.arg::<i64>(0)? * args.arg::<i64>(1)?))
/// 	.nest("auth", Methods::new().method("login", login));
/// ```
#[derive(Clone, Default)]
pub struct Methods {
	entries: BTreeMap<MethodPath, Method>,
}

impl Methods {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers an async method returning any serializable value.
	#[must_use]
	pub fn method<P, F, Fut, T>(self, path: P, method: F) -> Self
	where
		P: Into<MethodPath>,
		F: Fn(Args) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, MethodError>> + Send + 'static,
		T: Serialize + Send + 'static,
	{
		self.method_reply(path, move |args| {
			let fut = method(args);
			async move {
				let value = fut.await?;
				Ok::<_, MethodError>(MethodReply::new(serde_json::to_value(value)?))
			}
		})
	}

	/// Registers a method that completes synchronously.
	#[must_use]
	pub fn method_sync<P, F, T>(self, path: P, method: F) -> Self
	where
		P: Into<MethodPath>,
		F: Fn(Args) -> Result<T, MethodError> + Send + Sync + 'static,
		T: Serialize,
	{
		self.insert(path.into(), move |args| {
			let reply = method(args).and_then(|value| Ok(MethodReply::new(serde_json::to_value(value)?)));
			Box::pin(std::future::ready(reply))
		})
	}

	/// Registers an async method that controls its reply, including transferred ports.
	#[must_use]
	pub fn method_reply<P, F, Fut>(self, path: P, method: F) -> Self
	where
		P: Into<MethodPath>,
		F: Fn(Args) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = MethodResult> + Send + 'static,
	{
		self.insert(path.into(), move |args| Box::pin(method(args)))
	}

	/// Mounts every method of `methods` under `prefix`.
	#[must_use]
	pub fn nest(mut self, prefix: impl Into<MethodPath>, methods: Methods) -> Self {
		let prefix = prefix.into();
		for (path, method) in methods.entries {
			self.entries.insert(path.prefixed(&prefix), method);
		}
		self
	}

	/// Returns the registered paths in order.
	pub fn paths(&self) -> Vec<MethodPath> {
		self.entries.keys().cloned().collect()
	}

	/// Returns true if a method is registered at `path`.
	pub fn contains(&self, path: &MethodPath) -> bool {
		self.entries.contains_key(path)
	}

	/// Returns the number of registered methods.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns true if nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub(crate) fn get(&self, path: &MethodPath) -> Option<Method> {
		self.entries.get(path).cloned()
	}

	fn insert(mut self, path: MethodPath, method: impl Fn(Args) -> BoxFuture<MethodResult> + Send + Sync + 'static) -> Self {
		if self.entries.insert(path.clone(), Arc::new(method)).is_some() {
			tracing::debug!(path = %path, "tether.methods.replaced");
		}
		self
	}
}

impl fmt::Debug for Methods {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.entries.keys().map(ToString::to_string)).finish()
	}
}
