//! Participant and call id generation.

use std::sync::Arc;

/// Produces the participant id for a connection attempt.
///
/// Ids only need equality and a total order; the side holding the greater id leads the
/// handshake, so the generator should be random enough that two sides never collide.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Returns the default generator, producing UUID v4 text.
pub fn uuid_id_generator() -> IdGenerator {
	Arc::new(|| uuid::Uuid::new_v4().to_string())
}

/// Simple counter-based call id generator.
///
/// Ids are never reused for the lifetime of the counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterIdGen(pub u64);

impl CounterIdGen {
	/// Creates a new counter starting at 0.
	#[must_use]
	pub const fn new() -> Self {
		Self(0)
	}

	/// Generates the next unique ID and increments the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> u64 {
		let id = self.0;
		self.0 += 1;
		id
	}
}
