use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered list of keys locating a function in a nested method tree.
///
/// Displayed and parsed in dotted form, so `["auth", "login"]` is `auth.login`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodPath(Vec<String>);

impl MethodPath {
	/// Creates a path from its segments.
	pub fn new<I, S>(segments: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(segments.into_iter().map(Into::into).collect())
	}

	/// Returns the path segments.
	pub fn segments(&self) -> &[String] {
		&self.0
	}

	/// Returns true for the empty path.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns this path nested under `prefix`.
	#[must_use]
	pub fn prefixed(&self, prefix: &MethodPath) -> Self {
		let mut segments = prefix.0.clone();
		segments.extend(self.0.iter().cloned());
		Self(segments)
	}
}

impl fmt::Display for MethodPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0.join("."))
	}
}

impl From<&str> for MethodPath {
	fn from(dotted: &str) -> Self {
		if dotted.is_empty() {
			return Self::default();
		}
		Self(dotted.split('.').map(str::to_owned).collect())
	}
}

impl From<String> for MethodPath {
	fn from(dotted: String) -> Self {
		Self::from(dotted.as_str())
	}
}

impl From<&MethodPath> for MethodPath {
	fn from(path: &MethodPath) -> Self {
		path.clone()
	}
}

impl From<Vec<String>> for MethodPath {
	fn from(segments: Vec<String>) -> Self {
		Self(segments)
	}
}

impl<const N: usize> From<[&str; N]> for MethodPath {
	fn from(segments: [&str; N]) -> Self {
		Self::new(segments)
	}
}
