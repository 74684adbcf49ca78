use std::fmt;

use regex::Regex;

use crate::{Result, TransportError};

/// An entry of a window transport's origin allow-list.
#[derive(Clone)]
pub enum AllowedOrigin {
	/// `*`: any origin, including the opaque `null` origin.
	Any,
	/// Exactly this origin.
	Exact(String),
	/// Any origin the pattern matches. Unanchored unless the pattern anchors itself.
	Pattern(Regex),
}

impl AllowedOrigin {
	/// Compiles a pattern entry.
	///
	/// # Errors
	///
	/// [`TransportError::InvalidArgument`] if `pattern` is not a valid regex.
	pub fn pattern(pattern: &str) -> Result<Self> {
		Regex::new(pattern)
			.map(Self::Pattern)
			.map_err(|err| TransportError::InvalidArgument(format!("invalid origin pattern `{pattern}`: {err}")))
	}

	/// Returns true if `origin` is allowed by this entry.
	pub fn matches(&self, origin: &str) -> bool {
		match self {
			Self::Any => true,
			Self::Exact(allowed) => allowed == origin,
			Self::Pattern(regex) => regex.is_match(origin),
		}
	}

	/// Returns true for the wildcard entry.
	pub const fn is_any(&self) -> bool {
		matches!(self, Self::Any)
	}
}

impl From<&str> for AllowedOrigin {
	fn from(origin: &str) -> Self {
		if origin == "*" { Self::Any } else { Self::Exact(origin.to_owned()) }
	}
}

impl From<String> for AllowedOrigin {
	fn from(origin: String) -> Self {
		Self::from(origin.as_str())
	}
}

impl From<Regex> for AllowedOrigin {
	fn from(regex: Regex) -> Self {
		Self::Pattern(regex)
	}
}

impl fmt::Display for AllowedOrigin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Any => f.write_str("*"),
			Self::Exact(origin) => f.write_str(origin),
			Self::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
		}
	}
}

impl fmt::Debug for AllowedOrigin {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(self, f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn star_parses_to_any() {
		assert!(AllowedOrigin::from("*").is_any());
		assert!(AllowedOrigin::Any.matches("null"));
	}

	#[test]
	fn exact_requires_full_equality() {
		let allowed = AllowedOrigin::from("https://app.test");
		assert!(allowed.matches("https://app.test"));
		assert!(!allowed.matches("https://app.test.evil"));
	}

	#[test]
	fn pattern_matches_subdomains() {
		let allowed = AllowedOrigin::pattern(r"^https://[a-z]+\.app\.test$").unwrap();
		assert!(allowed.matches("https://foo.app.test"));
		assert!(!allowed.matches("https://app.test"));
		assert_eq!(allowed.to_string(), r"/^https://[a-z]+\.app\.test$/");
	}

	#[test]
	fn invalid_pattern_is_invalid_argument() {
		assert!(matches!(AllowedOrigin::pattern("("), Err(TransportError::InvalidArgument(_))));
	}
}
