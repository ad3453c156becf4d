//! Redacting wrapper for token material plus log-safe fingerprints.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

const TAG_LEN: usize = 12;

/// Token string that never prints its contents through `Debug` or `Display`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the secret is empty or whitespace only.
	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}

	/// Derives a short, log-safe tag identifying this secret.
	pub fn tag(&self) -> RefreshTag {
		RefreshTag::of(self.expose())
	}

	/// Wraps a pasted bearer value, dropping surrounding whitespace and a leading `Bearer `
	/// scheme (any case).
	pub fn from_bearer(raw: &str) -> Self {
		Self::new(strip_bearer(raw))
	}
}

/// Returns `raw` without surrounding whitespace and without a leading `Bearer ` scheme.
pub(crate) fn strip_bearer(raw: &str) -> &str {
	let raw = raw.trim();

	match raw.get(..7) {
		Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => raw[7..].trim_start(),
		_ => raw,
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenSecret(<redacted>)")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Truncated SHA-256 fingerprint of a refresh token.
///
/// Two credentials carry the same tag exactly when they were minted with the same refresh
/// token, which makes the tag usable as the optimistic-concurrency token for forced refreshes
/// and as a correlation id in logs without leaking the secret.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshTag(String);
impl RefreshTag {
	/// Fingerprints the provided secret value.
	pub fn of(secret: &str) -> Self {
		let digest = Sha256::digest(secret.as_bytes());
		let mut encoded = URL_SAFE_NO_PAD.encode(digest);

		encoded.truncate(TAG_LEN);

		Self(encoded)
	}

	/// Returns the tag text.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Debug for RefreshTag {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "RefreshTag({})", self.0)
	}
}
impl Display for RefreshTag {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatters_never_print_the_secret() {
		let secret = TokenSecret::new("super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted>)");
		assert_eq!(format!("{secret}"), "<redacted>");
		assert!(!format!("{:?}", secret.tag()).contains("super-secret"));
	}

	#[test]
	fn tags_are_stable_and_distinct() {
		let a = TokenSecret::new("refresh-a");
		let b = TokenSecret::new("refresh-b");

		assert_eq!(a.tag(), TokenSecret::new("refresh-a").tag());
		assert_ne!(a.tag(), b.tag());
		assert_eq!(a.tag().as_str().len(), TAG_LEN);
	}

	#[test]
	fn serializes_as_plain_string() {
		let json = serde_json::to_string(&TokenSecret::new("abc"))
			.expect("Secret should serialize to JSON.");

		assert_eq!(json, "\"abc\"");
		assert!(TokenSecret::new("  ").is_blank());
	}

	#[test]
	fn pasted_bearer_values_lose_their_scheme() {
		assert_eq!(TokenSecret::from_bearer(" Bearer abc ").expose(), "abc");
		assert_eq!(TokenSecret::from_bearer("bearer  abc").expose(), "abc");
		assert_eq!(TokenSecret::from_bearer("abc").expose(), "abc");
		assert_eq!(strip_bearer("Bearerabc"), "Bearerabc");
		assert_eq!(strip_bearer("Beär"), "Beär");
	}
}
