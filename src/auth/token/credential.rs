//! Caller-facing view of the slot's current credential.

// self
use crate::{
	_prelude::*,
	auth::{
		CredentialRecord, CredentialSource,
		token::secret::{RefreshTag, TokenSecret, strip_bearer},
	},
};

/// Reason a credential was handed out even though the keeper could not complete its usual checks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Degradation {
	/// The primary store was unreachable; the credential came from the cache or the local file.
	StoreUnavailable,
	/// A proactive refresh failed transiently; the credential is still valid but close to expiry.
	RefreshFailed,
}

/// Access credential handed to callers.
///
/// Never carries the refresh token. The embedded [`RefreshTag`] identifies which refresh token
/// minted this credential so a forced refresh can tell whether another caller already rotated it.
#[derive(Clone)]
pub struct Credential {
	/// Bearer value to attach to outgoing requests.
	pub access_token: TokenSecret,
	/// Token type reported by the provider (usually `Bearer`).
	pub token_type: String,
	/// Issued-at instant.
	pub issued_at: OffsetDateTime,
	/// Expiry instant.
	pub expires_at: OffsetDateTime,
	/// Where the keeper found this credential.
	pub source: CredentialSource,
	/// Set when the credential was served in degraded mode.
	pub degradation: Option<Degradation>,
	refresh_tag: RefreshTag,
}
impl Credential {
	/// Fingerprint of the refresh token that minted this credential.
	pub fn refresh_tag(&self) -> &RefreshTag {
		&self.refresh_tag
	}

	/// Returns `true` once the access token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Formats the `Authorization` header value, dropping a `Bearer ` prefix already present on
	/// the stored token.
	pub fn authorization_value(&self) -> String {
		format!("Bearer {}", strip_bearer(self.access_token.expose()))
	}

	pub(crate) fn degraded(mut self, degradation: Degradation) -> Self {
		self.degradation = Some(degradation);

		self
	}
}
impl From<&CredentialRecord> for Credential {
	fn from(record: &CredentialRecord) -> Self {
		Self {
			access_token: record.access_token.clone(),
			token_type: record.token_type.clone(),
			issued_at: record.issued_at,
			expires_at: record.expires_at,
			source: record.source,
			degradation: None,
			refresh_tag: record.refresh_tag(),
		}
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &self.access_token)
			.field("token_type", &self.token_type)
			.field("expires_at", &self.expires_at)
			.field("source", &self.source)
			.field("degradation", &self.degradation)
			.field("refresh_tag", &self.refresh_tag)
			.finish()
	}
}
