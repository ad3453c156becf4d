//! Persisted credential records, their lifecycle helpers, and the validating builder.

// self
use crate::{
	_prelude::*,
	auth::{
		SlotId,
		token::secret::{RefreshTag, TokenSecret},
	},
};

/// Token type assumed when the provider omits one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Where the in-memory copy of a record was last loaded from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CredentialSource {
	/// Read from (or written to) the primary credential store.
	#[default]
	PrimaryStore,
	/// Read from the local fallback file because the primary store was unreachable.
	LocalFallback,
}
impl CredentialSource {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialSource::PrimaryStore => "primary_store",
			CredentialSource::LocalFallback => "local_fallback",
		}
	}
}

/// Lifecycle status of a record at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Issued-at instant lies in the future.
	Pending,
	/// Active record whose access token is still valid.
	Valid,
	/// Active record whose access token reached `expires_at`.
	Expired,
	/// The provider rejected the record's refresh token.
	Revoked,
	/// Record was replaced by a newer one and is kept only for audit.
	Superseded,
}

/// Validation failures raised at the store boundary and by [`CredentialRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum CredentialRecordError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// No refresh token value was provided.
	#[error("Refresh token is required.")]
	MissingRefreshToken,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// The access or refresh token is blank.
	#[error("The {field} must not be blank.")]
	BlankToken {
		/// Offending field name.
		field: &'static str,
	},
	/// `expires_at` does not lie after `issued_at`.
	#[error("The expiry instant must be later than the issue instant.")]
	NonPositiveLifetime,
}

/// One credential line entry: an access/refresh token pair plus its bookkeeping.
///
/// At most one record per slot carries `active = true`. Superseded records stay in the store
/// with `active = false` and a `deactivated_at` stamp.
#[derive(Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
	/// Slot the record belongs to.
	pub slot: SlotId,
	/// Bearer credential; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Secret used to mint the next access token. Never leaves the manager.
	pub refresh_token: TokenSecret,
	/// Token type reported by the provider.
	#[serde(default = "default_token_type")]
	pub token_type: String,
	/// Issued-at instant.
	#[serde(with = "time::serde::rfc3339")]
	pub issued_at: OffsetDateTime,
	/// Expiry instant of the access token.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Whether this is the slot's current record.
	pub active: bool,
	/// Instant the provider rejected the refresh token, if it did.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub revoked_at: Option<OffsetDateTime>,
	/// Instant a newer record superseded this one.
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub deactivated_at: Option<OffsetDateTime>,
	/// Fingerprint of the refresh token this record was minted from.
	#[serde(default)]
	pub rotated_from: Option<RefreshTag>,
	/// In-memory provenance; not persisted.
	#[serde(skip)]
	pub source: CredentialSource,
}
impl CredentialRecord {
	/// Returns a builder for the provided slot.
	pub fn builder(slot: SlotId) -> CredentialRecordBuilder {
		CredentialRecordBuilder::new(slot)
	}

	/// Checks the invariants every stored record must satisfy.
	pub fn validate(&self) -> Result<(), CredentialRecordError> {
		if self.access_token.is_blank() {
			return Err(CredentialRecordError::BlankToken { field: "access token" });
		}
		if self.refresh_token.is_blank() {
			return Err(CredentialRecordError::BlankToken { field: "refresh token" });
		}
		if self.expires_at <= self.issued_at {
			return Err(CredentialRecordError::NonPositiveLifetime);
		}

		Ok(())
	}

	/// Fingerprint of this record's refresh token.
	pub fn refresh_tag(&self) -> RefreshTag {
		self.refresh_token.tag()
	}

	/// Returns `true` when this record was minted with `refresh_token` equal to `expected`.
	pub fn holds_refresh(&self, expected: &str) -> bool {
		self.refresh_token.expose() == expected
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if !self.active {
			return TokenStatus::Superseded;
		}
		if self.revoked_at.is_some() {
			return TokenStatus::Revoked;
		}
		if instant < self.issued_at {
			return TokenStatus::Pending;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}

		TokenStatus::Valid
	}

	/// Returns `true` if the access token has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}

	/// Returns `true` if the provider rejected this record's refresh token.
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	/// Returns `true` when the access token expires within `threshold` of `now`.
	pub fn expires_within(&self, threshold: Duration, now: OffsetDateTime) -> bool {
		self.expires_at - now <= threshold
	}

	/// Marks the record as superseded.
	pub fn deactivate(&mut self, instant: OffsetDateTime) {
		self.active = false;
		self.deactivated_at = Some(instant);
	}

	/// Marks the record's refresh token as rejected by the provider.
	pub fn revoke(&mut self, instant: OffsetDateTime) {
		self.revoked_at = Some(instant);
	}

	pub(crate) fn with_source(mut self, source: CredentialSource) -> Self {
		self.source = source;

		self
	}
}
impl Debug for CredentialRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialRecord")
			.field("slot", &self.slot)
			.field("access_token", &"<redacted>")
			.field("refresh_tag", &self.refresh_tag())
			.field("token_type", &self.token_type)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("active", &self.active)
			.field("revoked_at", &self.revoked_at)
			.field("deactivated_at", &self.deactivated_at)
			.field("rotated_from", &self.rotated_from)
			.field("source", &self.source)
			.finish()
	}
}

fn default_token_type() -> String {
	DEFAULT_TOKEN_TYPE.into()
}

/// Builder for [`CredentialRecord`]. Built records are active and validated.
#[derive(Clone, Debug)]
pub struct CredentialRecordBuilder {
	slot: SlotId,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	token_type: Option<String>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	rotated_from: Option<RefreshTag>,
}
impl CredentialRecordBuilder {
	fn new(slot: SlotId) -> Self {
		Self {
			slot,
			access_token: None,
			refresh_token: None,
			token_type: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
			rotated_from: None,
		}
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Overrides the token type (defaults to `Bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Sets the issued-at instant (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Records which refresh token this record was minted from.
	pub fn rotated_from(mut self, tag: RefreshTag) -> Self {
		self.rotated_from = Some(tag);

		self
	}

	/// Consumes the builder and produces a validated, active [`CredentialRecord`].
	pub fn build(self) -> Result<CredentialRecord, CredentialRecordError> {
		let access_token = self.access_token.ok_or(CredentialRecordError::MissingAccessToken)?;
		let refresh_token = self.refresh_token.ok_or(CredentialRecordError::MissingRefreshToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(CredentialRecordError::MissingExpiry),
		};
		let record = CredentialRecord {
			slot: self.slot,
			access_token,
			refresh_token,
			token_type: self.token_type.unwrap_or_else(default_token_type),
			issued_at,
			expires_at,
			active: true,
			revoked_at: None,
			deactivated_at: None,
			rotated_from: self.rotated_from,
			source: CredentialSource::PrimaryStore,
		};

		record.validate()?;

		Ok(record)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn slot() -> SlotId {
		SlotId::new("bling").expect("Slot fixture should be valid.")
	}

	#[test]
	fn status_follows_lifecycle() {
		let mut record = CredentialRecord::builder(slot())
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(macros::datetime!(2025-03-01 12:00 UTC))
			.expires_at(macros::datetime!(2025-03-01 18:00 UTC))
			.build()
			.expect("Record fixture should build.");

		assert_eq!(record.status_at(macros::datetime!(2025-03-01 11:00 UTC)), TokenStatus::Pending);
		assert_eq!(record.status_at(macros::datetime!(2025-03-01 13:00 UTC)), TokenStatus::Valid);
		assert_eq!(record.status_at(macros::datetime!(2025-03-01 18:00 UTC)), TokenStatus::Expired);

		record.revoke(macros::datetime!(2025-03-01 13:00 UTC));

		assert_eq!(record.status_at(macros::datetime!(2025-03-01 13:30 UTC)), TokenStatus::Revoked);

		record.deactivate(macros::datetime!(2025-03-01 14:00 UTC));

		assert_eq!(
			record.status_at(macros::datetime!(2025-03-01 14:30 UTC)),
			TokenStatus::Superseded
		);
	}

	#[test]
	fn builder_rejects_incomplete_or_inverted_records() {
		let missing_refresh = CredentialRecord::builder(slot())
			.access_token("access")
			.expires_in(Duration::hours(6))
			.build();

		assert_eq!(missing_refresh.unwrap_err(), CredentialRecordError::MissingRefreshToken);

		let inverted = CredentialRecord::builder(slot())
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(macros::datetime!(2025-03-01 12:00 UTC))
			.expires_at(macros::datetime!(2025-03-01 11:00 UTC))
			.build();

		assert_eq!(inverted.unwrap_err(), CredentialRecordError::NonPositiveLifetime);

		let blank = CredentialRecord::builder(slot())
			.access_token(" ")
			.refresh_token("refresh")
			.expires_in(Duration::hours(1))
			.build();

		assert!(matches!(blank, Err(CredentialRecordError::BlankToken { field: "access token" })));
	}

	#[test]
	fn expiry_window_is_inclusive() {
		let issued = macros::datetime!(2025-03-01 12:00 UTC);
		let record = CredentialRecord::builder(slot())
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(issued)
			.expires_in(Duration::hours(6))
			.build()
			.expect("Record fixture should build.");
		let threshold = Duration::minutes(10);

		assert!(!record.expires_within(threshold, macros::datetime!(2025-03-01 17:49 UTC)));
		assert!(record.expires_within(threshold, macros::datetime!(2025-03-01 17:50 UTC)));
		assert!(record.expires_within(threshold, macros::datetime!(2025-03-01 19:00 UTC)));
	}

	#[test]
	fn json_schema_round_trips_without_source() {
		let record = CredentialRecord::builder(slot())
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(macros::datetime!(2025-03-01 12:00 UTC))
			.expires_in(Duration::hours(6))
			.build()
			.expect("Record fixture should build.")
			.with_source(CredentialSource::LocalFallback);
		let json = serde_json::to_value(&record).expect("Record should serialize.");

		assert_eq!(json["issued_at"], "2025-03-01T12:00:00Z");
		assert_eq!(json["expires_at"], "2025-03-01T18:00:00Z");
		assert_eq!(json["active"], true);
		assert!(json.get("source").is_none());

		let back: CredentialRecord = serde_json::from_value(json).expect("Record should parse.");

		assert_eq!(back.source, CredentialSource::PrimaryStore);
		assert_eq!(back.refresh_token.expose(), "refresh");
		assert!(!format!("{back:?}").contains("refresh\""));
	}
}
