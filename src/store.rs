//! Storage contracts and built-in store implementations for credential records.
//!
//! A store keeps a per-slot ledger: every record ever installed stays in it, and at most one
//! entry carries `active = true`. Rotation is a compare-and-swap on the active record's refresh
//! token so the store is the single arbiter between competing writers.

pub mod fallback;
pub mod file;
pub mod memory;

pub use fallback::FallbackFile;
pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, SlotId},
};

/// Boxed future returned by [`CredentialStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract implemented by credential stores.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Fetches the slot's active record, if any.
	fn fetch_active<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Option<CredentialRecord>>;

	/// Deactivates the slot's current record (if any) and activates `record`.
	///
	/// Used by bootstrap and seeding, which replace the line unconditionally.
	fn install(&self, record: CredentialRecord) -> StoreFuture<'_, ()>;

	/// Atomically supersedes the active record when its refresh token equals `expected_refresh`.
	fn rotate<'a>(
		&'a self,
		expected_refresh: &'a str,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, RotationOutcome>;

	/// Marks the active record revoked when its refresh token equals `expected_refresh`.
	///
	/// Returns the revoked record, or `None` if the active record no longer matches.
	fn revoke<'a>(
		&'a self,
		slot: &'a SlotId,
		expected_refresh: &'a str,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>>;

	/// Returns every record kept for the slot, oldest first.
	fn history<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Vec<CredentialRecord>>;
}

/// Result of a rotation compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationOutcome {
	/// The active refresh token matched; the replacement is now active.
	Rotated,
	/// An active record exists but carries a different refresh token.
	RefreshMismatch,
	/// The slot has no active record.
	Missing,
}

/// Error type produced by [`CredentialStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// The backend could not be reached at all.
	#[error("Credential store is unavailable: {message}.")]
	Unavailable {
		/// Human-readable error payload.
		message: String,
	},
	/// A record failed validation at the store boundary.
	#[error("Rejected invalid credential record: {message}.")]
	InvalidRecord {
		/// Validation failure.
		message: String,
	},
}

/// Ledger operations shared by the built-in stores.
pub(crate) mod ledger {
	// self
	use super::*;

	pub(crate) fn active(entries: &[CredentialRecord]) -> Option<&CredentialRecord> {
		entries.iter().rev().find(|record| record.active)
	}

	pub(crate) fn install(
		entries: &mut Vec<CredentialRecord>,
		record: CredentialRecord,
		now: OffsetDateTime,
	) -> Result<(), StoreError> {
		let record = admit(record)?;

		entries.iter_mut().filter(|r| r.active).for_each(|r| r.deactivate(now));
		entries.push(record);

		Ok(())
	}

	pub(crate) fn rotate(
		entries: &mut Vec<CredentialRecord>,
		expected_refresh: &str,
		replacement: CredentialRecord,
		now: OffsetDateTime,
	) -> Result<RotationOutcome, StoreError> {
		let replacement = admit(replacement)?;
		let Some(current) = entries.iter_mut().rev().find(|r| r.active) else {
			return Ok(RotationOutcome::Missing);
		};

		if current.is_revoked() || !current.holds_refresh(expected_refresh) {
			return Ok(RotationOutcome::RefreshMismatch);
		}

		current.deactivate(now);
		entries.push(replacement);

		Ok(RotationOutcome::Rotated)
	}

	pub(crate) fn revoke(
		entries: &mut [CredentialRecord],
		expected_refresh: &str,
		instant: OffsetDateTime,
	) -> Option<CredentialRecord> {
		let current = entries.iter_mut().rev().find(|r| r.active)?;

		if current.is_revoked() || !current.holds_refresh(expected_refresh) {
			return None;
		}

		current.revoke(instant);

		Some(current.clone())
	}

	fn admit(record: CredentialRecord) -> Result<CredentialRecord, StoreError> {
		record
			.validate()
			.map_err(|e| StoreError::InvalidRecord { message: e.to_string() })?;

		let mut record = record.with_source(Default::default());

		record.active = true;
		record.deactivated_at = None;

		Ok(record)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn record(refresh: &str) -> CredentialRecord {
		CredentialRecord::builder(SlotId::default())
			.access_token(format!("access-{refresh}"))
			.refresh_token(refresh)
			.expires_in(Duration::hours(6))
			.build()
			.expect("Record fixture should build.")
	}

	#[test]
	fn rotation_keeps_exactly_one_active_entry() {
		let now = OffsetDateTime::now_utc();
		let mut entries = Vec::new();

		ledger::install(&mut entries, record("r1"), now).expect("Install should succeed.");

		assert_eq!(
			ledger::rotate(&mut entries, "r1", record("r2"), now).expect("Rotate should succeed."),
			RotationOutcome::Rotated
		);
		assert_eq!(
			ledger::rotate(&mut entries, "r1", record("r3"), now).expect("Rotate should succeed."),
			RotationOutcome::RefreshMismatch
		);
		assert_eq!(entries.iter().filter(|r| r.active).count(), 1);
		assert!(ledger::active(&entries).expect("Active record should exist.").holds_refresh("r2"));
		assert_eq!(entries[0].deactivated_at, Some(now));
	}

	#[test]
	fn rotate_on_empty_ledger_reports_missing() {
		let mut entries = Vec::new();
		let outcome = ledger::rotate(&mut entries, "r1", record("r2"), OffsetDateTime::now_utc())
			.expect("Rotate should succeed.");

		assert_eq!(outcome, RotationOutcome::Missing);
		assert!(entries.is_empty());
	}

	#[test]
	fn revoke_only_touches_matching_refresh() {
		let now = OffsetDateTime::now_utc();
		let mut entries = Vec::new();

		ledger::install(&mut entries, record("r1"), now).expect("Install should succeed.");

		assert!(ledger::revoke(&mut entries, "stale", now).is_none());

		let revoked = ledger::revoke(&mut entries, "r1", now).expect("Matching record is revoked.");

		assert_eq!(revoked.revoked_at, Some(now));
	}

	#[test]
	fn revoked_records_are_neither_rotated_nor_revoked_again() {
		let now = OffsetDateTime::now_utc();
		let mut entries = Vec::new();

		ledger::install(&mut entries, record("r1"), now).expect("Install should succeed.");
		ledger::revoke(&mut entries, "r1", now).expect("Matching record is revoked.");

		assert_eq!(
			ledger::rotate(&mut entries, "r1", record("r2"), now).expect("Rotate should succeed."),
			RotationOutcome::RefreshMismatch
		);
		assert!(ledger::revoke(&mut entries, "r1", now + Duration::seconds(1)).is_none());
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].revoked_at, Some(now));

		ledger::install(&mut entries, record("r3"), now).expect("Bootstrap still replaces the line.");

		assert!(ledger::active(&entries).expect("Active record should exist.").holds_refresh("r3"));
	}

	#[test]
	fn invalid_records_are_rejected_at_the_boundary() {
		let mut broken = record("r1");

		broken.expires_at = broken.issued_at;

		let err = ledger::install(&mut Vec::new(), broken, OffsetDateTime::now_utc())
			.expect_err("Zero-lifetime record must be rejected.");

		assert!(matches!(err, StoreError::InvalidRecord { .. }));
	}
}
