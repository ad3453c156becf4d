//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, SlotId},
	store::{CredentialStore, RotationOutcome, StoreError, StoreFuture, ledger},
};

type StoreMap = Arc<RwLock<HashMap<SlotId, Vec<CredentialRecord>>>>;

/// Thread-safe storage backend that keeps slot ledgers in-process.
///
/// Clones share the same ledger, which lets tests play the role of a second process writing
/// to the same backend.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	fn install_now(map: StoreMap, record: CredentialRecord) -> Result<(), StoreError> {
		let now = OffsetDateTime::now_utc();
		let mut guard = map.write();

		ledger::install(guard.entry(record.slot.clone()).or_default(), record, now)
	}

	fn fetch_now(map: StoreMap, slot: SlotId) -> Option<CredentialRecord> {
		map.read().get(&slot).and_then(|entries| ledger::active(entries).cloned())
	}

	fn rotate_now(
		map: StoreMap,
		expected_refresh: String,
		replacement: CredentialRecord,
	) -> Result<RotationOutcome, StoreError> {
		let now = OffsetDateTime::now_utc();
		let mut guard = map.write();

		match guard.get_mut(&replacement.slot) {
			Some(entries) => ledger::rotate(entries, &expected_refresh, replacement, now),
			None => Ok(RotationOutcome::Missing),
		}
	}

	fn revoke_now(
		map: StoreMap,
		slot: SlotId,
		expected_refresh: String,
		instant: OffsetDateTime,
	) -> Option<CredentialRecord> {
		map.write()
			.get_mut(&slot)
			.and_then(|entries| ledger::revoke(entries, &expected_refresh, instant))
	}
}
impl CredentialStore for MemoryStore {
	fn fetch_active<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Option<CredentialRecord>> {
		let map = self.0.clone();
		let slot = slot.to_owned();

		Box::pin(async move { Ok(Self::fetch_now(map, slot)) })
	}

	fn install(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::install_now(map, record) })
	}

	fn rotate<'a>(
		&'a self,
		expected_refresh: &'a str,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, RotationOutcome> {
		let map = self.0.clone();
		let expected_refresh = expected_refresh.to_owned();

		Box::pin(async move { Self::rotate_now(map, expected_refresh, replacement) })
	}

	fn revoke<'a>(
		&'a self,
		slot: &'a SlotId,
		expected_refresh: &'a str,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		let map = self.0.clone();
		let slot = slot.to_owned();
		let expected_refresh = expected_refresh.to_owned();

		Box::pin(async move { Ok(Self::revoke_now(map, slot, expected_refresh, instant)) })
	}

	fn history<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Vec<CredentialRecord>> {
		let map = self.0.clone();
		let slot = slot.to_owned();

		Box::pin(async move { Ok(map.read().get(&slot).cloned().unwrap_or_default()) })
	}
}
