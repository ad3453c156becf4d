#![cfg(feature = "reqwest")]

// std
use std::{
	fs,
	sync::atomic::{AtomicBool, Ordering},
	time::Duration as StdDuration,
};
// crates.io
use httpmock::prelude::*;
// self
use oauth2_keeper::{
	_preludet::*,
	auth::{CredentialRecord, CredentialSource, Degradation, SlotId, TokenStatus},
	store::{
		CredentialStore, FallbackFile, FileStore, MemoryStore, RotationOutcome, StoreFuture,
	},
};

const ROTATED_BODY: &str =
	r#"{"access_token":"access-2","refresh_token":"refresh-2","token_type":"bearer","expires_in":21600}"#;

fn manager_with(
	server: &MockServer,
	store: Arc<dyn CredentialStore>,
	fallback: &Path,
) -> ReqwestTestManager {
	build_reqwest_test_manager(
		test_config().with_fallback_path(fallback),
		loopback_descriptor(&server.base_url()),
		store,
	)
}

fn record(access: &str, refresh: &str, remaining: Duration) -> CredentialRecord {
	let lifetime = Duration::hours(6);

	seed_record(&SlotId::default(), access, refresh, lifetime - remaining, lifetime)
}

#[tokio::test]
async fn store_outage_is_absorbed_by_cache_and_local_fallback() {
	let server = MockServer::start_async().await;
	let fallback = temp_path("outage");
	let store = Arc::new(OutageStore::new(MemoryStore::default()));
	let manager = manager_with(&server, store.clone(), &fallback);

	manager
		.seed_credential(record("access-1", "refresh-1", Duration::hours(3)))
		.await
		.expect("Seeding should succeed.");

	assert!(fallback.exists());

	store.set_down(true);

	let cached = manager.get_active_credential().await.expect("Cached copy should be served.");

	assert_eq!(cached.access_token.expose(), "access-1");
	assert_eq!(cached.degradation, Some(Degradation::StoreUnavailable));
	assert_eq!(manager.metrics().fallback_reads(), 1);

	// A fresh process only has the file.
	let restarted = manager_with(&server, store.clone(), &fallback);
	let from_file = restarted.get_active_credential().await.expect("Fallback copy should be served.");

	assert_eq!(from_file.access_token.expose(), "access-1");
	assert_eq!(from_file.source, CredentialSource::LocalFallback);
	assert_eq!(from_file.degradation, Some(Degradation::StoreUnavailable));

	store.set_down(false);

	let recovered = restarted.get_active_credential().await.expect("Primary read should succeed.");

	assert_eq!(recovered.source, CredentialSource::PrimaryStore);
	assert!(recovered.degradation.is_none());

	let _ = fs::remove_file(&fallback);
}

#[tokio::test]
async fn outage_without_any_local_copy_is_reported() {
	let server = MockServer::start_async().await;
	let store = Arc::new(OutageStore::default());

	store.set_down(true);

	let manager =
		build_reqwest_test_manager(test_config(), loopback_descriptor(&server.base_url()), store);
	let err = manager.get_active_credential().await.expect_err("Nothing can be served.");

	assert!(matches!(err, Error::StoreUnavailable(_)), "{err}");
	assert!(err.is_transient());
}

#[tokio::test]
async fn rotation_during_an_outage_is_repaired_after_recovery() {
	let server = MockServer::start_async().await;
	let fallback = temp_path("repair");
	let store = Arc::new(OutageStore::new(MemoryStore::default()));
	let manager = manager_with(&server, store.clone(), &fallback);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").form_urlencoded_tuple("refresh_token", "refresh-1");
			then.status(200).header("content-type", "application/json").body(ROTATED_BODY);
		})
		.await;

	manager
		.seed_credential(record("access-1", "refresh-1", Duration::minutes(5)))
		.await
		.expect("Seeding should succeed.");
	store.set_down(true);

	let degraded = manager.get_active_credential().await.expect("Refresh should still succeed.");

	mock.assert_async().await;

	assert_eq!(degraded.access_token.expose(), "access-2");
	assert_eq!(degraded.degradation, Some(Degradation::StoreUnavailable));
	assert!(manager.has_pending_repair());

	let mirrored = FallbackFile::new(&fallback)
		.load()
		.expect("Fallback should be readable.")
		.expect("Fallback should hold the rotated record.");

	assert!(mirrored.holds_refresh("refresh-2"));

	let stale = store
		.inner()
		.fetch_active(manager.slot())
		.await
		.expect("Inner store should answer.")
		.expect("Inner store should still hold the seed.");

	assert!(stale.holds_refresh("refresh-1"));

	store.set_down(false);

	let repaired = manager.get_active_credential().await.expect("Read should succeed after recovery.");

	assert_eq!(repaired.access_token.expose(), "access-2");
	assert!(repaired.degradation.is_none());
	assert!(!manager.has_pending_repair());
	assert_eq!(manager.metrics().repairs(), 1);

	let history = store.history(manager.slot()).await.expect("History should load.");

	assert_eq!(history.len(), 2);
	assert!(history[1].active && history[1].holds_refresh("refresh-2"));

	let _ = fs::remove_file(&fallback);
}

/// Outage store whose compare-and-swap takes a while once the store is back.
#[derive(Default)]
struct SlowRotateStore {
	inner: OutageStore,
	slow: AtomicBool,
}
impl CredentialStore for SlowRotateStore {
	fn fetch_active<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Option<CredentialRecord>> {
		self.inner.fetch_active(slot)
	}

	fn install(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
		self.inner.install(record)
	}

	fn rotate<'a>(
		&'a self,
		expected_refresh: &'a str,
		replacement: CredentialRecord,
	) -> StoreFuture<'a, RotationOutcome> {
		Box::pin(async move {
			if self.slow.load(Ordering::SeqCst) {
				tokio::time::sleep(StdDuration::from_millis(400)).await;
			}

			self.inner.rotate(expected_refresh, replacement).await
		})
	}

	fn revoke<'a>(
		&'a self,
		slot: &'a SlotId,
		expected_refresh: &'a str,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<CredentialRecord>> {
		self.inner.revoke(slot, expected_refresh, instant)
	}

	fn history<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Vec<CredentialRecord>> {
		self.inner.history(slot)
	}
}

#[tokio::test]
async fn readers_never_see_a_superseded_record_while_a_repair_is_replayed() {
	let server = MockServer::start_async().await;
	let fallback = temp_path("replay_race");
	let store = Arc::new(SlowRotateStore::default());
	let manager = manager_with(&server, store.clone(), &fallback);
	let rotation = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").form_urlencoded_tuple("refresh_token", "refresh-1");
			then.status(200).header("content-type", "application/json").body(ROTATED_BODY);
		})
		.await;

	manager
		.seed_credential(record("access-1", "refresh-1", Duration::hours(2)))
		.await
		.expect("Seeding should succeed.");

	let first = manager.get_active_credential().await.expect("Initial read should succeed.");

	store.inner.set_down(true);

	let minted = manager.force_refresh(&first).await.expect("Refresh should succeed during the outage.");

	assert_eq!(minted.access_token.expose(), "access-2");
	assert!(manager.has_pending_repair());

	rotation.assert_calls_async(1).await;
	rotation.delete_async().await;

	// The provider has rotated; the old refresh token is dead from now on.
	let reused = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token").form_urlencoded_tuple("refresh_token", "refresh-1");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":{"type":"invalid_grant"}}"#);
		})
		.await;

	store.inner.set_down(false);
	store.slow.store(true, Ordering::SeqCst);

	let replaying = {
		let manager = manager.clone();

		tokio::spawn(async move { manager.get_active_credential().await })
	};

	tokio::time::sleep(StdDuration::from_millis(50)).await;

	let concurrent = manager.get_active_credential().await.expect("Concurrent read should succeed.");
	let replayed = replaying
		.await
		.expect("Replaying task should not panic.")
		.expect("Replaying read should succeed.");

	assert_eq!(concurrent.access_token.expose(), "access-2");
	assert_eq!(replayed.access_token.expose(), "access-2");
	assert!(!manager.has_pending_repair());

	// A caller still holding the pre-outage credential adopts the repaired record.
	let adopted = manager.force_refresh(&first).await.expect("Stale rejection should adopt.");

	assert_eq!(adopted.access_token.expose(), "access-2");

	reused.assert_calls_async(0).await;

	let history = store.history(manager.slot()).await.expect("History should load.");

	assert_eq!(history.len(), 2);
	assert!(history.iter().all(|record| record.revoked_at.is_none()));
	assert!(history[1].active && history[1].holds_refresh("refresh-2"));

	let _ = fs::remove_file(&fallback);
}

#[tokio::test]
async fn empty_primary_store_is_restored_from_the_fallback() {
	let server = MockServer::start_async().await;
	let fallback = temp_path("restore");
	let original = manager_with(&server, Arc::new(MemoryStore::default()), &fallback);

	original
		.seed_credential(record("access-1", "refresh-1", Duration::hours(3)))
		.await
		.expect("Seeding should succeed.");

	let replacement_store = MemoryStore::default();
	let replacement = manager_with(&server, Arc::new(replacement_store.clone()), &fallback);
	let credential = replacement.get_active_credential().await.expect("Fallback should restore.");

	assert_eq!(credential.access_token.expose(), "access-1");
	assert!(credential.degradation.is_none());

	let restored = replacement_store
		.fetch_active(replacement.slot())
		.await
		.expect("Store should answer.")
		.expect("Record should be restored.");

	assert!(restored.holds_refresh("refresh-1"));

	let _ = fs::remove_file(&fallback);
}

#[tokio::test]
async fn file_store_keeps_the_audit_trail_across_reopen() {
	let server = MockServer::start_async().await;
	let path = temp_path("ledger");
	let fallback = temp_path("ledger_fallback");
	let store = FileStore::open(&path).expect("File store should open.");
	let manager = manager_with(&server, Arc::new(store), &fallback);
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(ROTATED_BODY);
		})
		.await;

	manager
		.seed_credential(record("access-1", "refresh-1", Duration::hours(3)))
		.await
		.expect("Seeding should succeed.");

	let first = manager.get_active_credential().await.expect("Read should succeed.");

	manager.force_refresh(&first).await.expect("Forced refresh should succeed.");

	let audit = manager.history().await.expect("History should load.");

	assert_eq!(audit.len(), 2);
	assert_eq!(audit[0].status, TokenStatus::Superseded);
	assert_eq!(audit[1].rotated_from.as_ref(), Some(first.refresh_tag()));

	let reopened = FileStore::open(&path).expect("File store should reopen.");
	let history = reopened.history(&SlotId::default()).await.expect("History should load.");

	assert_eq!(history.len(), 2);
	assert!(!history[0].active);
	assert!(history[1].active && history[1].holds_refresh("refresh-2"));

	let _ = fs::remove_file(&path);
	let _ = fs::remove_file(&fallback);
}
