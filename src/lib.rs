//! Single-slot OAuth 2.0 credential keeper: one validated access credential shared by every
//! caller, refreshed proactively before expiry or reactively after a rejection, rotated through
//! compare-and-swap stores, mirrored to a local fallback, and consumed through a retry-once
//! authenticated request executor.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod manager;
pub mod oauth;
pub mod obs;
pub mod provider;
pub mod store;
#[cfg(feature = "reqwest")]
#[doc(hidden)]
pub mod _preludet {
	//! Convenience re-exports and fixtures shared by the integration tests.

	pub use crate::_prelude::*;

	// std
	use std::{
		env, process,
		sync::atomic::{AtomicBool, AtomicU64, Ordering},
	};
	// self
	use crate::{
		auth::{CredentialRecord, ProviderId, SlotId},
		config::ManagerConfig,
		http::ReqwestHttpClient,
		manager::TokenManager,
		oauth::ReqwestTransportErrorMapper,
		provider::{
			ClientAuthMethod, DefaultProviderStrategy, GrantType, ProviderDescriptor,
			ProviderStrategy,
		},
		store::{CredentialStore, MemoryStore, RotationOutcome, StoreError, StoreFuture},
	};

	/// Manager type alias used by reqwest-backed integration tests.
	pub type ReqwestTestManager = TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Client id used by integration-test configurations.
	pub const TEST_CLIENT_ID: &str = "client-test";
	/// Client secret used by integration-test configurations.
	pub const TEST_CLIENT_SECRET: &str = "secret-test";

	/// Descriptor pointing at a loopback mock server (`/oauth/authorize`, `/oauth/token`) with
	/// Bling's client authentication style.
	pub fn loopback_descriptor(base_url: &str) -> ProviderDescriptor {
		let endpoint = |path: &str| {
			Url::parse(&format!("{base_url}{path}")).expect("Mock endpoint should parse successfully.")
		};

		ProviderDescriptor::builder(
			ProviderId::new("mock-bling").expect("Provider identifier fixture should be valid."),
		)
		.authorization_endpoint(endpoint("/oauth/authorize"))
		.token_endpoint(endpoint("/oauth/token"))
		.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
		.preferred_client_auth_method(ClientAuthMethod::ClientSecretPost)
		.build()
		.expect("Provider descriptor should build successfully.")
	}

	/// Default configuration used across integration tests.
	pub fn test_config() -> ManagerConfig {
		ManagerConfig::new(TEST_CLIENT_ID).with_client_secret(TEST_CLIENT_SECRET)
	}

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Returns a unique path under the system temp directory.
	pub fn temp_path(label: &str) -> PathBuf {
		static COUNTER: AtomicU64 = AtomicU64::new(0);

		let unique = format!(
			"oauth2_keeper_{label}_{}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
			COUNTER.fetch_add(1, Ordering::Relaxed),
		);

		env::temp_dir().join(unique)
	}

	/// Builds a credential record for the provided slot whose lifetime started `age` ago.
	pub fn seed_record(
		slot: &SlotId,
		access: &str,
		refresh: &str,
		age: Duration,
		lifetime: Duration,
	) -> CredentialRecord {
		let issued = OffsetDateTime::now_utc() - age;

		CredentialRecord::builder(slot.clone())
			.access_token(access)
			.refresh_token(refresh)
			.issued_at(issued)
			.expires_at(issued + lifetime)
			.build()
			.expect("Credential record fixture should build successfully.")
	}

	/// Constructs a [`TokenManager`] backed by the provided store, the default provider
	/// strategy, and the reqwest transport used across integration tests.
	pub fn build_reqwest_test_manager(
		config: ManagerConfig,
		descriptor: ProviderDescriptor,
		store: Arc<dyn CredentialStore>,
	) -> ReqwestTestManager {
		let strategy: Arc<dyn ProviderStrategy> = Arc::new(DefaultProviderStrategy);

		TokenManager::with_http_client(
			config,
			store,
			descriptor,
			strategy,
			test_reqwest_http_client(),
			ReqwestTransportErrorMapper,
		)
		.expect("Test manager should build successfully.")
	}

	/// Store wrapper that can simulate a primary-store outage.
	#[derive(Debug, Default)]
	pub struct OutageStore {
		inner: MemoryStore,
		down: AtomicBool,
	}
	impl OutageStore {
		/// Wraps an existing memory store.
		pub fn new(inner: MemoryStore) -> Self {
			Self { inner, down: AtomicBool::new(false) }
		}

		/// Returns the wrapped store so tests can inspect it while the outage is active.
		pub fn inner(&self) -> &MemoryStore {
			&self.inner
		}

		/// Toggles the simulated outage.
		pub fn set_down(&self, down: bool) {
			self.down.store(down, Ordering::SeqCst);
		}

		fn check(&self) -> Result<(), StoreError> {
			if self.down.load(Ordering::SeqCst) {
				Err(StoreError::Unavailable { message: "simulated outage".into() })
			} else {
				Ok(())
			}
		}
	}
	impl CredentialStore for OutageStore {
		fn fetch_active<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Option<CredentialRecord>> {
			Box::pin(async move {
				self.check()?;
				self.inner.fetch_active(slot).await
			})
		}

		fn install(&self, record: CredentialRecord) -> StoreFuture<'_, ()> {
			Box::pin(async move {
				self.check()?;
				self.inner.install(record).await
			})
		}

		fn rotate<'a>(
			&'a self,
			expected_refresh: &'a str,
			replacement: CredentialRecord,
		) -> StoreFuture<'a, RotationOutcome> {
			Box::pin(async move {
				self.check()?;
				self.inner.rotate(expected_refresh, replacement).await
			})
		}

		fn revoke<'a>(
			&'a self,
			slot: &'a SlotId,
			expected_refresh: &'a str,
			instant: OffsetDateTime,
		) -> StoreFuture<'a, Option<CredentialRecord>> {
			Box::pin(async move {
				self.check()?;
				self.inner.revoke(slot, expected_refresh, instant).await
			})
		}

		fn history<'a>(&'a self, slot: &'a SlotId) -> StoreFuture<'a, Vec<CredentialRecord>> {
			Box::pin(async move {
				self.check()?;
				self.inner.history(slot).await
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		path::{Path, PathBuf},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
