//! Token lifecycle manager for a single credential slot.
//!
//! [`TokenManager`] is the only component that reads refresh tokens. It serves the slot's
//! access credential, refreshes it proactively before expiry or on demand after a rejection,
//! rotates records through the [`CredentialStore`] compare-and-swap, and mirrors every accepted
//! record to the local [`FallbackFile`]. All clones share one state: one cache, one refresh
//! lock, one set of metrics.
//!
//! Refreshes run on a spawned tokio task, so every manager call must happen inside a tokio
//! runtime. A caller that stops waiting does not cancel an in-flight refresh.

mod active;
mod audit;
mod bootstrap;
mod metrics;
mod refresh;

pub use audit::{CredentialAudit, HealthLevel, RefreshTokenHealth};
pub use bootstrap::AuthorizationSession;
pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialRecord, Degradation, SlotId, TokenSecret},
	config::ManagerConfig,
	http::TokenHttpClient,
	oauth::{TokenFacade, TransportErrorMapper},
	provider::{ProviderDescriptor, ProviderStrategy},
	store::{CredentialStore, FallbackFile},
};
#[cfg(feature = "reqwest")]
use crate::{
	error::ConfigError, http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper,
	provider::DefaultProviderStrategy,
};

/// Manager specialized for the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestTokenManager = TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Shared handle to the slot's credential lifecycle.
pub struct TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	inner: Arc<ManagerInner<C, M>>,
}
impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a manager that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		config: ManagerConfig,
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
		strategy: Arc<dyn ProviderStrategy>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		config.validate()?;
		descriptor.validate().map_err(crate::error::ConfigError::from)?;

		let facade = TokenFacade::from_descriptor(
			&descriptor,
			&config.client_id,
			config.client_secret.as_ref(),
			http_client.into(),
			mapper.into(),
		)?;
		let fallback = config.fallback_path.as_ref().map(|primary| {
			let fallback = FallbackFile::new(primary);

			match &config.secondary_fallback_path {
				Some(secondary) => fallback.with_secondary(secondary),
				None => fallback,
			}
		});

		if fallback.is_none() {
			tracing::warn!(
				slot = %config.slot,
				"No local fallback path is configured; a store outage will only be absorbed by the in-process cache."
			);
		}

		Ok(Self {
			inner: Arc::new(ManagerInner {
				config,
				descriptor,
				strategy,
				store,
				fallback,
				facade,
				metrics: RefreshMetrics::default(),
				refresh_lock: AsyncMutex::new(()),
				cache: RwLock::new(None),
				pending_repair: Mutex::new(None),
			}),
		})
	}

	/// Slot tracked by this manager.
	pub fn slot(&self) -> &SlotId {
		&self.inner.config.slot
	}

	/// Configuration the manager was built with.
	pub fn config(&self) -> &ManagerConfig {
		&self.inner.config
	}

	/// Provider descriptor the manager talks to.
	pub fn descriptor(&self) -> &ProviderDescriptor {
		&self.inner.descriptor
	}

	/// Refresh counters shared by every clone of this manager.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.inner.metrics
	}

	/// Returns `true` while an accepted record still has to be written to the primary store.
	pub fn has_pending_repair(&self) -> bool {
		self.inner.pending_repair.lock().is_some()
	}
}
#[cfg(feature = "reqwest")]
impl TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a manager with the default strategy and a reqwest transport that does not follow
	/// redirects.
	pub fn new(
		config: ManagerConfig,
		store: Arc<dyn CredentialStore>,
		descriptor: ProviderDescriptor,
	) -> Result<Self> {
		let client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.map_err(ConfigError::from)?;

		Self::with_http_client(
			config,
			store,
			descriptor,
			Arc::new(DefaultProviderStrategy),
			ReqwestHttpClient::with_client(client),
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> Clone for TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { inner: Arc::clone(&self.inner) }
	}
}
impl<C, M> Debug for TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("slot", &self.inner.config.slot)
			.field("provider", &self.inner.descriptor.id)
			.field("client_id", &self.inner.config.client_id)
			.field("client_secret_set", &self.inner.config.client_secret.is_some())
			.field("fallback", &self.inner.fallback)
			.finish()
	}
}

pub(crate) struct ManagerInner<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	config: ManagerConfig,
	descriptor: ProviderDescriptor,
	strategy: Arc<dyn ProviderStrategy>,
	store: Arc<dyn CredentialStore>,
	fallback: Option<FallbackFile>,
	facade: TokenFacade<C, M>,
	metrics: RefreshMetrics,
	/// Serializes every store write made by this process, including repair replays.
	refresh_lock: AsyncMutex<()>,
	/// Last record this process read from or wrote to any location.
	cache: RwLock<Option<CredentialRecord>>,
	pending_repair: Mutex<Option<PendingRepair>>,
}
impl<C, M> ManagerInner<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn slot(&self) -> &SlotId {
		&self.config.slot
	}

	fn remember(&self, record: &CredentialRecord) {
		*self.cache.write() = Some(record.clone());
	}

	fn cached(&self) -> Option<CredentialRecord> {
		self.cache.read().clone()
	}

	/// Writes the local mirror; failures only reduce durability.
	fn mirror(&self, record: &CredentialRecord) {
		let Some(fallback) = &self.fallback else {
			return;
		};

		match fallback.save(record) {
			Ok(path) => tracing::debug!(
				path = %path.display(),
				refresh_tag = %record.refresh_tag(),
				"Mirrored credential to the local fallback."
			),
			Err(e) => tracing::warn!(
				error = %e,
				refresh_tag = %record.refresh_tag(),
				"Local fallback could not be written; durability is reduced."
			),
		}
	}

	/// Queues `repair`, replacing any older one.
	///
	/// A rotation queued on top of another keeps the older expectation: the store still holds
	/// the record the first deferred write was meant to supersede.
	fn defer_repair(&self, mut repair: PendingRepair) {
		tracing::warn!(
			slot = %self.config.slot,
			refresh_tag = %repair.record.refresh_tag(),
			"Primary store rejected the write; it will be repaired once the store recovers."
		);

		let mut pending = self.pending_repair.lock();

		if let Some(previous) = pending.take().filter(|_| repair.expected_refresh.is_some()) {
			repair.expected_refresh = previous.expected_refresh;
		}

		*pending = Some(repair);
	}
}

/// Record accepted by this process but not yet written to the primary store.
#[derive(Clone, Debug)]
pub(crate) struct PendingRepair {
	record: CredentialRecord,
	/// Refresh token the store's active record held when the write was attempted; `None` for
	/// bootstrap installs.
	expected_refresh: Option<TokenSecret>,
}

/// Record resolved by the manager together with its degradation signal.
#[derive(Clone, Debug)]
pub(crate) struct Resolved {
	record: CredentialRecord,
	degradation: Option<Degradation>,
}
impl Resolved {
	fn primary(record: CredentialRecord) -> Self {
		Self { record, degradation: None }
	}

	fn degraded(record: CredentialRecord, degradation: Degradation) -> Self {
		Self { record, degradation: Some(degradation) }
	}

	fn credential(&self) -> Credential {
		let credential = Credential::from(&self.record);

		match self.degradation {
			Some(degradation) => credential.degraded(degradation),
			None => credential,
		}
	}
}
