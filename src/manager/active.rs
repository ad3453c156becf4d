//! Serving the active credential and absorbing primary-store outages.

// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialRecord, Degradation},
	http::TokenHttpClient,
	manager::{ManagerInner, PendingRepair, Resolved, TokenManager, refresh::RefreshCause},
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{RotationOutcome, StoreError},
};

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns a credential that is valid for at least the proactive threshold, refreshing first
	/// when needed.
	///
	/// Fails with [`Error::NotBootstrapped`] before the first bootstrap and with
	/// [`Error::ReauthorizationRequired`] once the provider rejected the refresh token. When a
	/// proactive refresh fails transiently while the current access token is still valid, that
	/// token is returned with [`Degradation::RefreshFailed`] instead of an error.
	pub async fn get_active_credential(&self) -> Result<Credential> {
		const KIND: FlowKind = FlowKind::Access;

		let span = FlowSpan::new(KIND, "get_active_credential");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let current = self.inner.resolve_current().await?;

				current.ensure_usable()?;

				let now = OffsetDateTime::now_utc();

				if !current.record.expires_within(self.inner.config.proactive_threshold(), now) {
					return Ok(current.credential());
				}

				tracing::debug!(
					expires_at = %current.record.expires_at,
					"Credential is inside the proactive window; refreshing."
				);

				match self.refresh(RefreshCause::Proactive).await {
					Ok(fresh) => Ok(fresh.credential()),
					Err(e) if e.is_transient() && !current.record.is_expired_at(now) => {
						tracing::warn!(
							error = %e,
							expires_at = %current.record.expires_at,
							"Proactive refresh failed; serving the current credential until it expires."
						);

						Ok(Credential::from(&current.record).degraded(Degradation::RefreshFailed))
					},
					Err(e) => Err(e),
				}
			})
			.await;

		match &result {
			Ok(credential) if credential.degradation.is_some() =>
				obs::record_flow_outcome(KIND, FlowOutcome::Degraded),
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}

impl Resolved {
	pub(super) fn ensure_usable(&self) -> Result<()> {
		if self.record.is_revoked() {
			return Err(Error::ReauthorizationRequired {
				reason: "the refresh token was rejected earlier; run the authorization flow again"
					.into(),
			});
		}

		Ok(())
	}
}

impl<C, M> ManagerInner<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Loads the slot's current record for a caller that does not hold the refresh lock.
	///
	/// While a deferred write is queued, the store may still hold a record this process already
	/// superseded, so the read waits for the refresh lock and replays the write first. Every
	/// store write happens under that lock.
	pub(super) async fn resolve_current(&self) -> Result<Resolved> {
		let replaying = self.pending_repair.lock().is_some();

		if replaying {
			return self.resolve_exclusive().await;
		}

		match self.store.fetch_active(self.slot()).await {
			Ok(Some(record)) => {
				self.remember(&record);

				Ok(Resolved::primary(record))
			},
			Ok(None) => self.resolve_exclusive().await,
			Err(e) => self.degraded_read(e),
		}
	}

	async fn resolve_exclusive(&self) -> Result<Resolved> {
		let _guard = self.refresh_lock.lock().await;

		self.resolve_locked().await
	}

	/// Loads the slot's current record; the caller holds the refresh lock.
	///
	/// The primary store is authoritative. When it cannot be reached, the newest of the
	/// in-process cache and the local fallback is served as a degraded read. When the store is
	/// reachable again, a deferred write is replayed first.
	pub(super) async fn resolve_locked(&self) -> Result<Resolved> {
		match self.store.fetch_active(self.slot()).await {
			Ok(found) => {
				let found = self.replay_pending(found).await;

				match found {
					Some(resolved) => {
						self.remember(&resolved.record);

						Ok(resolved)
					},
					None => self.restore_from_fallback().await,
				}
			},
			Err(e) => self.degraded_read(e),
		}
	}

	fn degraded_read(&self, error: StoreError) -> Result<Resolved> {
		let from_file = self.fallback.as_ref().and_then(|fallback| {
			fallback
				.load()
				.inspect_err(|e| tracing::warn!(error = %e, "Local fallback could not be read."))
				.ok()
				.flatten()
		});
		let newest = match (self.cached(), from_file) {
			(Some(cached), Some(file)) =>
				Some(if file.issued_at > cached.issued_at { file } else { cached }),
			(cached, file) => cached.or(file),
		};
		let Some(record) = newest else {
			tracing::error!(
				error = %error,
				"Primary store is unavailable and no local copy of the credential exists."
			);

			return Err(error.into());
		};

		self.metrics.record_fallback_read();
		tracing::warn!(
			error = %error,
			source = record.source.as_str(),
			refresh_tag = %record.refresh_tag(),
			"Primary store is unavailable; serving a local copy with reduced durability."
		);
		self.remember(&record);

		Ok(Resolved::degraded(record, Degradation::StoreUnavailable))
	}

	/// Handles an empty primary store: a local copy left behind by an earlier outage or process
	/// is written back, otherwise the slot was never bootstrapped.
	async fn restore_from_fallback(&self) -> Result<Resolved> {
		let local = match self.fallback.as_ref().map(|fallback| fallback.load()) {
			Some(Ok(Some(record))) => record,
			Some(Err(e)) => {
				tracing::warn!(error = %e, "Local fallback could not be read.");

				return Err(Error::NotBootstrapped { slot: self.slot().clone() });
			},
			_ => return Err(Error::NotBootstrapped { slot: self.slot().clone() }),
		};

		if local.slot != *self.slot() {
			return Err(Error::NotBootstrapped { slot: self.slot().clone() });
		}

		match self.store.install(local.clone()).await {
			Ok(()) => {
				self.metrics.record_repair();
				tracing::info!(
					refresh_tag = %local.refresh_tag(),
					"Primary store was empty; restored the credential from the local fallback."
				);

				let record = local.with_source(Default::default());

				self.remember(&record);

				Ok(Resolved::primary(record))
			},
			Err(e) => {
				self.defer_repair(PendingRepair { record: local.clone(), expected_refresh: None });
				self.remember(&local);
				tracing::warn!(error = %e, "Could not restore the local copy into the primary store.");

				Ok(Resolved::degraded(local, Degradation::StoreUnavailable))
			},
		}
	}

	/// Replays a deferred write now that the store answered; the caller holds the refresh lock.
	///
	/// The repair stays queued until the store settles it, which keeps concurrent readers on
	/// the locked path. Returns the record the caller should treat as current.
	async fn replay_pending(&self, found: Option<CredentialRecord>) -> Option<Resolved> {
		let Some(pending) = self.pending_repair.lock().clone() else {
			return found.map(Resolved::primary);
		};
		let PendingRepair { record, expected_refresh } = pending;
		let outcome = match &expected_refresh {
			Some(expected) => self.store.rotate(expected.expose(), record.clone()).await,
			None => self.store.install(record.clone()).await.map(|()| RotationOutcome::Rotated),
		};
		let outcome = match outcome {
			Ok(RotationOutcome::Missing) =>
				self.store.install(record.clone()).await.map(|()| RotationOutcome::Rotated),
			other => other,
		};

		if outcome.is_ok() {
			*self.pending_repair.lock() = None;
		}

		match outcome {
			Ok(RotationOutcome::Rotated) => {
				self.metrics.record_repair();
				tracing::info!(
					refresh_tag = %record.refresh_tag(),
					"Replayed the deferred credential write into the primary store."
				);

				Some(Resolved::primary(record.with_source(Default::default())))
			},
			Ok(_) => {
				// Another writer moved the line on while this process was cut off; its record wins.
				tracing::info!(
					refresh_tag = %record.refresh_tag(),
					"Dropped the deferred write; the primary store already holds a newer credential."
				);

				found.map(Resolved::primary)
			},
			Err(e) => {
				tracing::warn!(error = %e, "Deferred write still cannot reach the primary store.");

				Some(Resolved::degraded(record, Degradation::StoreUnavailable))
			},
		}
	}
}
