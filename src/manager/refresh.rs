//! Refresh state machine: one network refresh per process, compare-and-swap rotation across
//! processes.

// std
use std::panic;
// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialRecord, Degradation, RefreshTag},
	error::TransientError,
	http::TokenHttpClient,
	manager::{ManagerInner, PendingRepair, Resolved, TokenManager},
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::RotationOutcome,
};

/// Why a refresh was requested.
#[derive(Clone, Debug)]
pub(crate) enum RefreshCause {
	/// The access token entered the proactive window.
	Proactive,
	/// A caller saw the credential minted from this refresh token rejected.
	Rejected(RefreshTag),
}
impl RefreshCause {
	fn stage(&self) -> &'static str {
		match self {
			RefreshCause::Proactive => "proactive_refresh",
			RefreshCause::Rejected(_) => "force_refresh",
		}
	}

	/// Re-checks, under the refresh lock, whether `current` still needs a network refresh.
	fn still_stale(&self, current: &CredentialRecord, threshold: Duration) -> bool {
		match self {
			RefreshCause::Proactive => current.expires_within(threshold, OffsetDateTime::now_utc()),
			RefreshCause::Rejected(tag) => current.refresh_tag() == *tag,
		}
	}
}

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Refreshes after the provider rejected `previous`.
	///
	/// When the slot already rotated away from the refresh token that minted `previous`, the
	/// current credential is returned without contacting the provider. Concurrent callers holding
	/// the same rejected credential therefore trigger a single network refresh.
	pub async fn force_refresh(&self, previous: &Credential) -> Result<Credential> {
		self.refresh(RefreshCause::Rejected(previous.refresh_tag().clone()))
			.await
			.map(|resolved| resolved.credential())
	}

	pub(super) async fn refresh(&self, cause: RefreshCause) -> Result<Resolved> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, cause.stage());
		let inner = Arc::clone(&self.inner);

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		// Detached so a caller that stops waiting does not cancel the refresh.
		let task = tokio::spawn(span.instrument(async move { inner.refresh_locked(cause).await }));
		let result = match task.await {
			Ok(result) => result,
			Err(e) if e.is_panic() => panic::resume_unwind(e.into_panic()),
			Err(e) => {
				tracing::error!(error = %e, "Refresh task stopped before completing.");

				Err(TransientError::RefreshInterrupted.into())
			},
		};

		match &result {
			Ok(resolved) if resolved.degradation.is_some() =>
				obs::record_flow_outcome(KIND, FlowOutcome::Degraded),
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}

impl<C, M> ManagerInner<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	async fn refresh_locked(&self, cause: RefreshCause) -> Result<Resolved> {
		let _guard = self.refresh_lock.lock().await;

		self.metrics.record_attempt();

		let result = self.refresh_under_lock(cause).await;

		match &result {
			Ok(_) => self.metrics.record_success(),
			Err(_) => self.metrics.record_failure(),
		}

		result
	}

	async fn refresh_under_lock(&self, cause: RefreshCause) -> Result<Resolved> {
		let current = self.resolve_locked().await?;

		current.ensure_usable()?;

		if !cause.still_stale(&current.record, self.config.proactive_threshold()) {
			self.metrics.record_adoption();
			tracing::debug!(
				refresh_tag = %current.record.refresh_tag(),
				"Credential was already rotated by another caller; adopting it."
			);

			return Ok(current);
		}

		self.metrics.record_network_refresh();

		match self.facade.refresh(self.strategy.as_ref(), &current.record).await {
			Ok(refreshed) => self.persist_rotation(&current.record, refreshed).await,
			Err(e) if e.requires_reauthorization() => self.handle_rejection(&current.record, e).await,
			Err(e) => {
				tracing::warn!(
					error = %e,
					refresh_tag = %current.record.refresh_tag(),
					"Refresh failed; the stored credential was left untouched."
				);

				Err(e)
			},
		}
	}

	/// Writes the refreshed record through the store's compare-and-swap.
	async fn persist_rotation(
		&self,
		current: &CredentialRecord,
		refreshed: CredentialRecord,
	) -> Result<Resolved> {
		let outcome = match self.store.rotate(current.refresh_token.expose(), refreshed.clone()).await
		{
			Ok(RotationOutcome::Missing) =>
				self.store.install(refreshed.clone()).await.map(|()| RotationOutcome::Rotated),
			other => other,
		};
		let resolved = match outcome {
			Ok(RotationOutcome::Rotated) => {
				tracing::info!(
					refresh_tag = %refreshed.refresh_tag(),
					rotated_from = %current.refresh_tag(),
					expires_at = %refreshed.expires_at,
					"Rotated the slot credential."
				);

				Resolved::primary(refreshed)
			},
			Ok(_) => match self.store.fetch_active(self.slot()).await {
				Ok(Some(winner)) => {
					self.metrics.record_adoption();
					tracing::warn!(
						ours = %refreshed.refresh_tag(),
						winner = %winner.refresh_tag(),
						"Another process rotated the credential first; adopting its record."
					);

					Resolved::primary(winner)
				},
				_ => self.defer_rotation(current, refreshed),
			},
			Err(e) => {
				tracing::warn!(error = %e, "Refreshed credential could not be written to the primary store.");

				self.defer_rotation(current, refreshed)
			},
		};

		self.remember(&resolved.record);
		self.mirror(&resolved.record);

		Ok(resolved)
	}

	fn defer_rotation(&self, current: &CredentialRecord, refreshed: CredentialRecord) -> Resolved {
		self.defer_repair(PendingRepair {
			record: refreshed.clone(),
			expected_refresh: Some(current.refresh_token.clone()),
		});

		Resolved::degraded(refreshed, Degradation::StoreUnavailable)
	}

	/// Marks the rejected record revoked so every instance fails fast until bootstrap runs
	/// again, unless the line already moved on to a record that may still be good.
	async fn handle_rejection(&self, current: &CredentialRecord, error: Error) -> Result<Resolved> {
		let now = OffsetDateTime::now_utc();

		match self.store.revoke(self.slot(), current.refresh_token.expose(), now).await {
			Ok(Some(revoked)) => {
				tracing::error!(
					error = %error,
					refresh_tag = %revoked.refresh_tag(),
					"Provider rejected the refresh token; the slot needs a new authorization."
				);
				self.remember(&revoked);
				self.mirror(&revoked);

				Err(error)
			},
			Ok(None) => match self.store.fetch_active(self.slot()).await {
				Ok(Some(winner))
					if !winner.is_revoked() && winner.refresh_tag() != current.refresh_tag() =>
				{
					self.metrics.record_adoption();
					tracing::info!(
						refresh_tag = %winner.refresh_tag(),
						"Rejected refresh token was already superseded; adopting the newer record."
					);
					self.remember(&winner);
					self.mirror(&winner);

					Ok(Resolved::primary(winner))
				},
				_ => Err(error),
			},
			Err(e) => {
				tracing::error!(
					error = %error,
					store_error = %e,
					refresh_tag = %current.refresh_tag(),
					"Provider rejected the refresh token and the revocation could not be stored."
				);

				let mut revoked = current.clone();

				revoked.revoke(now);
				self.remember(&revoked);
				self.mirror(&revoked);

				Err(error)
			},
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::SlotId;

	fn record(refresh: &str, lifetime: Duration) -> CredentialRecord {
		CredentialRecord::builder(SlotId::default())
			.access_token("access")
			.refresh_token(refresh)
			.expires_in(lifetime)
			.build()
			.expect("Record fixture should build.")
	}

	#[test]
	fn rejected_cause_only_matches_its_own_refresh_token() {
		let current = record("r2", Duration::hours(6));
		let stale = RefreshCause::Rejected(RefreshTag::of("r1"));
		let fresh = RefreshCause::Rejected(RefreshTag::of("r2"));

		assert!(!stale.still_stale(&current, Duration::minutes(10)));
		assert!(fresh.still_stale(&current, Duration::minutes(10)));
	}

	#[test]
	fn proactive_cause_follows_the_threshold() {
		let threshold = Duration::minutes(10);

		assert!(RefreshCause::Proactive.still_stale(&record("r1", Duration::minutes(5)), threshold));
		assert!(!RefreshCause::Proactive.still_stale(&record("r1", Duration::hours(6)), threshold));
	}
}
