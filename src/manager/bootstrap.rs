//! One-time seeding of the slot: authorization-code exchange or a manually obtained token pair.

// crates.io
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	auth::{Credential, CredentialRecord, Degradation, TokenSecret},
	error::ConfigError,
	http::TokenHttpClient,
	manager::{ManagerInner, PendingRepair, Resolved, TokenManager},
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::{GrantType, ProviderDescriptor},
};

const STATE_LEN: usize = 32;

/// Authorization-code handshake started by [`TokenManager::start_authorization`].
#[derive(Clone, Debug)]
pub struct AuthorizationSession {
	/// Opaque state value that must round-trip through the authorization redirect.
	pub state: String,
	/// Redirect URI sent with the authorize request, if one is configured.
	pub redirect_uri: Option<Url>,
	/// Provider authorize URL the operator should open.
	pub authorize_url: Url,
}
impl AuthorizationSession {
	/// Validates the `state` parameter returned with the authorization redirect.
	pub fn validate_state(&self, returned_state: &str) -> Result<()> {
		if returned_state == self.state {
			Ok(())
		} else {
			Err(Error::ReauthorizationRequired { reason: "Authorization state mismatch.".into() })
		}
	}
}

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Builds the provider authorize URL for a new authorization-code handshake.
	pub fn start_authorization(&self) -> Result<AuthorizationSession> {
		self.ensure_grant(GrantType::AuthorizationCode)?;

		let state = random_state();
		let redirect_uri = self.inner.config.redirect_uri.clone();
		let authorize_url = build_authorize_url(
			&self.inner.descriptor,
			&self.inner.config.client_id,
			redirect_uri.as_ref(),
			&state,
		);

		Ok(AuthorizationSession { state, redirect_uri, authorize_url })
	}

	/// Validates `returned_state` against `session` and exchanges `code`.
	pub async fn complete_authorization(
		&self,
		session: AuthorizationSession,
		returned_state: &str,
		code: &str,
	) -> Result<Credential> {
		session.validate_state(returned_state)?;

		self.exchange(code, session.redirect_uri.as_ref()).await
	}

	/// Exchanges an authorization code and installs the result as the slot's active record.
	///
	/// Any record previously active in the slot, including a revoked one, is superseded.
	pub async fn exchange_authorization_code(&self, code: &str) -> Result<Credential> {
		let redirect_uri = self.inner.config.redirect_uri.clone();

		self.exchange(code, redirect_uri.as_ref()).await
	}

	/// Installs an externally obtained token pair as the slot's active record.
	///
	/// A leading `Bearer ` on the pasted access token is dropped.
	pub async fn seed_credential(&self, mut record: CredentialRecord) -> Result<Credential> {
		const KIND: FlowKind = FlowKind::Bootstrap;

		if record.slot != *self.slot() {
			return Err(ConfigError::invalid_setting(
				"slot",
				format!("record belongs to `{}`, manager tracks `{}`", record.slot, self.slot()),
			)
			.into());
		}

		record.access_token = TokenSecret::from_bearer(record.access_token.expose());
		record.validate().map_err(ConfigError::from)?;

		let span = FlowSpan::new(KIND, "seed_credential");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let credential = span.instrument(self.inner.install_bootstrap(record)).await;

		obs::record_flow_outcome(KIND, bootstrap_outcome(&credential));

		Ok(credential)
	}

	async fn exchange(&self, code: &str, redirect_uri: Option<&Url>) -> Result<Credential> {
		const KIND: FlowKind = FlowKind::Bootstrap;

		self.ensure_grant(GrantType::AuthorizationCode)?;

		if code.trim().is_empty() {
			return Err(ConfigError::invalid_setting("code", "must not be blank").into());
		}

		let span = FlowSpan::new(KIND, "exchange_authorization_code");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result: Result<Credential> = span
			.instrument(async {
				let record = self
					.inner
					.facade
					.exchange_code(
						self.inner.strategy.as_ref(),
						self.slot().clone(),
						code.trim(),
						redirect_uri,
					)
					.await
					.inspect_err(|e| tracing::error!(error = %e, "Authorization code exchange failed."))?;

				Ok(self.inner.install_bootstrap(record).await)
			})
			.await;

		match &result {
			Ok(credential) => obs::record_flow_outcome(KIND, bootstrap_outcome(credential)),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	fn ensure_grant(&self, grant: GrantType) -> Result<()> {
		if self.inner.descriptor.supports(grant) {
			Ok(())
		} else {
			Err(ConfigError::UnsupportedGrant {
				descriptor: self.inner.descriptor.id.to_string(),
				grant: grant.as_str(),
			}
			.into())
		}
	}
}

impl<C, M> ManagerInner<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Replaces the slot's line with `record`; never fails once the record is valid.
	async fn install_bootstrap(&self, record: CredentialRecord) -> Credential {
		let _guard = self.refresh_lock.lock().await;
		let resolved = match self.store.install(record.clone()).await {
			Ok(()) => {
				// The new line supersedes anything still queued for the old one.
				*self.pending_repair.lock() = None;

				Resolved::primary(record.with_source(Default::default()))
			},
			Err(e) => {
				tracing::warn!(error = %e, "Bootstrapped credential could not be written to the primary store.");
				self.defer_repair(PendingRepair { record: record.clone(), expected_refresh: None });

				Resolved::degraded(record, Degradation::StoreUnavailable)
			},
		};

		self.remember(&resolved.record);
		self.mirror(&resolved.record);
		tracing::info!(
			slot = %self.slot(),
			refresh_tag = %resolved.record.refresh_tag(),
			expires_at = %resolved.record.expires_at,
			"Installed a new credential line for the slot."
		);

		resolved.credential()
	}
}

fn bootstrap_outcome(credential: &Credential) -> FlowOutcome {
	if credential.degradation.is_some() { FlowOutcome::Degraded } else { FlowOutcome::Success }
}

fn build_authorize_url(
	descriptor: &ProviderDescriptor,
	client_id: &str,
	redirect_uri: Option<&Url>,
	state: &str,
) -> Url {
	let mut url = descriptor.endpoints.authorization.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("response_type", "code");
	pairs.append_pair("client_id", client_id);

	if let Some(redirect_uri) = redirect_uri {
		pairs.append_pair("redirect_uri", redirect_uri.as_str());
	}

	pairs.append_pair("state", state);

	drop(pairs);

	url
}

fn random_state() -> String {
	rand::rng().sample_iter(Alphanumeric).take(STATE_LEN).map(char::from).collect()
}
