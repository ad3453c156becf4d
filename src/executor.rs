//! Authenticated request executor.
//!
//! [`AuthenticatedExecutor::execute`] attaches the slot's current credential, sends the
//! request, and on an authentication rejection asks the manager for a forced refresh exactly
//! once before retrying exactly once. Everything else (network failures, business error
//! statuses) is returned untouched.

pub mod request;
pub mod signer;

pub use request::*;
pub use signer::*;

// self
use crate::{
	_prelude::*,
	auth::Credential,
	http::{ApiTransport, TokenHttpClient},
	manager::TokenManager,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};
#[cfg(feature = "reqwest")]
use crate::{
	http::ReqwestHttpClient, manager::ReqwestTokenManager, oauth::ReqwestTransportErrorMapper,
};

const DEFAULT_REJECTION_STATUSES: &[u16] = &[401];

/// Executor specialized for the crate's default reqwest transport stack.
#[cfg(feature = "reqwest")]
pub type ReqwestExecutor =
	AuthenticatedExecutor<ReqwestHttpClient, ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Sends business requests with the managed credential and a single coordinated retry.
pub struct AuthenticatedExecutor<A, C, M>
where
	A: ?Sized + ApiTransport,
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	manager: TokenManager<C, M>,
	transport: Arc<A>,
	signer: Arc<dyn RequestSigner>,
	rejection_statuses: Vec<u16>,
}
impl<A, C, M> AuthenticatedExecutor<A, C, M>
where
	A: ?Sized + ApiTransport,
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an executor that signs with [`BearerSigner`] and treats `401` as a rejection.
	pub fn new(manager: TokenManager<C, M>, transport: impl Into<Arc<A>>) -> Self {
		Self {
			manager,
			transport: transport.into(),
			signer: Arc::new(BearerSigner),
			rejection_statuses: DEFAULT_REJECTION_STATUSES.to_vec(),
		}
	}

	/// Replaces the request signer.
	pub fn with_signer(mut self, signer: impl 'static + RequestSigner) -> Self {
		self.signer = Arc::new(signer);

		self
	}

	/// Replaces the statuses that mean "the credential was rejected".
	pub fn with_rejection_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
		self.rejection_statuses = statuses.into_iter().collect();

		self
	}

	/// Manager backing this executor.
	pub fn manager(&self) -> &TokenManager<C, M> {
		&self.manager
	}

	/// Sends `request` with the current credential, refreshing and retrying once on rejection.
	///
	/// A second rejection fails with [`Error::AuthenticationFailed`]. Business error statuses
	/// come back as an [`ApiResponse`] and transport failures as [`Error::Transport`].
	pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::Execute;

		let span = FlowSpan::new(KIND, "execute");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.execute_with_retry(request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn execute_with_retry(&self, request: ApiRequest) -> Result<ApiResponse> {
		let credential = self.manager.get_active_credential().await?;
		let first = self.send(request.clone(), &credential).await?;

		if !self.is_rejection(first.status) {
			return Ok(first);
		}

		tracing::info!(
			status = first.status,
			url = %request.url,
			refresh_tag = %credential.refresh_tag(),
			"Provider rejected the credential; refreshing once before retrying."
		);

		let refreshed = self.manager.force_refresh(&credential).await?;
		let second = self.send(request, &refreshed).await?;

		if self.is_rejection(second.status) {
			tracing::error!(
				status = second.status,
				refresh_tag = %refreshed.refresh_tag(),
				"Provider rejected the refreshed credential as well."
			);

			return Err(Error::AuthenticationFailed { status: second.status });
		}

		Ok(second)
	}

	async fn send(&self, request: ApiRequest, credential: &Credential) -> Result<ApiResponse> {
		let signed = self.signer.sign(request, credential)?;

		Ok(self.transport.send(signed).await?)
	}

	fn is_rejection(&self, status: u16) -> bool {
		self.rejection_statuses.contains(&status)
	}
}
#[cfg(feature = "reqwest")]
impl AuthenticatedExecutor<ReqwestHttpClient, ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Builds an executor that reuses a reqwest client for business calls.
	pub fn with_reqwest(manager: ReqwestTokenManager, client: ReqwestClient) -> Self {
		Self::new(manager, ReqwestHttpClient::with_client(client))
	}
}
impl<A, C, M> Clone for AuthenticatedExecutor<A, C, M>
where
	A: ?Sized + ApiTransport,
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self {
			manager: self.manager.clone(),
			transport: Arc::clone(&self.transport),
			signer: Arc::clone(&self.signer),
			rejection_statuses: self.rejection_statuses.clone(),
		}
	}
}
impl<A, C, M> Debug for AuthenticatedExecutor<A, C, M>
where
	A: ?Sized + ApiTransport,
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthenticatedExecutor")
			.field("manager", &self.manager)
			.field("rejection_statuses", &self.rejection_statuses)
			.finish()
	}
}
