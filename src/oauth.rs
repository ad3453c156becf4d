//! Token endpoint facade over the `oauth2` crate.
//!
//! The facade turns a [`ProviderDescriptor`] plus client credentials into a configured
//! [`BasicClient`], runs the authorization-code and refresh-token grants through a
//! [`TokenHttpClient`], and maps every failure into the keeper taxonomy with the help of a
//! [`ProviderStrategy`].

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	HttpClientError, RedirectUrl, RefreshToken, RequestTokenError, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, SlotId, TokenSecret},
	error::{ConfigError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{
		ClientAuthMethod, GrantType, ProviderDescriptor, ProviderErrorContext, ProviderErrorKind,
		ProviderStrategy,
	},
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Maps HTTP transport failures into keeper [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a keeper error.
	fn map_transport_error(
		&self,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(grant, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => transient(grant, meta, message),
			_ => transient(grant, meta, "unknown HTTP client failure"),
		}
	}
}

/// Configured token endpoint client shared by the manager's flows.
pub(crate) struct TokenFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> TokenFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&TokenSecret>,
		http_client: Arc<C>,
		error_mapper: Arc<M>,
	) -> Result<Self> {
		let auth_url = AuthUrl::new(descriptor.endpoints.authorization.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let mut oauth_client = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url);

		if let Some(secret) = client_secret {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
		}
		if matches!(descriptor.preferred_client_auth_method, ClientAuthMethod::ClientSecretPost) {
			oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
		}

		Ok(Self { oauth_client, http_client, error_mapper })
	}

	/// Runs `grant_type=refresh_token` and returns the successor of `current`.
	///
	/// When the provider does not rotate the refresh token, the current one is carried forward.
	pub(crate) fn refresh<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		current: &'a CredentialRecord,
	) -> FacadeFuture<'a, CredentialRecord> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let refresh_secret = RefreshToken::new(current.refresh_token.expose().to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_secret)
				.request_async(&instrumented)
				.await
				.map_err(|err| {
					self.map_request_error(strategy, GrantType::RefreshToken, meta.take(), err)
				})?;

			build_record(
				current.slot.clone(),
				response,
				Some(current.refresh_token.expose()),
			)
			.map(|record| CredentialRecord { rotated_from: Some(current.refresh_tag()), ..record })
		})
	}

	/// Exchanges an authorization code for the slot's first credential.
	pub(crate) fn exchange_code<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		slot: SlotId,
		code: &'a str,
		redirect_uri: Option<&'a Url>,
	) -> FacadeFuture<'a, CredentialRecord> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let mut request = self.oauth_client.exchange_code(AuthorizationCode::new(code.to_owned()));

			if let Some(redirect_uri) = redirect_uri {
				let redirect_url = RedirectUrl::new(redirect_uri.to_string())
					.map_err(|source| ConfigError::InvalidRedirect { source })?;

				request = request.set_redirect_uri(Cow::Owned(redirect_url));
			}

			let response = request.request_async(&instrumented).await.map_err(|err| {
				self.map_request_error(strategy, GrantType::AuthorizationCode, meta.take(), err)
			})?;

			build_record(slot, response, None)
		})
	}

	fn map_request_error(
		&self,
		strategy: &dyn ProviderStrategy,
		grant: GrantType,
		meta: Option<ResponseMetadata>,
		err: BasicRequestTokenError<HttpClientError<C::TransportError>>,
	) -> Error {
		let meta = meta.as_ref();

		match err {
			RequestTokenError::ServerResponse(response) =>
				map_server_response(strategy, grant, response, meta),
			RequestTokenError::Request(error) =>
				self.error_mapper.map_transport_error(grant, meta, error),
			RequestTokenError::Parse(source, body) =>
				map_unparsed_response(strategy, grant, meta, source, &body),
			RequestTokenError::Other(message) => transient(grant, meta, message),
		}
	}
}

fn build_record(
	slot: SlotId,
	response: BasicTokenResponse,
	previous_refresh: Option<&str>,
) -> Result<CredentialRecord> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	let mut builder = CredentialRecord::builder(slot)
		.access_token(response.access_token().secret().to_owned())
		.token_type(normalize_token_type(response.token_type().as_ref()))
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(Duration::seconds(expires_in));

	match (response.refresh_token(), previous_refresh) {
		(Some(rotated), _) => builder = builder.refresh_token(rotated.secret().to_owned()),
		(None, Some(previous)) => builder = builder.refresh_token(previous),
		(None, None) => {},
	}

	builder.build().map_err(|e| ConfigError::from(e).into())
}

fn normalize_token_type(raw: &str) -> String {
	if raw.eq_ignore_ascii_case("bearer") { "Bearer".into() } else { raw.to_owned() }
}

fn classify(kind: ProviderErrorKind, message: String, fallback: impl FnOnce(String) -> Error) -> Error {
	match kind {
		ProviderErrorKind::InvalidGrant => Error::ReauthorizationRequired { reason: message },
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason: message },
		ProviderErrorKind::Transient => fallback(message),
	}
}

fn map_server_response(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let mut ctx = ProviderErrorContext::new(grant).with_oauth_error(response.error().as_ref());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(status) = meta_status(meta) {
		ctx = ctx.with_http_status(status);
	}

	let message = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};

	classify(strategy.classify_token_error(&ctx), message, |message| {
		TransientError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		}
		.into()
	})
}

/// Handles bodies `oauth2` could not parse: malformed success payloads and error payloads that
/// do not follow RFC 6749.
fn map_unparsed_response(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	meta: Option<&ResponseMetadata>,
	source: serde_path_to_error::Error<serde_json::Error>,
	body: &[u8],
) -> Error {
	let status = meta_status(meta);

	if status.is_some_and(|code| (200..300).contains(&code)) {
		return TransientError::TokenResponseParse { source, status }.into();
	}

	let preview = String::from_utf8_lossy(body).into_owned();
	let mut ctx = ProviderErrorContext::new(grant).with_body_preview(preview);

	if let Some(status) = status {
		ctx = ctx.with_http_status(status);
	}

	let message = ctx.body_preview.clone().unwrap_or_default();

	classify(strategy.classify_token_error(&ctx), message, |_| {
		TransientError::TokenResponseParse { source, status }.into()
	})
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(grant: GrantType, meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return transient(grant, meta, "request timed out");
	}

	TransportError::from(err).into()
}

fn transient(grant: GrantType, meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::TokenEndpoint {
		message: format!("{grant} request failed: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
