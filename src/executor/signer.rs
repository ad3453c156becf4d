//! Signing contract that attaches the managed credential to a business request.

// crates.io
use oauth2::http::{HeaderValue, header::AUTHORIZATION};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	error::ConfigError,
	executor::ApiRequest,
};

/// Attaches a [`Credential`] to an outbound [`ApiRequest`].
///
/// Implement this for providers that expect the token somewhere other than the standard
/// `Authorization: Bearer` header.
pub trait RequestSigner
where
	Self: Send + Sync,
{
	/// Returns `request` carrying `credential`.
	fn sign(&self, request: ApiRequest, credential: &Credential) -> Result<ApiRequest>;
}

/// Default signer: `Authorization: Bearer <access token>`.
///
/// A `Bearer ` prefix already present on the stored token is not duplicated.
#[derive(Clone, Copy, Debug, Default)]
pub struct BearerSigner;
impl RequestSigner for BearerSigner {
	fn sign(&self, mut request: ApiRequest, credential: &Credential) -> Result<ApiRequest> {
		let mut value = HeaderValue::from_str(&credential.authorization_value())
			.map_err(|_| ConfigError::InvalidHeader { name: AUTHORIZATION.to_string() })?;

		value.set_sensitive(true);
		request.headers.insert(AUTHORIZATION, value);

		Ok(request)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::{CredentialRecord, SlotId};

	fn credential(access: &str) -> Credential {
		let record = CredentialRecord::builder(SlotId::default())
			.access_token(access)
			.refresh_token("refresh")
			.expires_in(Duration::hours(6))
			.build()
			.expect("Record fixture should build.");

		Credential::from(&record)
	}

	fn request() -> ApiRequest {
		ApiRequest::get(Url::parse("https://api.test/ping").expect("URL fixture should parse."))
	}

	#[test]
	fn bearer_header_is_normalized_and_sensitive() {
		for stored in ["abc", "Bearer abc", "bearer abc"] {
			let signed = BearerSigner.sign(request(), &credential(stored)).expect("Signing should succeed.");
			let header = signed.headers.get(AUTHORIZATION).expect("Authorization must be set.");

			assert_eq!(header.as_bytes(), b"Bearer abc");
			assert!(header.is_sensitive());
		}
	}

	#[test]
	fn authorization_value_never_doubles_the_scheme() {
		assert_eq!(credential("Bearer abc").authorization_value(), "Bearer abc");
		assert_eq!(credential("bearer abc").authorization_value(), "Bearer abc");
		assert_eq!(credential("abc").authorization_value(), "Bearer abc");
	}

	#[test]
	fn resigning_replaces_the_previous_token() {
		let first = BearerSigner.sign(request(), &credential("old")).expect("Signing should succeed.");
		let second = BearerSigner.sign(first, &credential("new")).expect("Signing should succeed.");

		assert_eq!(second.headers.get_all(AUTHORIZATION).iter().count(), 1);
		assert_eq!(second.headers[AUTHORIZATION].as_bytes(), b"Bearer new");
	}
}
