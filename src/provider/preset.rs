//! Ready-made descriptors for providers the keeper has been deployed against.

// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	error::ConfigError,
	provider::{ClientAuthMethod, GrantType, ProviderDescriptor},
};

/// Bling v3 authorization endpoint.
pub const BLING_AUTHORIZATION_URL: &str = "https://www.bling.com.br/Api/v3/oauth/authorize";
/// Bling v3 token endpoint.
pub const BLING_TOKEN_URL: &str = "https://api.bling.com.br/Api/v3/oauth/token";
/// Bling refresh tokens lapse this many days after issuance.
pub const BLING_REFRESH_TOKEN_LIFETIME_DAYS: u32 = 30;

/// Descriptor for the Bling v3 ERP API.
///
/// Bling expects the client credentials in the form body of the token request.
pub fn bling() -> Result<ProviderDescriptor, ConfigError> {
	let parse = |raw: &str| Url::parse(raw).map_err(|source| ConfigError::InvalidDescriptor { source });

	ProviderDescriptor::builder(ProviderId::new("bling")?)
		.authorization_endpoint(parse(BLING_AUTHORIZATION_URL)?)
		.token_endpoint(parse(BLING_TOKEN_URL)?)
		.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
		.preferred_client_auth_method(ClientAuthMethod::ClientSecretPost)
		.build()
		.map_err(ConfigError::from)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn bling_preset_is_valid() {
		let descriptor = bling().expect("Bling preset should build.");

		assert_eq!(descriptor.id.as_str(), "bling");
		assert_eq!(descriptor.endpoints.token.as_str(), BLING_TOKEN_URL);
		assert!(descriptor.supports(GrantType::AuthorizationCode));
		assert_eq!(descriptor.preferred_client_auth_method, ClientAuthMethod::ClientSecretPost);
	}

	#[test]
	fn default_config_tracks_the_bling_refresh_token_lifetime() {
		let config = crate::config::ManagerConfig::new("client");

		assert_eq!(config.refresh_token_lifetime_days, BLING_REFRESH_TOKEN_LIFETIME_DAYS);
		assert_eq!(config.refresh_token_lifetime(), Duration::days(30));
	}
}
