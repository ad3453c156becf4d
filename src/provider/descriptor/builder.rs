// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	provider::{ClientAuthMethod, GrantType, ProviderDescriptor, ProviderEndpoints, SupportedGrants},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint is required for bootstrap.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint is mandatory.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// The keeper cannot operate without the refresh grant.
	#[error("Descriptor must enable the refresh_token grant.")]
	RefreshGrantRequired,
	/// Endpoints must use HTTPS (plain HTTP is accepted for loopback hosts only).
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	id: ProviderId,
	authorization_endpoint: Option<Url>,
	token_endpoint: Option<Url>,
	supported_grants: SupportedGrants,
	preferred_client_auth_method: ClientAuthMethod,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifier.
	pub fn new(id: ProviderId) -> Self {
		Self {
			id,
			authorization_endpoint: None,
			token_endpoint: None,
			supported_grants: SupportedGrants::default(),
			preferred_client_auth_method: ClientAuthMethod::default(),
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Marks a single grant type as supported.
	pub fn support_grant(mut self, grant: GrantType) -> Self {
		self.supported_grants = self.supported_grants.enable(grant);

		self
	}

	/// Marks multiple grants as supported.
	pub fn support_grants<I>(mut self, grants: I) -> Self
	where
		I: IntoIterator<Item = GrantType>,
	{
		for grant in grants {
			self.supported_grants = self.supported_grants.enable(grant);
		}

		self
	}

	/// Overrides the preferred client authentication method.
	pub fn preferred_client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.preferred_client_auth_method = method;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;
		let descriptor = ProviderDescriptor {
			id: self.id,
			endpoints: ProviderEndpoints { authorization, token },
			supported_grants: self.supported_grants,
			preferred_client_auth_method: self.preferred_client_auth_method,
		};

		descriptor.validate()?;

		Ok(descriptor)
	}
}

impl ProviderDescriptor {
	/// Validates invariants for the descriptor.
	pub fn validate(&self) -> Result<(), ProviderDescriptorError> {
		if !self.supports(GrantType::RefreshToken) {
			return Err(ProviderDescriptorError::RefreshGrantRequired);
		}

		validate_endpoint("authorization", &self.endpoints.authorization)?;
		validate_endpoint("token", &self.endpoints.token)?;

		Ok(())
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(url) => Ok(()),
		_ => Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() }),
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(addr)) => addr.is_loopback(),
		Some(url::Host::Ipv6(addr)) => addr.is_loopback(),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn builder(token: &str) -> ProviderDescriptorBuilder {
		ProviderDescriptor::builder(ProviderId::new("acme").expect("Provider id should be valid."))
			.authorization_endpoint(
				Url::parse("https://acme.test/oauth/authorize").expect("URL should parse."),
			)
			.token_endpoint(Url::parse(token).expect("URL should parse."))
	}

	#[test]
	fn plain_http_is_limited_to_loopback() {
		builder("http://127.0.0.1:8080/token")
			.support_grant(GrantType::RefreshToken)
			.build()
			.expect("Loopback HTTP should be accepted.");
		builder("http://localhost/token")
			.support_grant(GrantType::RefreshToken)
			.build()
			.expect("Localhost HTTP should be accepted.");

		let err = builder("http://acme.test/token")
			.support_grant(GrantType::RefreshToken)
			.build()
			.expect_err("Remote HTTP must be rejected.");

		assert_eq!(
			err,
			ProviderDescriptorError::InsecureEndpoint {
				endpoint: "token",
				url: "http://acme.test/token".into()
			}
		);
	}

	#[test]
	fn refresh_grant_is_mandatory() {
		let err = builder("https://acme.test/token")
			.support_grant(GrantType::AuthorizationCode)
			.build()
			.expect_err("Descriptors without refresh support must be rejected.");

		assert_eq!(err, ProviderDescriptorError::RefreshGrantRequired);
	}
}
