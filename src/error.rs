//! Keeper-level error types shared by the manager, executor, stores, and transports.

// self
use crate::{_prelude::*, auth::SlotId};

/// Keeper-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical keeper error exposed by public APIs.
///
/// Terminal authentication failures ([`Error::NotBootstrapped`] and
/// [`Error::ReauthorizationRequired`]) are kept apart from the transient ones so calling layers
/// can present a "reauthorize now" action instead of a generic failure.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Primary credential store could not be reached and no local copy was available.
	#[error("{0}")]
	StoreUnavailable(#[from] crate::store::StoreError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token endpoint answered with something other than a token or a terminal rejection.
	#[error(transparent)]
	ProviderUnavailable(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS) on the token endpoint or a business call.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// No credential has ever been issued for the slot.
	#[error("No credential has been bootstrapped for slot `{slot}`.")]
	NotBootstrapped {
		/// Slot that has no active record.
		slot: SlotId,
	},
	/// Provider rejected the refresh token (expired, revoked, or already used).
	#[error("Provider rejected the refresh token; reauthorization is required: {reason}.")]
	ReauthorizationRequired {
		/// Provider- or keeper-supplied reason string.
		reason: String,
	},
	/// Client authentication failed or credentials are malformed.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or keeper-supplied reason string.
		reason: String,
	},
	/// Business call was rejected before and after a forced refresh.
	#[error("Provider rejected the request with status {status} after a credential refresh.")]
	AuthenticationFailed {
		/// Status returned by the retried request.
		status: u16,
	},
}
impl Error {
	/// Returns `true` when only a new authorization-code exchange can recover the slot.
	pub fn requires_reauthorization(&self) -> bool {
		matches!(self, Self::NotBootstrapped { .. } | Self::ReauthorizationRequired { .. })
	}

	/// Returns `true` when retrying later (with backoff) may succeed.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::StoreUnavailable(_) | Self::ProviderUnavailable(_) | Self::Transport(_))
	}
}

/// Configuration and validation failures raised by the keeper.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Descriptor does not enable the requested grant.
	#[error("Descriptor `{descriptor}` does not enable the {grant} grant.")]
	UnsupportedGrant {
		/// Provider identifier string.
		descriptor: String,
		/// Disabled grant label.
		grant: &'static str,
	},
	/// Credential record validation failed.
	#[error("Unable to build credential record.")]
	CredentialBuild(#[from] crate::auth::CredentialRecordError),
	/// Slot or provider identifier failed validation.
	#[error("Identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Provider descriptor failed validation.
	#[error("Provider descriptor is invalid.")]
	InvalidProvider(#[from] crate::provider::ProviderDescriptorError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// A configuration value is out of range or empty.
	#[error("Setting `{field}` is invalid: {reason}.")]
	InvalidSetting {
		/// Setting name.
		field: &'static str,
		/// Human-readable validation message.
		reason: String,
	},
	/// A required environment variable is not set.
	#[error("Environment variable `{name}` is not set.")]
	MissingEnv {
		/// Variable name.
		name: String,
	},
	/// An environment variable could not be parsed.
	#[error("Environment variable `{name}` is invalid: {reason}.")]
	InvalidEnv {
		/// Variable name.
		name: String,
		/// Parser message.
		reason: String,
	},
	/// A business request header could not be encoded.
	#[error("Header `{name}` has an invalid value.")]
	InvalidHeader {
		/// Header name.
		name: String,
	},
	/// A business request body could not be serialized.
	#[error("Request body could not be serialized.")]
	InvalidBody {
		/// Serializer failure.
		#[source]
		source: serde_json::Error,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	pub(crate) fn invalid_setting(field: &'static str, reason: impl Into<String>) -> Self {
		Self::InvalidSetting { field, reason: reason.into() }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry with backoff).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or keeper-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The background refresh task stopped before producing a result.
	#[error("Credential refresh was interrupted before completing.")]
	RefreshInterrupted,
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn terminal_and_transient_errors_are_disjoint() {
		let slot = SlotId::new("bling").expect("Slot fixture should be valid.");
		let terminal = [
			Error::NotBootstrapped { slot },
			Error::ReauthorizationRequired { reason: "invalid_grant".into() },
		];

		for err in &terminal {
			assert!(err.requires_reauthorization(), "{err} should require reauthorization");
			assert!(!err.is_transient());
		}

		let transient = [
			Error::from(StoreError::Unavailable { message: "offline".into() }),
			Error::from(TransientError::RefreshInterrupted),
			Error::from(TransportError::Io(std::io::Error::other("reset"))),
		];

		for err in &transient {
			assert!(err.is_transient(), "{err} should be transient");
			assert!(!err.requires_reauthorization());
		}

		for err in [
			Error::AuthenticationFailed { status: 401 },
			Error::InvalidClient { reason: "bad secret".into() },
		] {
			assert!(!err.is_transient());
			assert!(!err.requires_reauthorization());
		}
	}

	#[test]
	fn store_error_keeps_its_source() {
		let store_error = StoreError::Backend { message: "database unreachable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::StoreUnavailable(_)));
		assert!(error.to_string().contains("database unreachable"));

		let source = StdError::source(&error)
			.expect("Keeper error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
