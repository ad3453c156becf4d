//! Manager configuration: client credentials, refresh policy, and fallback locations.

// std
use std::env;
// self
use crate::{
	_prelude::*,
	auth::{SlotId, TokenSecret},
	error::ConfigError,
	provider::preset,
};

/// Default proactive refresh threshold (10 minutes).
pub const DEFAULT_PROACTIVE_THRESHOLD_SECS: u32 = 600;
/// Default refresh-token lifetime used by health reporting (Bling's lifetime).
pub const DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS: u32 = preset::BLING_REFRESH_TOKEN_LIFETIME_DAYS;

/// Settings consumed by [`TokenManager`](crate::manager::TokenManager).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ManagerConfig {
	/// Slot tracked by the manager.
	#[serde(default)]
	pub slot: SlotId,
	/// OAuth client identifier.
	pub client_id: String,
	/// OAuth client secret; `None` for providers that do not authenticate the client.
	#[serde(default)]
	pub client_secret: Option<TokenSecret>,
	/// Redirect URI registered with the provider (required for authorization helpers).
	#[serde(default)]
	pub redirect_uri: Option<Url>,
	/// Refresh once the access token expires within this many seconds.
	#[serde(default = "default_proactive_threshold_secs")]
	pub proactive_threshold_secs: u32,
	/// Provider-side lifetime of a refresh token, in days.
	#[serde(default = "default_refresh_token_lifetime_days")]
	pub refresh_token_lifetime_days: u32,
	/// Primary location of the local fallback copy.
	#[serde(default)]
	pub fallback_path: Option<PathBuf>,
	/// Secondary location used when the primary fallback path is not writable.
	#[serde(default)]
	pub secondary_fallback_path: Option<PathBuf>,
}
impl ManagerConfig {
	/// Creates a configuration with defaults for everything but the client id.
	pub fn new(client_id: impl Into<String>) -> Self {
		Self {
			slot: SlotId::default(),
			client_id: client_id.into(),
			client_secret: None,
			redirect_uri: None,
			proactive_threshold_secs: DEFAULT_PROACTIVE_THRESHOLD_SECS,
			refresh_token_lifetime_days: DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS,
			fallback_path: None,
			secondary_fallback_path: None,
		}
	}

	/// Reads `<PREFIX>_CLIENT_ID` (required) plus the optional `<PREFIX>_CLIENT_SECRET`,
	/// `<PREFIX>_REDIRECT_URI`, `<PREFIX>_SLOT`, `<PREFIX>_PROACTIVE_THRESHOLD_SECS`,
	/// `<PREFIX>_REFRESH_TOKEN_LIFETIME_DAYS`, `<PREFIX>_FALLBACK_PATH`, and
	/// `<PREFIX>_SECONDARY_FALLBACK_PATH`.
	pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
		Self::from_lookup(prefix, |name| env::var(name).ok())
	}

	/// Same as [`ManagerConfig::from_env`] but reads from an arbitrary lookup.
	pub fn from_lookup(
		prefix: &str,
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<Self, ConfigError> {
		let key = |suffix: &str| format!("{prefix}_{suffix}");
		let read = |suffix: &str| lookup(&key(suffix)).filter(|value| !value.trim().is_empty());
		let client_id =
			read("CLIENT_ID").ok_or_else(|| ConfigError::MissingEnv { name: key("CLIENT_ID") })?;
		let mut config = Self::new(client_id);

		if let Some(secret) = read("CLIENT_SECRET") {
			config.client_secret = Some(TokenSecret::new(secret));
		}
		if let Some(raw) = read("REDIRECT_URI") {
			config.redirect_uri = Some(parse_env(&key("REDIRECT_URI"), &raw)?);
		}
		if let Some(raw) = read("SLOT") {
			config.slot = parse_env(&key("SLOT"), &raw)?;
		}
		if let Some(raw) = read("PROACTIVE_THRESHOLD_SECS") {
			config.proactive_threshold_secs = parse_env(&key("PROACTIVE_THRESHOLD_SECS"), &raw)?;
		}
		if let Some(raw) = read("REFRESH_TOKEN_LIFETIME_DAYS") {
			config.refresh_token_lifetime_days =
				parse_env(&key("REFRESH_TOKEN_LIFETIME_DAYS"), &raw)?;
		}

		config.fallback_path = read("FALLBACK_PATH").map(PathBuf::from);
		config.secondary_fallback_path = read("SECONDARY_FALLBACK_PATH").map(PathBuf::from);
		config.validate()?;

		Ok(config)
	}

	/// Overrides the slot.
	pub fn with_slot(mut self, slot: SlotId) -> Self {
		self.slot = slot;

		self
	}

	/// Sets the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(TokenSecret::new(secret));

		self
	}

	/// Sets the redirect URI.
	pub fn with_redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.redirect_uri = Some(redirect_uri);

		self
	}

	/// Overrides the proactive refresh threshold.
	pub fn with_proactive_threshold_secs(mut self, secs: u32) -> Self {
		self.proactive_threshold_secs = secs;

		self
	}

	/// Overrides the refresh-token lifetime used by health reporting.
	pub fn with_refresh_token_lifetime_days(mut self, days: u32) -> Self {
		self.refresh_token_lifetime_days = days;

		self
	}

	/// Sets the primary fallback location.
	pub fn with_fallback_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.fallback_path = Some(path.into());

		self
	}

	/// Sets the secondary fallback location.
	pub fn with_secondary_fallback_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.secondary_fallback_path = Some(path.into());

		self
	}

	/// Proactive refresh threshold as a [`Duration`].
	pub fn proactive_threshold(&self) -> Duration {
		Duration::seconds(i64::from(self.proactive_threshold_secs))
	}

	/// Refresh-token lifetime as a [`Duration`].
	pub fn refresh_token_lifetime(&self) -> Duration {
		Duration::days(i64::from(self.refresh_token_lifetime_days))
	}

	/// Rejects settings the manager cannot run with.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.client_id.trim().is_empty() {
			return Err(ConfigError::invalid_setting("client_id", "must not be empty"));
		}
		if self.client_secret.as_ref().is_some_and(TokenSecret::is_blank) {
			return Err(ConfigError::invalid_setting("client_secret", "must not be blank"));
		}
		if self.refresh_token_lifetime_days == 0 {
			return Err(ConfigError::invalid_setting(
				"refresh_token_lifetime_days",
				"must be at least one day",
			));
		}
		if self.secondary_fallback_path.is_some() && self.fallback_path.is_none() {
			return Err(ConfigError::invalid_setting(
				"secondary_fallback_path",
				"requires fallback_path",
			));
		}

		Ok(())
	}
}

fn default_proactive_threshold_secs() -> u32 {
	DEFAULT_PROACTIVE_THRESHOLD_SECS
}

fn default_refresh_token_lifetime_days() -> u32 {
	DEFAULT_REFRESH_TOKEN_LIFETIME_DAYS
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: Display,
{
	raw.trim()
		.parse()
		.map_err(|e: T::Err| ConfigError::InvalidEnv { name: name.to_owned(), reason: e.to_string() })
}
