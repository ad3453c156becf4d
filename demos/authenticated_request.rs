//! Demonstrates seeding a slot with a pasted token pair and calling a business endpoint through
//! the retry-once executor.
//!
//! A local mock stands in for the Bling token endpoint and the contacts API; the first business
//! call answers `401` so the executor performs its single forced refresh before retrying.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use time::{Duration, OffsetDateTime};
use url::Url;
// self
use oauth2_keeper::{
	auth::{CredentialRecord, ProviderId, SlotId},
	config::ManagerConfig,
	executor::{ApiRequest, ReqwestExecutor},
	manager::ReqwestTokenManager,
	provider::{ClientAuthMethod, GrantType, ProviderDescriptor},
	reqwest::Client,
	store::{CredentialStore, MemoryStore},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/Api/v3/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				r#"{"access_token":"demo-access-2","refresh_token":"demo-refresh-2","token_type":"bearer","expires_in":21600}"#,
			);
		})
		.await;
	let rejected_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/Api/v3/contatos").header("authorization", "Bearer demo-access-1");
			then.status(401);
		})
		.await;
	let contacts_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/Api/v3/contatos").header("authorization", "Bearer demo-access-2");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"data":[{"id":1,"nome":"Ana"}]}"#);
		})
		.await;
	let descriptor = ProviderDescriptor::builder(ProviderId::new("bling-demo")?)
		.authorization_endpoint(Url::parse(&server.url("/Api/v3/oauth/authorize"))?)
		.token_endpoint(Url::parse(&server.url("/Api/v3/oauth/token"))?)
		.support_grants([GrantType::AuthorizationCode, GrantType::RefreshToken])
		.preferred_client_auth_method(ClientAuthMethod::ClientSecretPost)
		.build()?;
	let config = ManagerConfig::new("demo-client")
		.with_client_secret("demo-secret")
		.with_fallback_path(std::env::temp_dir().join("oauth2_keeper_demo_tokens.json"));
	let store: Arc<dyn CredentialStore> = Arc::new(MemoryStore::default());
	let manager = ReqwestTokenManager::new(config, store, descriptor)?;
	let issued_at = OffsetDateTime::now_utc() - Duration::hours(1);

	manager
		.seed_credential(
			CredentialRecord::builder(SlotId::default())
				.access_token("Bearer demo-access-1")
				.refresh_token("demo-refresh-1")
				.issued_at(issued_at)
				.expires_in(Duration::hours(6))
				.build()?,
		)
		.await?;

	let executor = ReqwestExecutor::with_reqwest(manager.clone(), Client::new());
	let response = executor
		.execute(ApiRequest::get(Url::parse(&server.url("/Api/v3/contatos"))?))
		.await?;

	println!("Contacts endpoint answered {} with {}.", response.status, response.text());

	let health = manager.refresh_token_health().await?;

	println!("Refresh token lapses at {} ({:?}).", health.lapses_at, health.level);

	for entry in manager.history().await? {
		println!("{} active={} status={:?}", entry.refresh_tag, entry.active, entry.status);
	}

	token_mock.assert_async().await;
	rejected_mock.assert_async().await;
	contacts_mock.assert_async().await;

	Ok(())
}
