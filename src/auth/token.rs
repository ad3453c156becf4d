//! Token models: redacted secrets, persisted records, and caller-facing credentials.

pub mod credential;
pub mod record;
pub mod secret;
