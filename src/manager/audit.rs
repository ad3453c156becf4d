//! Redacted history and refresh-token health reporting.

// self
use crate::{
	_prelude::*,
	auth::{CredentialRecord, RefreshTag, TokenStatus},
	http::TokenHttpClient,
	manager::TokenManager,
	oauth::TransportErrorMapper,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
};

const WARNING_WINDOW_DAYS: i64 = 5;
const CRITICAL_WINDOW_DAYS: i64 = 1;

/// Redacted view of one record in the slot's line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialAudit {
	/// Fingerprint of the record's refresh token.
	pub refresh_tag: RefreshTag,
	/// Fingerprint of the refresh token the record was minted from.
	pub rotated_from: Option<RefreshTag>,
	/// Issued-at instant.
	#[serde(with = "time::serde::rfc3339")]
	pub issued_at: OffsetDateTime,
	/// Access-token expiry instant.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
	/// Whether the record is the slot's current one.
	pub active: bool,
	/// Instant a newer record superseded this one.
	#[serde(with = "time::serde::rfc3339::option")]
	pub deactivated_at: Option<OffsetDateTime>,
	/// Instant the provider rejected the record's refresh token.
	#[serde(with = "time::serde::rfc3339::option")]
	pub revoked_at: Option<OffsetDateTime>,
	/// Lifecycle status when the audit was taken.
	pub status: TokenStatus,
}
impl CredentialAudit {
	fn of(record: &CredentialRecord, now: OffsetDateTime) -> Self {
		Self {
			refresh_tag: record.refresh_tag(),
			rotated_from: record.rotated_from.clone(),
			issued_at: record.issued_at,
			expires_at: record.expires_at,
			active: record.active,
			deactivated_at: record.deactivated_at,
			revoked_at: record.revoked_at,
			status: record.status_at(now),
		}
	}
}

/// Urgency of re-running the authorization flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum HealthLevel {
	/// More than five days left.
	Healthy,
	/// Five days or less left.
	Warning,
	/// One day or less left.
	Critical,
	/// The refresh token lapsed or was rejected; the slot needs a new authorization.
	Lapsed,
}
impl HealthLevel {
	fn classify(remaining: Duration, revoked: bool) -> Self {
		if revoked || remaining <= Duration::ZERO {
			Self::Lapsed
		} else if remaining <= Duration::days(CRITICAL_WINDOW_DAYS) {
			Self::Critical
		} else if remaining <= Duration::days(WARNING_WINDOW_DAYS) {
			Self::Warning
		} else {
			Self::Healthy
		}
	}
}

/// Projected lapse of the slot's refresh token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefreshTokenHealth {
	/// Fingerprint of the active refresh token.
	pub refresh_tag: RefreshTag,
	/// Instant the provider is expected to stop honouring the refresh token.
	#[serde(with = "time::serde::rfc3339")]
	pub lapses_at: OffsetDateTime,
	/// Time left until `lapses_at`; negative once lapsed.
	pub remaining: Duration,
	/// Urgency bucket derived from `remaining`.
	pub level: HealthLevel,
}

impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Returns every record kept for the slot, oldest first, without any token material.
	pub async fn history(&self) -> Result<Vec<CredentialAudit>> {
		let span = FlowSpan::new(FlowKind::Access, "history");
		let records = span.instrument(self.inner.store.history(self.slot())).await?;
		let now = OffsetDateTime::now_utc();

		Ok(records.iter().map(|record| CredentialAudit::of(record, now)).collect())
	}

	/// Reports when the active refresh token is expected to lapse.
	///
	/// A refresh token that is carried forward unchanged keeps the lapse instant of the record
	/// that first received it. Logs a warning inside the five-day window and an error inside the
	/// one-day window.
	pub async fn refresh_token_health(&self) -> Result<RefreshTokenHealth> {
		const KIND: FlowKind = FlowKind::Access;

		let span = FlowSpan::new(KIND, "refresh_token_health");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result: Result<RefreshTokenHealth> = span
			.instrument(async {
				let current = self.inner.resolve_current().await?;
				let minted_at = match self.inner.store.history(self.slot()).await {
					Ok(records) => first_issue_of(&records, &current.record),
					Err(e) => {
						tracing::debug!(error = %e, "History unavailable; using the active record's issue time.");

						current.record.issued_at
					},
				};
				let health = health_of(
					&current.record,
					minted_at,
					self.inner.config.refresh_token_lifetime(),
					OffsetDateTime::now_utc(),
				);

				match health.level {
					HealthLevel::Healthy => tracing::debug!(
						lapses_at = %health.lapses_at,
						"Refresh token is healthy."
					),
					HealthLevel::Warning => tracing::warn!(
						lapses_at = %health.lapses_at,
						remaining_hours = health.remaining.whole_hours(),
						"Refresh token lapses soon; schedule a new authorization."
					),
					HealthLevel::Critical | HealthLevel::Lapsed => tracing::error!(
						lapses_at = %health.lapses_at,
						remaining_hours = health.remaining.whole_hours(),
						level = ?health.level,
						"Refresh token lapsed or is about to; run the authorization flow now."
					),
				}

				Ok(health)
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}
}

/// Issue time of the oldest record holding the active record's refresh token.
fn first_issue_of(records: &[CredentialRecord], active: &CredentialRecord) -> OffsetDateTime {
	records
		.iter()
		.filter(|record| record.refresh_token == active.refresh_token)
		.map(|record| record.issued_at)
		.min()
		.map_or(active.issued_at, |first| first.min(active.issued_at))
}

fn health_of(
	active: &CredentialRecord,
	minted_at: OffsetDateTime,
	lifetime: Duration,
	now: OffsetDateTime,
) -> RefreshTokenHealth {
	let lapses_at = minted_at + lifetime;
	let remaining = lapses_at - now;

	RefreshTokenHealth {
		refresh_tag: active.refresh_tag(),
		lapses_at,
		remaining,
		level: HealthLevel::classify(remaining, active.is_revoked()),
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::auth::SlotId;

	fn record(refresh: &str, issued_at: OffsetDateTime) -> CredentialRecord {
		CredentialRecord::builder(SlotId::default())
			.access_token("access")
			.refresh_token(refresh)
			.issued_at(issued_at)
			.expires_in(Duration::hours(6))
			.build()
			.expect("Record fixture should build.")
	}

	#[test]
	fn levels_follow_the_remaining_window() {
		assert_eq!(HealthLevel::classify(Duration::days(10), false), HealthLevel::Healthy);
		assert_eq!(HealthLevel::classify(Duration::days(5), false), HealthLevel::Warning);
		assert_eq!(HealthLevel::classify(Duration::hours(20), false), HealthLevel::Critical);
		assert_eq!(HealthLevel::classify(Duration::ZERO, false), HealthLevel::Lapsed);
		assert_eq!(HealthLevel::classify(Duration::days(20), true), HealthLevel::Lapsed);
	}

	#[test]
	fn carried_refresh_tokens_keep_their_first_issue_time() {
		let first = macros::datetime!(2025-03-01 12:00 UTC);
		let carried = macros::datetime!(2025-03-20 12:00 UTC);
		let records = vec![record("r0", first - Duration::days(3)), record("r1", first), record("r1", carried)];
		let active = records[2].clone();
		let minted_at = first_issue_of(&records, &active);
		let health = health_of(&active, minted_at, Duration::days(30), carried);

		assert_eq!(minted_at, first);
		assert_eq!(health.lapses_at, macros::datetime!(2025-03-31 12:00 UTC));
		assert_eq!(health.level, HealthLevel::Healthy);

		let late = health_of(&active, minted_at, Duration::days(30), macros::datetime!(2025-03-27 12:00 UTC));

		assert_eq!(late.level, HealthLevel::Warning);
	}

	#[test]
	fn audit_view_never_carries_tokens() {
		let audit = CredentialAudit::of(
			&record("secret-refresh", macros::datetime!(2025-03-01 12:00 UTC)),
			macros::datetime!(2025-03-01 13:00 UTC),
		);
		let json = serde_json::to_string(&audit).expect("Audit should serialize.");

		assert_eq!(audit.status, TokenStatus::Valid);
		assert!(!json.contains("secret-refresh"));
		assert!(!json.contains("access"));
	}
}
