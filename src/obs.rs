//! Observability helpers for keeper flows.
//!
//! Every manager and executor operation runs inside an `oauth2_keeper.flow` span carrying the
//! `flow` and `stage` fields. Enable the `metrics` feature to increment the
//! `oauth2_keeper_flow_total` counter for every attempt/success/failure, labeled by `flow` +
//! `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flow kinds observed by the keeper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Credential reads, history, and health reporting.
	Access,
	/// Authorization-code exchange or manual seeding.
	Bootstrap,
	/// Refresh-token grant (proactive or forced).
	Refresh,
	/// Authenticated business request.
	Execute,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Access => "access",
			FlowKind::Bootstrap => "bootstrap",
			FlowKind::Refresh => "refresh",
			FlowKind::Execute => "execute",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a keeper operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Completion in degraded mode (fallback read or stale credential).
	Degraded,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Degraded => "degraded",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
