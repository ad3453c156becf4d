// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for the refresh state machine.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
	attempts: AtomicU64,
	network_refreshes: AtomicU64,
	adoptions: AtomicU64,
	success: AtomicU64,
	failure: AtomicU64,
	fallback_reads: AtomicU64,
	repairs: AtomicU64,
}
impl RefreshMetrics {
	/// Total number of refreshes requested (proactive or forced).
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Number of refresh-token grants actually sent to the provider.
	pub fn network_refreshes(&self) -> u64 {
		self.network_refreshes.load(Ordering::Relaxed)
	}

	/// Number of refresh requests satisfied by a record another caller had already rotated.
	pub fn adoptions(&self) -> u64 {
		self.adoptions.load(Ordering::Relaxed)
	}

	/// Number of refresh requests that produced a credential (including adoptions).
	pub fn successes(&self) -> u64 {
		self.success.load(Ordering::Relaxed)
	}

	/// Number of refresh requests that failed.
	pub fn failures(&self) -> u64 {
		self.failure.load(Ordering::Relaxed)
	}

	/// Number of reads served from the cache or the local fallback during a store outage.
	pub fn fallback_reads(&self) -> u64 {
		self.fallback_reads.load(Ordering::Relaxed)
	}

	/// Number of deferred writes replayed into the primary store.
	pub fn repairs(&self) -> u64 {
		self.repairs.load(Ordering::Relaxed)
	}

	pub(crate) fn record_attempt(&self) {
		self.attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_network_refresh(&self) {
		self.network_refreshes.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_adoption(&self) {
		self.adoptions.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_success(&self) {
		self.success.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failure(&self) {
		self.failure.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_fallback_read(&self) {
		self.fallback_reads.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_repair(&self) {
		self.repairs.fetch_add(1, Ordering::Relaxed);
	}
}
