use std::{
	sync::atomic::{AtomicU64, AtomicUsize, Ordering},
	time::Duration,
};

/// Counters describing outbound federation progress. The external metrics
/// sink is a collaborator; these are exported through the periodic status
/// log and read directly by tests.
#[derive(Debug, Default)]
pub struct Metrics {
	/// Transactions currently in flight across all destinations.
	pub ongoing: AtomicUsize,

	pub transactions_sent: AtomicU64,
	pub transactions_failed: AtomicU64,
	pub transactions_retried: AtomicU64,

	pub pdus_sent: AtomicU64,
	pub edus_sent: AtomicU64,

	send_time_ms: AtomicU64,
}

impl Metrics {
	#[must_use]
	pub fn new() -> Self { Self::default() }

	pub fn start_send(&self) { self.ongoing.fetch_add(1, Ordering::Relaxed); }

	pub fn finish_send(&self) { self.ongoing.fetch_sub(1, Ordering::Relaxed); }

	pub fn record_success(&self, elapsed: Duration, pdus: usize, edus: usize) {
		self.transactions_sent.fetch_add(1, Ordering::Relaxed);
		self.pdus_sent
			.fetch_add(pdus as u64, Ordering::Relaxed);
		self.edus_sent
			.fetch_add(edus as u64, Ordering::Relaxed);
		self.send_time_ms
			.fetch_add(elapsed.as_millis().try_into().unwrap_or(u64::MAX), Ordering::Relaxed);
	}

	pub fn record_retry(&self) { self.transactions_retried.fetch_add(1, Ordering::Relaxed); }

	pub fn record_failure(&self) { self.transactions_failed.fetch_add(1, Ordering::Relaxed); }

	/// Mean send duration over the life of the process.
	#[must_use]
	pub fn mean_send_time(&self) -> Duration {
		let sent = self.transactions_sent.load(Ordering::Relaxed);
		if sent == 0 {
			return Duration::ZERO;
		}

		Duration::from_millis(self.send_time_ms.load(Ordering::Relaxed) / sent)
	}
}
