use std::{
	collections::HashMap,
	sync::Mutex,
	time::{Duration, Instant},
};

use fedsender_core::{Error, utils::backoff_delay};
use http::StatusCode;
use ruma::{OwnedServerName, ServerName};

/// How one send failure is treated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum Disposition {
	/// Worth retrying: 5xx, 429, connection refused/reset, TLS and DNS
	/// trouble, timeouts.
	Transient,
	/// Not retryable: 4xx other than 429, malformed responses, signing
	/// failures. The transaction is dropped.
	Terminal,
}

pub(super) fn classify(error: &Error) -> Disposition {
	match error {
		| Error::Request(status, _) if *status == StatusCode::TOO_MANY_REQUESTS =>
			Disposition::Transient,
		| Error::Request(status, _) if status.is_client_error() => Disposition::Terminal,
		| Error::Request(..) => Disposition::Transient,
		| Error::Reqwest(e) if e.is_decode() || e.is_builder() => Disposition::Terminal,
		| Error::Reqwest(_) => Disposition::Transient,
		| Error::Signatures(_) | Error::Json(_) | Error::CanonicalJson(_) =>
			Disposition::Terminal,
		| Error::BadServerResponse(_) => Disposition::Terminal,
		| _ => Disposition::Transient,
	}
}

#[derive(Debug)]
struct Entry {
	consecutive_failures: u32,
	next_attempt_allowed: Instant,
}

/// Per-destination failure ledger and delay schedule. An entry appears on
/// the first transient failure and clears on the first subsequent success
/// or terminal classification.
pub(super) struct Backoff {
	base: Duration,
	cap: Duration,
	entries: Mutex<HashMap<OwnedServerName, Entry>>,
}

impl Backoff {
	pub(super) fn new(base: Duration, cap: Duration) -> Self {
		Self { base, cap, entries: Mutex::new(HashMap::new()) }
	}

	/// Record a transient failure; returns when the destination's sender
	/// may attempt again.
	pub(super) fn failure(&self, destination: &ServerName) -> Instant {
		let mut entries = self.entries.lock().expect("locked");
		let entry = entries
			.entry(destination.to_owned())
			.or_insert(Entry {
				consecutive_failures: 0,
				next_attempt_allowed: Instant::now(),
			});

		entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
		let delay = backoff_delay(self.base, self.cap, entry.consecutive_failures);
		entry.next_attempt_allowed = Instant::now()
			.checked_add(delay)
			.unwrap_or_else(Instant::now);

		entry.next_attempt_allowed
	}

	pub(super) fn clear(&self, destination: &ServerName) {
		self.entries
			.lock()
			.expect("locked")
			.remove(destination);
	}

	pub(super) fn failures(&self, destination: &ServerName) -> u32 {
		self.entries
			.lock()
			.expect("locked")
			.get(destination)
			.map_or(0, |entry| entry.consecutive_failures)
	}

	/// When the destination's sender may try again, if it is backing off.
	#[cfg(test)]
	pub(super) fn next_attempt(&self, destination: &ServerName) -> Option<Instant> {
		self.entries
			.lock()
			.expect("locked")
			.get(destination)
			.map(|entry| entry.next_attempt_allowed)
	}
}
