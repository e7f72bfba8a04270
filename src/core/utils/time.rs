use std::time::{SystemTime, UNIX_EPOCH};

#[inline]
#[must_use]
#[allow(clippy::as_conversions)]
pub fn now_millis() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("positive duration after epoch")
		.as_millis()
		.try_into()
		.expect("millis since epoch fits in u64")
}

#[inline]
#[must_use]
pub fn now_secs() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("positive duration after epoch")
		.as_secs()
}

pub mod exponential_backoff {
	use std::time::Duration;

	use rand::Rng;

	/// Delay before the next attempt after `failures` consecutive failures:
	/// `min(cap, base * 2^(failures - 1))`, jittered by 0.5..1.5.
	#[must_use]
	pub fn backoff_delay(base: Duration, cap: Duration, failures: u32) -> Duration {
		let pow = failures.saturating_sub(1).min(31);
		let delay = base
			.saturating_mul(2_u32.saturating_pow(pow))
			.min(cap);

		delay.mul_f64(jitter())
	}

	/// Whether `elapsed` is still inside the backoff window for `tries`
	/// failures bounded by `min..max` seconds.
	#[must_use]
	pub fn continue_exponential_backoff_secs(
		min: u64,
		max: u64,
		elapsed: Duration,
		tries: u32,
	) -> bool {
		let min = Duration::from_secs(min);
		let max = Duration::from_secs(max);
		let pow = tries.saturating_sub(1).min(31);
		let window = min
			.saturating_mul(2_u32.saturating_pow(pow))
			.min(max);

		elapsed < window
	}

	fn jitter() -> f64 { rand::thread_rng().gen_range(0.5..1.5) }

}
