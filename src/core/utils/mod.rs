pub mod result;
pub mod time;

pub use self::{
	result::{LogErr, Result},
	time::{
		exponential_backoff::{backoff_delay, continue_exponential_backoff_secs},
		now_millis as millis_since_unix_epoch, now_secs as secs_since_unix_epoch,
	},
};

#[inline]
pub fn exchange<T>(state: &mut T, source: T) -> T { std::mem::replace(state, source) }
