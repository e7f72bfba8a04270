use std::fmt::Display;

use tracing::error;

pub type Result<T = (), E = crate::Error> = std::result::Result<T, E>;

/// Log the error contained in a `Result` without consuming it.
pub trait LogErr<T, E: Display> {
	#[must_use]
	fn log_err(self) -> Self;
}

impl<T, E: Display> LogErr<T, E> for Result<T, E> {
	#[inline]
	fn log_err(self) -> Self { self.inspect_err(|e| error!("{e}")) }
}
