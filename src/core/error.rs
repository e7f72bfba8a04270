use std::{borrow::Cow, convert::Infallible, sync::PoisonError};

#[derive(thiserror::Error)]
pub enum Error {
	// std
	#[error(transparent)]
	FromUtf8(#[from] std::string::FromUtf8Error),
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	ParseInt(#[from] std::num::ParseIntError),
	#[error(transparent)]
	SystemTime(#[from] std::time::SystemTimeError),
	#[error(transparent)]
	Utf8(#[from] std::str::Utf8Error),

	// third-party
	#[error(transparent)]
	Figment(#[from] figment::error::Error),
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error("Join error: {0}")]
	JoinError(#[from] tokio::task::JoinError),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	#[error("Mutex poisoned: {0}")]
	Poison(Cow<'static, str>),
	#[error("Request error: {0}")]
	Reqwest(#[from] reqwest::Error),

	// ruma
	#[error(transparent)]
	CanonicalJson(#[from] ruma::CanonicalJsonError),
	#[error(transparent)]
	Mxid(#[from] ruma::IdParseError),
	#[error(transparent)]
	Signatures(#[from] ruma::signatures::Error),

	// fedsender
	#[error("{0}")]
	BadServerResponse(Cow<'static, str>),
	#[error("There was a problem with the '{0}' directive in your configuration: {1}")]
	Config(&'static str, Cow<'static, str>),
	#[error("{0}")]
	Database(Cow<'static, str>),
	#[error("Remote server {0} responded with: {1}")]
	Federation(ruma::OwnedServerName, Cow<'static, str>),
	#[error("{1} ({0})")]
	Request(http::StatusCode, Cow<'static, str>),
	#[error("{0}")]
	Replication(Cow<'static, str>),

	// unique / untyped
	#[error("{0}")]
	Err(Cow<'static, str>),
}

impl Error {
	/// Generate the error message string.
	pub fn message(&self) -> String { format!("{self}") }

	/// Returns the closest HTTP status code carried by this error, if any.
	pub fn status_code(&self) -> Option<http::StatusCode> {
		match self {
			| Self::Request(code, ..) => Some(*code),
			| Self::Reqwest(error) => error.status(),
			| _ => None,
		}
	}
}

impl std::fmt::Debug for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.message())
	}
}

impl<T> From<PoisonError<T>> for Error {
	#[cold]
	#[inline(never)]
	fn from(e: PoisonError<T>) -> Self { Self::Poison(e.to_string().into()) }
}

#[allow(clippy::fallible_impl_from)]
impl From<Infallible> for Error {
	#[cold]
	#[inline(never)]
	fn from(_e: Infallible) -> Self {
		panic!("infallible error should never exist");
	}
}

/// Construct an [`Error`] from a format expression, optionally wrapped in a
/// variant: `err!("plain {msg}")`, `err!(Config("key", "{e}"))`, etc.
#[macro_export]
macro_rules! err {
	(Config($key:literal, $($args:tt)+)) => {
		$crate::error::Error::Config($key, format!($($args)+).into())
	};

	(Database($($args:tt)+)) => {
		$crate::error::Error::Database(format!($($args)+).into())
	};

	(Replication($($args:tt)+)) => {
		$crate::error::Error::Replication(format!($($args)+).into())
	};

	(BadServerResponse($($args:tt)+)) => {
		$crate::error::Error::BadServerResponse(format!($($args)+).into())
	};

	(Federation($server:expr, $($args:tt)+)) => {
		$crate::error::Error::Federation($server, format!($($args)+).into())
	};

	(Request($status:expr, $($args:tt)+)) => {
		$crate::error::Error::Request($status, format!($($args)+).into())
	};

	($($args:tt)+) => {
		$crate::error::Error::Err(format!($($args)+).into())
	};
}

/// Short-circuiting `Err(err!(..))`.
#[macro_export]
#[allow(non_snake_case)]
macro_rules! Err {
	($($args:tt)+) => {
		Err($crate::err!($($args)+))
	};
}
