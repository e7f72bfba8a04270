//! Thin wrappers over [`tracing`] macros so call-sites import from this
//! crate; keeps the door open for call-site instrumentation.

#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! event {
	( $level:expr, $($x:tt)+ ) => { ::tracing::event!( $level, $($x)+ ) }
}

#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! error {
	( $($x:tt)+ ) => { ::tracing::error!( $($x)+ ) }
}

#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! warn {
	( $($x:tt)+ ) => { ::tracing::warn!( $($x)+ ) }
}

#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! info {
	( $($x:tt)+ ) => { ::tracing::info!( $($x)+ ) }
}

#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! debug {
	( $($x:tt)+ ) => { ::tracing::debug!( $($x)+ ) }
}

#[macro_export]
#[collapse_debuginfo(yes)]
macro_rules! trace {
	( $($x:tt)+ ) => { ::tracing::trace!( $($x)+ ) }
}
