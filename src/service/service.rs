use std::sync::Arc;

use async_trait::async_trait;
use fedsender_core::Result;

/// A long-lived subsystem with a worker loop, managed by [`Services`].
///
/// [`Services`]: crate::Services
#[async_trait]
pub(crate) trait Service: Send + Sync {
	/// The service's long-running loop. Spawned once by the manager; a
	/// return ends the service, an `Err` brings the whole worker down.
	async fn worker(self: Arc<Self>) -> Result;

	/// Ask the worker to wind down. Must be idempotent.
	async fn interrupt(&self) {}

	fn name(&self) -> &'static str;
}

/// Trailing segment of a module path, used as a service name.
pub(crate) fn make_name(module_path: &'static str) -> &'static str {
	module_path
		.rsplit("::")
		.next()
		.expect("module path has at least one segment")
}
