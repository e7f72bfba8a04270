use std::sync::Arc;

use fedsender_core::{Server, debug, info};

#[cfg(unix)]
pub(crate) async fn enable(server: Arc<Server>) {
	use tokio::signal::unix::{SignalKind, signal};

	let mut terminate = signal(SignalKind::terminate()).expect("SIGTERM handler installs");
	let mut interrupt = signal(SignalKind::interrupt()).expect("SIGINT handler installs");

	loop {
		let sig = tokio::select! {
			_ = terminate.recv() => "SIGTERM",
			_ = interrupt.recv() => "SIGINT",
		};

		info!("received {sig}, shutting down");
		if server.shutdown().is_err() {
			debug!("shutdown already in progress");
			return;
		}
	}
}

#[cfg(not(unix))]
pub(crate) async fn enable(server: Arc<Server>) {
	tokio::signal::ctrl_c()
		.await
		.expect("ctrl-c handler installs");

	info!("received interrupt, shutting down");
	server.shutdown().ok();
}
