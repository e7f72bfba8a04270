pub mod args;
mod logging;
pub mod server;
mod signals;

use std::sync::Arc;

use fedsender_core::{Error, Result, debug_info};
use fedsender_service::{Services, federation};

pub use crate::{args::Args, server::Server};

/// Process exit code for a fatal error: 1 for configuration problems, 2
/// for an unrecoverable replication-protocol error.
#[must_use]
pub fn exit_code(error: &Error) -> i32 {
	match error {
		| Error::Config(..) | Error::Figment(_) => 1,
		| Error::Replication(_) => 2,
		| _ => 1,
	}
}

pub fn run() -> Result {
	let args = args::parse();
	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.thread_name("fedsender:worker")
		.build()?;

	let server = Server::new(&args, Some(runtime.handle()))?;
	let result = runtime.block_on(async_run(&server));

	debug_info!("exit runtime");
	result
}

async fn async_run(server: &Arc<Server>) -> Result {
	let core = &server.server;
	tokio::spawn(signals::enable(core.clone()));

	let db = fedsender_database::open(&core.config)?;
	let transport: Arc<dyn federation::Transport> = federation::Client::build(core)?;

	let services = Services::build(core, &db, &transport)?;
	services.start().await?;
	let result = services.run().await;
	services.stop().await;

	result
}
