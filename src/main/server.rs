use std::{path::PathBuf, sync::Arc};

use fedsender_core::{Config, Result, info};
use tokio::runtime;

use crate::{Args, args};

/// Server runtime state; complete
pub struct Server {
	/// Server runtime state; public portion
	pub server: Arc<fedsender_core::Server>,
}

impl Server {
	pub fn new(args: &Args, runtime: Option<&runtime::Handle>) -> Result<Arc<Self>> {
		let config_paths = args
			.config
			.as_deref()
			.into_iter()
			.flat_map(<[_]>::iter)
			.map(PathBuf::as_path);

		let config = Config::load(config_paths)
			.and_then(|raw| args::update(raw, args))
			.and_then(|raw| Config::new(&raw))?;

		crate::logging::init(&config)?;

		config.check()?;

		info!(
			server_name = %config.server_name,
			replication = %format!("{}:{}", config.replication_host, config.replication_port),
			log_levels = %config.log,
			"fedsender {}",
			env!("CARGO_PKG_VERSION"),
		);

		Ok(Arc::new(Self {
			server: Arc::new(fedsender_core::Server::new(config, runtime.cloned())),
		}))
	}
}
