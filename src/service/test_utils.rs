//! Shared fixtures for the crate's test modules.

use std::sync::Arc;

use async_trait::async_trait;
use fedsender_core::{Config, Result, Server, Transaction};
use figment::{
	Figment,
	providers::{Format, Toml},
};

use crate::federation::Transport;

/// A [`Server`] built from inline TOML, with test-friendly backoff so
/// paused-clock tests do not crawl through hour-long delays.
pub(crate) fn server(toml: &str) -> Arc<Server> {
	let figment = Figment::new()
		.merge(Toml::string(toml))
		.join(Toml::string("backoff_cap = 30"));

	let config = Config::new(&figment).expect("test config parses");
	config.check().expect("test config passes check");
	Arc::new(Server::new(config, None))
}

/// Accepts every transaction and forgets it.
pub(crate) struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
	async fn send_transaction(&self, _txn: &Transaction) -> Result { Ok(()) }
}
