use std::path::{Path, PathBuf};

pub use figment::Figment;
use figment::providers::{Env, Format, Toml};
use ruma::OwnedServerName;
use serde::Deserialize;

use crate::{Result, err};

/// All configuration for the federation sender worker.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	/// The server_name this worker originates events for. It must match the
	/// name of the homeserver whose replication stream we consume; only
	/// events authored by `@user:server_name` are federated outward.
	///
	/// YOU NEED TO EDIT THIS
	pub server_name: OwnedServerName,

	/// Connection string for the homeserver storage this worker reads events,
	/// memberships and device queues from. Only the `memory:` scheme ships
	/// with this crate; relational backends plug in behind the storage trait.
	///
	/// default: "memory:"
	#[serde(default = "default_connection_string")]
	pub connection_string: String,

	/// Path of the ed25519 signing key document. Generated on first boot if
	/// the file does not exist.
	///
	/// default: "fedsender.key"
	#[serde(default = "default_signing_key_path")]
	pub signing_key_path: PathBuf,

	/// Host of the upstream replication listener.
	///
	/// default: "127.0.0.1"
	#[serde(default = "default_replication_host")]
	pub replication_host: String,

	/// TCP port of the upstream replication listener.
	///
	/// default: 9092
	#[serde(default = "default_replication_port")]
	pub replication_port: u16,

	/// Client name announced on the replication link (`NAME <client>`).
	///
	/// default: "NETCORESynapseReplication"
	#[serde(default = "default_client_name")]
	pub client_name: String,

	/// Accept federation TLS certificates that fail verification. Intended
	/// for development federations with self-signed certificates only.
	#[serde(default)]
	pub allow_self_signed: bool,

	/// Upper bound on transactions in flight across all destinations.
	///
	/// default: 100
	#[serde(default = "default_max_concurrency")]
	pub max_concurrency: usize,

	/// Port remote federation endpoints are assumed to listen on. Server
	/// discovery/delegation is out of scope for this worker.
	///
	/// default: 8448
	#[serde(default = "default_federation_port")]
	pub federation_port: u16,

	/// Tracing filter directives, e.g. "info,fedsender_service=debug".
	///
	/// default: "info"
	#[serde(default = "default_log")]
	pub log: String,

	/// default: true
	#[serde(default = "default_true")]
	pub log_colors: bool,

	/// Per federation request timeout, seconds.
	///
	/// default: 60
	#[serde(default = "default_request_timeout")]
	pub request_timeout: u64,

	/// Idle lifetime of pooled federation connections, seconds.
	///
	/// default: 15
	#[serde(default = "default_pool_idle_timeout")]
	pub pool_idle_timeout: u64,

	/// How long senders may take to finish in-flight requests on shutdown,
	/// seconds.
	///
	/// default: 60
	#[serde(default = "default_sender_shutdown_timeout")]
	pub sender_shutdown_timeout: u64,

	/// First retry delay after a transient federation failure, seconds.
	///
	/// default: 1
	#[serde(default = "default_backoff_base")]
	pub backoff_base: u64,

	/// Ceiling of the per-destination retry delay, seconds.
	///
	/// default: 3600
	#[serde(default = "default_backoff_cap")]
	pub backoff_cap: u64,

	/// Ceiling of the replication reconnect delay, seconds.
	///
	/// default: 30
	#[serde(default = "default_reconnect_backoff_cap")]
	pub reconnect_backoff_cap: u64,

	/// Keepalive cadence on the replication link, seconds.
	///
	/// default: 5
	#[serde(default = "default_ping_interval")]
	pub ping_interval: u64,

	/// A replication link with no inbound traffic for this long is
	/// re-established, seconds.
	///
	/// default: 30
	#[serde(default = "default_liveness_timeout")]
	pub liveness_timeout: u64,
}

impl Config {
	/// Pre-initialize config
	pub fn load<'a, I>(paths: I) -> Result<Figment>
	where
		I: Iterator<Item = &'a Path>,
	{
		let envs = [Env::var("FEDSENDER_CONFIG")];
		let envs_files = envs.into_iter().flatten().map(Toml::file);
		let paths_files = paths.map(Toml::file);

		let config = envs_files
			.chain(paths_files)
			.fold(Figment::new(), |config, file| config.merge(file.nested()))
			.merge(Env::prefixed("FEDSENDER_").global().split("__"));

		Ok(config)
	}

	/// Finalize config
	pub fn new(raw_config: &Figment) -> Result<Self> {
		let config: Self = raw_config
			.extract()
			.map_err(|e| err!("There was a problem with your configuration file: {e}"))?;

		Ok(config)
	}

	pub fn check(&self) -> Result {
		if self.max_concurrency == 0 {
			return Err(err!(Config("max_concurrency", "must be at least 1")));
		}

		if self.replication_port == 0 {
			return Err(err!(Config("replication_port", "must not be 0")));
		}

		if self.backoff_base == 0 {
			return Err(err!(Config("backoff_base", "must be at least 1 second")));
		}

		if self.backoff_cap < self.backoff_base {
			return Err(err!(Config(
				"backoff_cap",
				"must be no smaller than backoff_base"
			)));
		}

		if self.client_name.is_empty() || self.client_name.contains([' ', '\n', '\r']) {
			return Err(err!(Config(
				"client_name",
				"must be non-empty and contain no whitespace"
			)));
		}

		Ok(())
	}
}

fn default_connection_string() -> String { "memory:".to_owned() }

fn default_signing_key_path() -> PathBuf { PathBuf::from("fedsender.key") }

fn default_replication_host() -> String { "127.0.0.1".to_owned() }

fn default_replication_port() -> u16 { 9092 }

fn default_client_name() -> String { "NETCORESynapseReplication".to_owned() }

fn default_max_concurrency() -> usize { 100 }

fn default_federation_port() -> u16 { 8448 }

fn default_log() -> String { "info".to_owned() }

fn default_true() -> bool { true }

fn default_request_timeout() -> u64 { 60 }

fn default_pool_idle_timeout() -> u64 { 15 }

fn default_sender_shutdown_timeout() -> u64 { 60 }

fn default_backoff_base() -> u64 { 1 }

fn default_backoff_cap() -> u64 { 3600 }

fn default_reconnect_backoff_cap() -> u64 { 30 }

fn default_ping_interval() -> u64 { 5 }

fn default_liveness_timeout() -> u64 { 30 }

#[cfg(test)]
mod tests {
	use figment::{
		Figment,
		providers::{Format, Toml},
	};

	use super::Config;

	fn from_toml(raw: &str) -> Config {
		let figment = Figment::new().merge(Toml::string(raw));
		Config::new(&figment).expect("config parses")
	}

	#[test]
	fn minimal_config_fills_defaults() {
		let config = from_toml(r#"server_name = "origin.example""#);

		assert_eq!(config.server_name.as_str(), "origin.example");
		assert_eq!(config.replication_port, 9092);
		assert_eq!(config.max_concurrency, 100);
		assert_eq!(config.client_name, "NETCORESynapseReplication");
		assert!(!config.allow_self_signed);
		config.check().expect("default config passes check");
	}

	#[test]
	fn zero_concurrency_rejected() {
		let config = from_toml(
			r#"
				server_name = "origin.example"
				max_concurrency = 0
			"#,
		);

		assert!(config.check().is_err());
	}

	#[test]
	fn missing_server_name_rejected() {
		let figment = Figment::new().merge(Toml::string("max_concurrency = 5"));
		assert!(Config::new(&figment).is_err());
	}
}
