mod keypair;
mod sign;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use fedsender_core::{Result, Server, Transaction, err, warn};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use ruma::signatures::Ed25519KeyPair;

/// The signing + HTTP seam the per-destination senders drain through.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Deliver one signed transaction. `Ok` means the remote acknowledged
	/// the transaction id; redelivery of the same id must be a no-op there.
	async fn send_transaction(&self, txn: &Transaction) -> Result;
}

/// Signs and delivers transactions over federation HTTPS. Remote server
/// discovery is delegated; destinations resolve as
/// `https://<server_name>:<federation_port>`.
pub struct Client {
	server: Arc<Server>,
	keypair: Ed25519KeyPair,
	http: reqwest::Client,
}

impl Client {
	pub fn build(server: &Arc<Server>) -> Result<Arc<Self>> {
		let config = &server.config;
		let keypair = keypair::init(&config.signing_key_path)?;

		let mut builder = reqwest::Client::builder()
			.user_agent(concat!("fedsender/", env!("CARGO_PKG_VERSION")))
			.timeout(Duration::from_secs(config.request_timeout))
			.pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout))
			.redirect(reqwest::redirect::Policy::none())
			.no_proxy();

		if config.allow_self_signed {
			builder = builder.danger_accept_invalid_certs(true);
		}

		Ok(Arc::new(Self {
			server: server.clone(),
			keypair,
			http: builder.build()?,
		}))
	}
}

#[async_trait]
impl Transport for Client {
	async fn send_transaction(&self, txn: &Transaction) -> Result {
		let uri = format!("/_matrix/federation/v1/send/{}", txn.transaction_id);
		let body = txn.body()?;
		let authorization = sign::authorization(
			&self.keypair,
			&self.server.name,
			&txn.destination,
			"PUT",
			&uri,
			&body,
		)?;

		let url = format!(
			"https://{}:{}{uri}",
			txn.destination, self.server.config.federation_port,
		);

		let response = self
			.http
			.put(url)
			.header(AUTHORIZATION, authorization)
			.header(CONTENT_TYPE, "application/json")
			.body(serde_json::to_string(&body)?)
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			return Err(err!(Request(
				status,
				"transaction {} rejected by {}",
				txn.transaction_id,
				txn.destination,
			)));
		}

		// Per-event results ride in the 200 body; a rejected event is the
		// remote's verdict, not a delivery failure.
		if let Ok(result) = response.json::<serde_json::Value>().await {
			if let Some(pdus) = result.get("pdus").and_then(|p| p.as_object()) {
				for (event_id, outcome) in pdus {
					if outcome.get("error").is_some() {
						warn!(
							transaction_id = %txn.transaction_id,
							destination = %txn.destination,
							"remote rejected event {event_id}: {outcome}"
						);
					}
				}
			}
		}

		Ok(())
	}
}
