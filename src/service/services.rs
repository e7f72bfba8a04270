use std::sync::Arc;

use fedsender_core::{Result, Server, debug, error};
use fedsender_database::Storage;
use tokio::{sync::Mutex, task::JoinSet};

use crate::{Service, federation::Transport, replication, sending};

/// Builds and supervises the worker's services.
pub struct Services {
	pub server: Arc<Server>,
	pub db: Arc<dyn Storage>,
	pub replication: Arc<replication::Service>,
	pub sending: Arc<sending::Service>,
	services: Vec<Arc<dyn Service>>,
	workers: Mutex<JoinSet<(&'static str, Result)>>,
}

impl Services {
	pub fn build(
		server: &Arc<Server>,
		db: &Arc<dyn Storage>,
		transport: &Arc<dyn Transport>,
	) -> Result<Arc<Self>> {
		let replication = replication::Service::build(server)?;
		let sending = sending::Service::build(server, db, transport, &replication)?;
		let services: Vec<Arc<dyn Service>> = vec![replication.clone(), sending.clone()];

		Ok(Arc::new(Self {
			server: server.clone(),
			db: db.clone(),
			replication,
			sending,
			services,
			workers: Mutex::new(JoinSet::new()),
		}))
	}

	/// Spawn every service worker onto the current runtime.
	pub async fn start(self: &Arc<Self>) -> Result {
		let mut workers = self.workers.lock().await;
		for service in &self.services {
			let service = service.clone();
			let name = service.name();
			debug!("starting {name}");
			workers.spawn(async move { (name, service.worker().await) });
		}

		Ok(())
	}

	/// Wait for the workers. The first failure shuts the rest down and is
	/// returned once everything has stopped.
	pub async fn run(&self) -> Result {
		let mut result = Ok(());
		let mut workers = self.workers.lock().await;
		while let Some(joined) = workers.join_next().await {
			match joined {
				| Ok((name, Ok(()))) => debug!("{name} worker finished"),
				| Ok((name, Err(e))) => {
					error!("{name} worker failed: {e}");
					self.server.shutdown().ok();
					self.interrupt().await;
					if result.is_ok() {
						result = Err(e);
					}
				},
				| Err(e) => {
					error!("worker panicked: {e}");
					self.server.shutdown().ok();
					self.interrupt().await;
					if result.is_ok() {
						result = Err(e.into());
					}
				},
			}
		}

		result
	}

	/// Interrupt and join everything still running.
	pub async fn stop(&self) {
		self.interrupt().await;
		let mut workers = self.workers.lock().await;
		while workers.join_next().await.is_some() {}
	}

	async fn interrupt(&self) {
		for service in &self.services {
			service.interrupt().await;
		}
	}
}
