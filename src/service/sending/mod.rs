mod backoff;
mod devices;
mod events;
mod presence;
mod queue;
mod sender;

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
	time::Duration,
};

use async_trait::async_trait;
use fedsender_core::{
	EduEvent, PduEvent, Presence, Result, Server, debug, err, error,
	result::LogErr,
};
use fedsender_database::Storage;
use ruma::{OwnedServerName, ServerName};
use serde_json::Value as JsonValue;
use tokio::{sync::Semaphore, task::JoinSet};

use self::{backoff::Backoff, devices::DeviceStreamRow, queue::Queues};
use crate::{
	federation::Transport,
	replication::{self, StreamUpdate},
};

/// The outbound transaction queue: coalesces PDUs and EDUs into per
/// destination size-capped transactions, serializes delivery per remote,
/// bounds global concurrency, and backs off failing peers without
/// starving the rest.
pub struct Service {
	server: Arc<Server>,
	db: Arc<dyn Storage>,
	transport: Arc<dyn Transport>,
	queues: Queues,
	backoff: Backoff,
	semaphore: Arc<Semaphore>,
	channel: (loole::Sender<OwnedServerName>, loole::Receiver<OwnedServerName>),
	subscriptions: Mutex<Option<Subscriptions>>,
	device_cursors: Mutex<HashMap<OwnedServerName, devices::DeviceCursors>>,
}

struct Subscriptions {
	events: loole::Receiver<StreamUpdate<JsonValue>>,
	presence: loole::Receiver<StreamUpdate<Presence>>,
	devices: loole::Receiver<StreamUpdate<DeviceStreamRow>>,
}

impl Service {
	pub fn build(
		server: &Arc<Server>,
		db: &Arc<dyn Storage>,
		transport: &Arc<dyn Transport>,
		replication: &replication::Service,
	) -> Result<Arc<Self>> {
		let config = &server.config;
		let subscriptions = Subscriptions {
			events: replication.subscribe("events"),
			presence: replication.subscribe("presence"),
			devices: replication.subscribe("device_messages"),
		};

		Ok(Arc::new(Self {
			server: server.clone(),
			db: db.clone(),
			transport: transport.clone(),
			queues: Queues::new(server.name.clone()),
			backoff: Backoff::new(
				Duration::from_secs(config.backoff_base),
				Duration::from_secs(config.backoff_cap),
			),
			semaphore: Arc::new(Semaphore::new(config.max_concurrency)),
			channel: loole::unbounded(),
			subscriptions: Mutex::new(Some(subscriptions)),
			device_cursors: Mutex::new(HashMap::new()),
		}))
	}

	/// Queue a PDU toward one destination and kick its sender.
	pub fn send_pdu(&self, destination: &ServerName, pdu: PduEvent) -> Result {
		self.queues.push_pdu(destination, pdu);
		self.kick(destination)
	}

	/// Queue an EDU toward its destination and kick the sender. EDUs
	/// sharing an `internal_key` replace their pending predecessor.
	pub fn send_edu(&self, edu: EduEvent) -> Result {
		let destination = edu.destination.clone();
		self.queues.push_edu(edu);
		self.kick(&destination)
	}

	/// Pending transactions queued toward one destination.
	#[cfg(test)]
	pub(crate) fn pending_for(&self, destination: &ServerName) -> Vec<fedsender_core::Transaction> {
		self.queues.pending_snapshot(destination)
	}

	/// Wake the destination's sender task, starting one if none is active.
	pub fn kick(&self, destination: &ServerName) -> Result {
		self.channel
			.0
			.send(destination.to_owned())
			.map_err(|e| err!("sender channel closed: {e}"))
	}

	async fn pump_loop(self: Arc<Self>) -> Result {
		let Some(subscriptions) = self.subscriptions.lock().expect("locked").take() else {
			return Ok(());
		};

		let Subscriptions { events, presence, devices } = subscriptions;
		loop {
			tokio::select! {
				() = self.server.until_shutdown() => break,

				update = events.recv_async() => match update {
					| Ok(update) => {
						self.pump_events(update).await.log_err().ok();
					},
					| Err(_) => break,
				},
				update = presence.recv_async() => match update {
					| Ok(update) => {
						self.pump_presence(update).await.log_err().ok();
					},
					| Err(_) => break,
				},
				update = devices.recv_async() => match update {
					| Ok(update) => {
						self.pump_devices(update).await.log_err().ok();
					},
					| Err(_) => break,
				},
			}
		}

		debug!("replication subscriptions closed; pumps finished");
		Ok(())
	}
}

#[async_trait]
impl crate::Service for Service {
	async fn worker(self: Arc<Self>) -> Result {
		let mut loops: JoinSet<Result> = JoinSet::new();
		loops.spawn(self.clone().pump_loop());
		loops.spawn(self.clone().dispatch_loop());

		let mut result = Ok(());
		while let Some(joined) = loops.join_next().await {
			match joined {
				| Ok(Ok(())) => {},
				| Ok(Err(e)) => {
					error!("sending loop failed: {e}");
					self.interrupt().await;
					if result.is_ok() {
						result = Err(e);
					}
				},
				| Err(e) => {
					error!("sending loop panicked: {e}");
					if result.is_ok() {
						result = Err(e.into());
					}
				},
			}
		}

		result
	}

	async fn interrupt(&self) {
		let (sender, _) = &self.channel;
		if !sender.is_closed() {
			sender.close();
		}
	}

	fn name(&self) -> &'static str { crate::service::make_name(std::module_path!()) }
}
