use std::{sync::Arc, time::Duration};

use fedsender_core::{Result, debug, debug_warn, result::LogErr, trace, warn};
use ruma::{OwnedServerName, ServerName};
use tokio::{
	task::JoinSet,
	time::{Instant, sleep, sleep_until},
};

use super::{
	Service,
	backoff::{Disposition, classify},
	queue::StartDecision,
};

impl Service {
	/// Owns the sender tasks: every kick either observes a running sender
	/// for the destination or starts one. Runs until the kick channel
	/// closes or shutdown is signalled, then drains in-flight senders
	/// under the configured deadline.
	pub(super) async fn dispatch_loop(self: Arc<Self>) -> Result {
		use std::sync::atomic::Ordering;

		let receiver = self.channel.1.clone();
		let mut senders: JoinSet<()> = JoinSet::new();
		let mut status = tokio::time::interval(Duration::from_secs(60));
		status.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				() = self.server.until_shutdown() => break,

				kick = receiver.recv_async() => match kick {
					| Ok(destination) => self.handle_kick(destination, &mut senders),
					| Err(_) => break,
				},

				Some(joined) = senders.join_next(), if !senders.is_empty() => {
					if let Err(e) = joined {
						warn!("sender task failed: {e}");
					}
				},

				_ = status.tick() => {
					let metrics = &self.server.metrics;
					debug!(
						ongoing = metrics.ongoing.load(Ordering::Relaxed),
						sent = metrics.transactions_sent.load(Ordering::Relaxed),
						retried = metrics.transactions_retried.load(Ordering::Relaxed),
						failed = metrics.transactions_failed.load(Ordering::Relaxed),
						mean_send_time = ?metrics.mean_send_time(),
						"sender status"
					);
				},
			}
		}

		self.finish_senders(&mut senders).await;
		Ok(())
	}

	fn handle_kick(self: &Arc<Self>, destination: OwnedServerName, senders: &mut JoinSet<()>) {
		match self.queues.try_start(&destination) {
			| StartDecision::AlreadyRunning => {},
			| StartDecision::Start { hydrate } => {
				let service = self.clone();
				senders.spawn(service.run_destination(destination, hydrate));
			},
		}
	}

	async fn finish_senders(&self, senders: &mut JoinSet<()>) {
		let timeout = Duration::from_secs(self.server.config.sender_shutdown_timeout);
		let now = Instant::now();
		let deadline = now.checked_add(timeout).unwrap_or(now);

		loop {
			trace!("waiting for {} senders to finish", senders.len());
			tokio::select! {
				() = sleep_until(deadline) => {
					senders.abort_all();
					return;
				},
				joined = senders.join_next() => match joined {
					| None => return,
					| Some(_) => continue,
				},
			}
		}
	}

	/// One destination's sender: hydrate device queues on first contact,
	/// then drain the transaction FIFO. At most one of these runs per
	/// destination at any instant.
	async fn run_destination(self: Arc<Self>, destination: OwnedServerName, hydrate: bool) {
		if hydrate {
			self.hydrate_destination(&destination)
				.await
				.log_err()
				.ok();
			self.queues.mark_hydrated(&destination);
		}

		self.drain_destination(&destination).await;

		if self.queues.mark_idle(&destination) && self.server.running() {
			self.kick(&destination).log_err().ok();
		}
	}

	async fn drain_destination(&self, destination: &ServerName) {
		'transactions: loop {
			let Ok(first_permit) = self.semaphore.clone().acquire_owned().await else {
				break;
			};

			let Some(txn) = self.queues.pop(destination) else {
				break;
			};

			let mut permit = Some(first_permit);
			loop {
				let held = match permit.take() {
					| Some(held) => held,
					| None => match self.semaphore.clone().acquire_owned().await {
						| Ok(held) => held,
						| Err(_) => break 'transactions,
					},
				};

				if self.server.is_stopping() {
					debug!(
						transaction_id = %txn.transaction_id,
						destination = %destination,
						"dropping pending transaction on shutdown"
					);
					break 'transactions;
				}

				self.server.metrics.start_send();
				let started = std::time::Instant::now();
				let result = self.transport.send_transaction(&txn).await;
				self.server.metrics.finish_send();
				drop(held);

				match result {
					| Ok(()) => {
						self.backoff.clear(destination);
						self.server.metrics.record_success(
							started.elapsed(),
							txn.pdus.len(),
							txn.edus.len(),
						);
						debug!(
							transaction_id = %txn.transaction_id,
							destination = %destination,
							pdus = txn.pdus.len(),
							edus = txn.edus.len(),
							"transaction sent"
						);
						self.device_cleanup(&txn).await.log_err().ok();
						continue 'transactions;
					},

					| Err(e) => match classify(&e) {
						| Disposition::Terminal => {
							warn!(
								transaction_id = %txn.transaction_id,
								destination = %destination,
								"dropping transaction: {e}"
							);
							self.server.metrics.record_failure();
							self.backoff.clear(destination);
							continue 'transactions;
						},

						| Disposition::Transient => {
							self.server.metrics.record_retry();
							let until = self.backoff.failure(destination);
							let delay =
								until.saturating_duration_since(std::time::Instant::now());
							debug_warn!(
								transaction_id = %txn.transaction_id,
								destination = %destination,
								"transient send failure: {e}; retrying in {delay:?}"
							);

							// slot released above; a sleeping destination
							// must not hold concurrency from the others
							tokio::select! {
								() = sleep(delay) => {},
								() = self.server.until_shutdown() => break 'transactions,
							}
						},
					},
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::{
		collections::{HashMap, HashSet},
		sync::{Arc, Mutex},
		time::Duration,
	};

	use async_trait::async_trait;
	use fedsender_core::{Result, Transaction, err};
	use fedsender_database::Memory;
	use http::StatusCode;
	use ruma::{OwnedServerName, ServerName, server_name};
	use serde_json::json;
	use tokio::time::sleep;

	use crate::{Service as _, federation::Transport, sending, test_utils};

	#[derive(Default)]
	struct FakeState {
		in_flight: HashSet<OwnedServerName>,
		sent: Vec<(OwnedServerName, u64, usize)>,
		attempts: HashMap<OwnedServerName, u32>,
		overlap: bool,
		outbox_snapshots: Vec<Vec<i64>>,
	}

	struct FakeTransport {
		delay: Duration,
		/// destinations answering 503 forever
		failing: HashSet<OwnedServerName>,
		/// destinations answering 500 on their first attempt only
		flaky: HashSet<OwnedServerName>,
		watch_outbox: Option<(Arc<Memory>, OwnedServerName)>,
		state: Mutex<FakeState>,
	}

	impl FakeTransport {
		fn new(delay: Duration) -> Self {
			Self {
				delay,
				failing: HashSet::new(),
				flaky: HashSet::new(),
				watch_outbox: None,
				state: Mutex::new(FakeState::default()),
			}
		}

		fn sent_to(&self, destination: &ServerName) -> Vec<u64> {
			self.state
				.lock()
				.unwrap()
				.sent
				.iter()
				.filter(|(dest, ..)| dest == destination)
				.map(|(_, id, _)| *id)
				.collect()
		}

		fn pdus_sent_to(&self, destination: &ServerName) -> usize {
			self.state
				.lock()
				.unwrap()
				.sent
				.iter()
				.filter(|(dest, ..)| dest == destination)
				.map(|(.., pdus)| *pdus)
				.sum()
		}
	}

	#[async_trait]
	impl Transport for FakeTransport {
		async fn send_transaction(&self, txn: &Transaction) -> Result {
			let attempt = {
				let mut state = self.state.lock().unwrap();
				if !state.in_flight.insert(txn.destination.clone()) {
					state.overlap = true;
				}

				if let Some((db, dest)) = &self.watch_outbox {
					if txn.destination == *dest {
						state.outbox_snapshots.push(db.outbox_ids(dest));
					}
				}

				let attempt = state
					.attempts
					.entry(txn.destination.clone())
					.or_default();
				*attempt += 1;
				*attempt
			};

			sleep(self.delay).await;

			let mut state = self.state.lock().unwrap();
			state.in_flight.remove(&txn.destination);

			if self.failing.contains(&txn.destination) {
				return Err(err!(Request(StatusCode::SERVICE_UNAVAILABLE, "down")));
			}

			if self.flaky.contains(&txn.destination) && attempt == 1 {
				return Err(err!(Request(StatusCode::INTERNAL_SERVER_ERROR, "hiccup")));
			}

			state.sent.push((
				txn.destination.clone(),
				txn.transaction_id.parse().unwrap(),
				txn.pdus.len(),
			));

			Ok(())
		}
	}

	fn pdu(n: u64) -> fedsender_core::PduEvent {
		fedsender_core::PduEvent::from_stored(
			3,
			json!({
				"room_id": "!room:origin.example",
				"sender": "@alice:origin.example",
				"origin": "origin.example",
				"origin_server_ts": n,
				"type": "m.room.message",
				"content": {"n": n},
				"depth": n,
			}),
		)
		.unwrap()
	}

	fn build(
		toml: &str,
		transport: Arc<FakeTransport>,
		db: Arc<Memory>,
	) -> Arc<sending::Service> {
		let server = test_utils::server(toml);
		let replication = crate::replication::Service::build(&server).unwrap();
		let db: Arc<dyn fedsender_database::Storage> = db;
		let transport: Arc<dyn Transport> = transport;
		sending::Service::build(&server, &db, &transport, &replication).unwrap()
	}

	async fn settle() {
		// virtual time; real work interleaves at await points
		for _ in 0..500 {
			sleep(Duration::from_millis(10)).await;
		}
	}

	#[tokio::test(start_paused = true)]
	async fn per_destination_sends_are_serialized_and_ordered() {
		let transport = Arc::new(FakeTransport::new(Duration::from_millis(200)));
		let db = Arc::new(Memory::new());
		let service = build(
			r#"server_name = "origin.example""#,
			transport.clone(),
			db,
		);

		let worker = tokio::spawn(service.clone().worker());

		let dest = server_name!("busy.example");
		for n in 0..150 {
			service.send_pdu(dest, pdu(n)).unwrap();
		}

		settle().await;

		let sent = transport.sent_to(dest);
		assert_eq!(transport.pdus_sent_to(dest), 150, "every queued PDU delivered");
		assert!(sent.len() >= 3, "150 PDUs need at least three transactions");
		assert!(sent.windows(2).all(|w| w[0] < w[1]), "ids strictly increasing");
		assert!(!transport.state.lock().unwrap().overlap, "one in-flight per destination");

		service.server.shutdown().unwrap();
		worker.await.unwrap().unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn backing_off_destination_releases_its_concurrency_slot() {
		let mut transport = FakeTransport::new(Duration::from_millis(50));
		transport
			.failing
			.insert(server_name!("down.example").to_owned());
		let transport = Arc::new(transport);
		let db = Arc::new(Memory::new());
		let service = build(
			r#"
				server_name = "origin.example"
				max_concurrency = 2
			"#,
			transport.clone(),
			db,
		);

		let worker = tokio::spawn(service.clone().worker());

		service.send_pdu(server_name!("down.example"), pdu(0)).unwrap();
		for n in 0..120 {
			service.send_pdu(server_name!("b.example"), pdu(n)).unwrap();
			service.send_pdu(server_name!("c.example"), pdu(n)).unwrap();
		}

		settle().await;

		// B and C fully drain even though A never stops failing
		let b = transport.pdus_sent_to(server_name!("b.example"));
		let c = transport.pdus_sent_to(server_name!("c.example"));
		assert_eq!((b, c), (120, 120), "healthy peers drained completely");
		assert!(transport.sent_to(server_name!("down.example")).is_empty());

		service.server.shutdown().unwrap();
		worker.await.unwrap().unwrap();
	}

	#[tokio::test(start_paused = true)]
	async fn device_outbox_cleanup_waits_for_success() {
		let db = Arc::new(Memory::new());
		let dest = server_name!("devices.example");
		db.push_outbox(dest, 7, json!({"message_id": "a"}));
		db.push_outbox(dest, 8, json!({"message_id": "b"}));
		db.push_outbox(dest, 9, json!({"message_id": "c"}));

		let mut transport = FakeTransport::new(Duration::from_millis(10));
		transport.flaky.insert(dest.to_owned());
		transport.watch_outbox = Some((db.clone(), dest.to_owned()));
		let transport = Arc::new(transport);

		let service = build(
			r#"server_name = "origin.example""#,
			transport.clone(),
			db.clone(),
		);

		let worker = tokio::spawn(service.clone().worker());

		// first contact: hydration pulls the outbox into the queue
		service.kick(dest).unwrap();
		settle().await;

		let snapshots = transport.state.lock().unwrap().outbox_snapshots.clone();
		assert_eq!(
			snapshots,
			vec![vec![7, 8, 9], vec![7, 8, 9]],
			"rows survive the 500 and are only deleted after the 200"
		);
		assert!(db.outbox_ids(dest).is_empty(), "rows deleted after success");
		assert_eq!(service.device_message_cursor(dest), 9);

		service.server.shutdown().unwrap();
		worker.await.unwrap().unwrap();
	}
}
