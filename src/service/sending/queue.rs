use std::{
	collections::{HashMap, VecDeque},
	sync::{
		Mutex,
		atomic::{AtomicU64, Ordering},
	},
};

use fedsender_core::{EduEvent, PduEvent, Transaction, utils};
use ruma::{OwnedServerName, ServerName};

/// Per-destination FIFOs of pending transactions plus the builder that
/// fills them.
///
/// New items coalesce into the destination's tail transaction while it has
/// room under both caps; otherwise a fresh transaction is appended.
/// Transaction ids start at the boot wall-clock second and increment per
/// allocation, unique and monotonic for the life of the process. Appends
/// come from the pump tasks, pops only from the destination's sender task;
/// the single map lock is the guard between them.
pub(super) struct Queues {
	origin: OwnedServerName,
	next_transaction_id: AtomicU64,
	map: Mutex<HashMap<OwnedServerName, DestinationQueue>>,
}

#[derive(Default)]
struct DestinationQueue {
	pending: VecDeque<Transaction>,
	running: bool,
	hydrated: bool,
}

pub(super) enum StartDecision {
	AlreadyRunning,
	Start { hydrate: bool },
}

impl Queues {
	pub(super) fn new(origin: OwnedServerName) -> Self {
		Self {
			origin,
			next_transaction_id: AtomicU64::new(utils::secs_since_unix_epoch()),
			map: Mutex::new(HashMap::new()),
		}
	}

	pub(super) fn push_pdu(&self, destination: &ServerName, pdu: PduEvent) {
		self.append(destination, |txn| txn.push_pdu(pdu));
	}

	pub(super) fn push_edu(&self, edu: EduEvent) {
		let destination = edu.destination.clone();
		self.append(&destination, |txn| txn.push_edu(edu));
	}

	fn append<F>(&self, destination: &ServerName, fill: F)
	where
		F: FnOnce(&mut Transaction),
	{
		let mut map = self.map.lock().expect("locked");
		let queue = map.entry(destination.to_owned()).or_default();

		if queue
			.pending
			.back()
			.is_none_or(|txn| !txn.has_room())
		{
			queue.pending.push_back(Transaction::new(
				self.next_transaction_id.fetch_add(1, Ordering::Relaxed),
				self.origin.clone(),
				destination.to_owned(),
			));
		}

		fill(queue
			.pending
			.back_mut()
			.expect("tail transaction exists"));
	}

	/// Pop the head transaction. Called only from within the destination's
	/// sender task.
	pub(super) fn pop(&self, destination: &ServerName) -> Option<Transaction> {
		self.map
			.lock()
			.expect("locked")
			.get_mut(destination)?
			.pending
			.pop_front()
	}

	/// The start-or-observe guard: at most one sender per destination.
	pub(super) fn try_start(&self, destination: &ServerName) -> StartDecision {
		let mut map = self.map.lock().expect("locked");
		let queue = map.entry(destination.to_owned()).or_default();
		if queue.running {
			return StartDecision::AlreadyRunning;
		}

		queue.running = true;
		StartDecision::Start { hydrate: !queue.hydrated }
	}

	pub(super) fn mark_hydrated(&self, destination: &ServerName) {
		if let Some(queue) = self
			.map
			.lock()
			.expect("locked")
			.get_mut(destination)
		{
			queue.hydrated = true;
		}
	}

	/// Sender exit. Returns true when new work raced in after the final
	/// pop; the caller must kick again so nothing is stranded.
	pub(super) fn mark_idle(&self, destination: &ServerName) -> bool {
		let mut map = self.map.lock().expect("locked");
		let Some(queue) = map.get_mut(destination) else {
			return false;
		};

		queue.running = false;
		!queue.pending.is_empty()
	}

	#[cfg(test)]
	pub(super) fn pending_snapshot(&self, destination: &ServerName) -> Vec<Transaction> {
		self.map
			.lock()
			.expect("locked")
			.get(destination)
			.map(|queue| queue.pending.iter().cloned().collect())
			.unwrap_or_default()
	}
}

#[cfg(test)]
mod tests {
	use fedsender_core::{EduEvent, PduEvent, matrix::transaction::PDU_LIMIT};
	use ruma::server_name;
	use serde_json::json;

	use super::Queues;

	fn queues() -> Queues { Queues::new(server_name!("origin.example").to_owned()) }

	fn pdu(n: u64) -> PduEvent {
		PduEvent::from_stored(
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
		.expect("valid test pdu")
	}

	fn typing_edu(key: &str) -> EduEvent {
		EduEvent {
			destination: server_name!("remote.example").to_owned(),
			origin: server_name!("origin.example").to_owned(),
			edu_type: "m.typing".to_owned(),
			content: json!({"key": key}),
			internal_key: Some(key.to_owned()),
			stream_id: None,
		}
	}

	#[test]
	fn sixty_pdus_split_fifty_ten_with_increasing_ids() {
		let queues = queues();
		let dest = server_name!("remote.example");
		for n in 0..60 {
			queues.push_pdu(dest, pdu(n));
		}

		let pending = queues.pending_snapshot(dest);
		assert_eq!(pending.len(), 2);
		assert_eq!(pending[0].pdus.len(), PDU_LIMIT);
		assert_eq!(pending[1].pdus.len(), 10);

		let first: u64 = pending[0].transaction_id.parse().unwrap();
		let second: u64 = pending[1].transaction_id.parse().unwrap();
		assert!(second > first, "transaction ids increase monotonically");
	}

	#[test]
	fn duplicate_internal_key_keeps_only_the_second() {
		let queues = queues();
		let dest = server_name!("remote.example");

		let mut first = typing_edu("m.typing:!r:@u");
		first.content = json!({"typing": true});
		queues.push_edu(first);

		let mut second = typing_edu("m.typing:!r:@u");
		second.content = json!({"typing": false});
		queues.push_edu(second);

		let pending = queues.pending_snapshot(dest);
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].edus.len(), 1);
		assert_eq!(pending[0].edus[0].content, json!({"typing": false}));
	}

	#[test]
	fn pdu_cap_closes_transaction_for_edus_too() {
		let queues = queues();
		let dest = server_name!("remote.example");
		for n in 0..PDU_LIMIT as u64 {
			queues.push_pdu(dest, pdu(n));
		}

		queues.push_edu(typing_edu("m.typing:!r:@u"));

		let pending = queues.pending_snapshot(dest);
		assert_eq!(pending.len(), 2, "full transaction accepts nothing more");
		assert!(pending[1].pdus.is_empty());
		assert_eq!(pending[1].edus.len(), 1);
	}

	#[test]
	fn pops_are_fifo_and_idle_notices_stragglers() {
		let queues = queues();
		let dest = server_name!("remote.example");
		for n in 0..60 {
			queues.push_pdu(dest, pdu(n));
		}

		let first = queues.pop(dest).unwrap();
		let second = queues.pop(dest).unwrap();
		assert!(
			second.transaction_id.parse::<u64>().unwrap()
				> first.transaction_id.parse::<u64>().unwrap()
		);
		assert!(queues.pop(dest).is_none());

		assert!(!queues.mark_idle(dest));
		queues.push_pdu(dest, pdu(99));
		assert!(queues.mark_idle(dest), "work raced in after the final pop");
	}
}
