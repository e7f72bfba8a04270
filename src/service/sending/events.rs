use fedsender_core::{PduEvent, Result, debug, err, error, matrix::transaction::PDU_LIMIT};
use fedsender_database::{EVENTS_POSITION, EventRow};
use serde_json::Value as JsonValue;

use super::Service;
use crate::replication::StreamUpdate;

impl Service {
	/// The event pump: a new `events` stream position means rows landed in
	/// storage between our durable cursor and `top`. Only the position is
	/// trusted; the rows themselves are read back from storage.
	pub(super) async fn pump_events(&self, update: StreamUpdate<JsonValue>) -> Result {
		let top: i64 = update
			.position
			.parse()
			.map_err(|e| err!(Replication("bad events position {:?}: {e}", update.position)))?;

		self.advance_events(top).await
	}

	/// Walk the durable cursor up to `top` in batches of [`PDU_LIMIT`]. A
	/// full batch means we are still behind; the batch is committed at its
	/// own high-water mark and the walk continues. The cursor is committed
	/// only after the whole batch is enqueued, and never skips an
	/// unattempted event.
	async fn advance_events(&self, top: i64) -> Result {
		loop {
			let last = self.db.stream_position(EVENTS_POSITION).await?;
			if top <= last {
				return Ok(());
			}

			let rows = self.db.events_between(last, top, PDU_LIMIT).await?;
			let behind = rows.len() == PDU_LIMIT;
			let commit = if behind {
				rows.last()
					.expect("a full batch has a last row")
					.stream_ordering
			} else {
				top
			};

			for row in &rows {
				self.route_event(row).await?;
			}

			self.db
				.set_stream_position(EVENTS_POSITION, commit)
				.await?;
			debug!(cursor = commit, "events cursor advanced");

			if !behind {
				return Ok(());
			}
		}
	}

	/// Fan one stored event out to the joined remote hosts of its room.
	/// Only locally-authored events originate here; undecodable rows are
	/// logged and skipped, storage errors abort the batch before the
	/// cursor moves.
	async fn route_event(&self, row: &EventRow) -> Result {
		let pdu = match PduEvent::from_stored(row.format_version, row.json.clone()) {
			| Ok(pdu) => pdu,
			| Err(e) => {
				error!(
					stream_ordering = row.stream_ordering,
					"skipping undecodable event row: {e}"
				);
				return Ok(());
			},
		};

		if !self
			.server
			.is_ours(pdu.sender().server_name().as_str())
		{
			return Ok(());
		}

		let hosts = self.db.room_hosts(pdu.room_id()).await?;
		for host in hosts {
			if self.server.is_ours(host.as_str()) {
				continue;
			}

			self.queues.push_pdu(&host, pdu.clone());
			self.kick(&host)?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use async_trait::async_trait;
	use fedsender_core::Result;
	use fedsender_database::{
		EVENTS_POSITION, EventRow, Memory, OutboxRow, PokeRow, Storage,
	};
	use ruma::{
		OwnedServerName, OwnedUserId, RoomId, ServerName, UserId, room_id, server_name,
		user_id,
	};
	use serde_json::json;

	use crate::{
		replication::{self, StreamUpdate},
		sending,
		test_utils::{self, NullTransport},
	};

	/// Delegates to [`Memory`], recording every cursor commit.
	#[derive(Debug)]
	struct RecordingStorage {
		inner: Arc<Memory>,
		commits: Mutex<Vec<i64>>,
	}

	#[async_trait]
	impl Storage for RecordingStorage {
		async fn stream_position(&self, kind: &str) -> Result<i64> {
			self.inner.stream_position(kind).await
		}

		async fn set_stream_position(&self, kind: &str, stream_id: i64) -> Result {
			self.commits.lock().unwrap().push(stream_id);
			self.inner.set_stream_position(kind, stream_id).await
		}

		async fn events_between(
			&self,
			after: i64,
			upto: i64,
			limit: usize,
		) -> Result<Vec<EventRow>> {
			self.inner.events_between(after, upto, limit).await
		}

		async fn room_hosts(&self, room_id: &RoomId) -> Result<Vec<OwnedServerName>> {
			self.inner.room_hosts(room_id).await
		}

		async fn interested_hosts(&self, user_id: &UserId) -> Result<Vec<OwnedServerName>> {
			self.inner.interested_hosts(user_id).await
		}

		async fn device_outbox(
			&self,
			destination: &ServerName,
			after: i64,
			limit: usize,
		) -> Result<Vec<OutboxRow>> {
			self.inner
				.device_outbox(destination, after, limit)
				.await
		}

		async fn delete_device_outbox(
			&self,
			destination: &ServerName,
			stream_ids: &[i64],
		) -> Result {
			self.inner
				.delete_device_outbox(destination, stream_ids)
				.await
		}

		async fn device_list_pokes(
			&self,
			destination: &ServerName,
			after: i64,
			limit: usize,
		) -> Result<Vec<PokeRow>> {
			self.inner
				.device_list_pokes(destination, after, limit)
				.await
		}

		async fn mark_pokes_sent(
			&self,
			destination: &ServerName,
			keys: &[(i64, OwnedUserId)],
		) -> Result {
			self.inner.mark_pokes_sent(destination, keys).await
		}
	}

	fn event_json(sender: &UserId, n: i64) -> serde_json::Value {
		json!({
			"room_id": "!room:origin.example",
			"sender": sender.as_str(),
			"origin": sender.server_name().as_str(),
			"origin_server_ts": n,
			"type": "m.room.message",
			"content": {"n": n},
			"depth": n,
		})
	}

	async fn build(
		storage: Arc<RecordingStorage>,
	) -> (Arc<sending::Service>, Arc<RecordingStorage>) {
		let server = test_utils::server(r#"server_name = "origin.example""#);
		let replication = replication::Service::build(&server).unwrap();
		let db: Arc<dyn Storage> = storage.clone();
		let transport: Arc<dyn crate::federation::Transport> = Arc::new(NullTransport);
		let service = sending::Service::build(&server, &db, &transport, &replication).unwrap();

		(service, storage)
	}

	#[tokio::test]
	async fn cursor_walks_ranges_in_pdu_limit_batches() {
		let memory = Arc::new(Memory::new());
		memory
			.set_stream_position(EVENTS_POSITION, 100)
			.await
			.unwrap();
		memory.set_membership(
			room_id!("!room:origin.example"),
			user_id!("@alice:origin.example"),
			"join",
		);
		memory.set_membership(
			room_id!("!room:origin.example"),
			user_id!("@bob:remote.example"),
			"join",
		);
		for n in 101..=160 {
			memory.insert_event(n, 3, event_json(user_id!("@alice:origin.example"), n));
		}

		let storage = Arc::new(RecordingStorage {
			inner: memory.clone(),
			commits: Mutex::new(Vec::new()),
		});
		let (service, storage) = build(storage).await;

		service
			.pump_events(StreamUpdate { position: "160".to_owned(), rows: Vec::new() })
			.await
			.unwrap();

		// two iterations: a full batch of 50 then the remaining 10
		assert_eq!(*storage.commits.lock().unwrap(), vec![150, 160]);
		assert_eq!(memory.stream_position(EVENTS_POSITION).await.unwrap(), 160);

		// all sixty events queued toward the one remote host
		let pending = service.pending_for(server_name!("remote.example"));
		let queued: usize = pending.iter().map(|txn| txn.pdus.len()).sum();
		assert_eq!(queued, 60);
		assert!(pending.len() >= 2, "batches split at the PDU cap");

		// the local host never receives its own events back
		assert!(service
			.pending_for(server_name!("origin.example"))
			.is_empty());
	}

	#[tokio::test]
	async fn remote_authored_events_are_not_originated() {
		let memory = Arc::new(Memory::new());
		memory.set_membership(
			room_id!("!room:origin.example"),
			user_id!("@bob:remote.example"),
			"join",
		);
		memory.insert_event(1, 3, event_json(user_id!("@bob:remote.example"), 1));

		let storage = Arc::new(RecordingStorage {
			inner: memory.clone(),
			commits: Mutex::new(Vec::new()),
		});
		let (service, _storage) = build(storage).await;

		service
			.pump_events(StreamUpdate { position: "1".to_owned(), rows: Vec::new() })
			.await
			.unwrap();

		assert!(service
			.pending_for(server_name!("remote.example"))
			.is_empty());
		assert_eq!(memory.stream_position(EVENTS_POSITION).await.unwrap(), 1);
	}

	#[tokio::test]
	async fn stale_position_is_a_no_op() {
		let memory = Arc::new(Memory::new());
		memory
			.set_stream_position(EVENTS_POSITION, 50)
			.await
			.unwrap();

		let storage = Arc::new(RecordingStorage {
			inner: memory.clone(),
			commits: Mutex::new(Vec::new()),
		});
		let (service, storage) = build(storage).await;

		service
			.pump_events(StreamUpdate { position: "40".to_owned(), rows: Vec::new() })
			.await
			.unwrap();

		assert!(storage.commits.lock().unwrap().is_empty(), "cursor never decreases");
	}
}
