use fedsender_core::{
	EduEvent, Result, Transaction, error,
	matrix::edu::{self, DeviceListUpdateContent},
	trace,
};
use ruma::{OwnedServerName, ServerName};
use serde::Deserialize;

use super::Service;
use crate::replication::StreamUpdate;

/// Upper bound on device items pulled into the queue per fetch.
const DEVICE_DEQUEUE_LIMIT: usize = 100;

/// A `device_messages` stream row: something is pending for `destination`.
#[derive(Debug, Deserialize)]
pub(super) struct DeviceStreamRow {
	pub(super) destination: OwnedServerName,
}

/// In-memory high-water marks bounding the device queries per destination.
#[derive(Debug, Default)]
pub(super) struct DeviceCursors {
	pub(super) messages: i64,
	pub(super) pokes: i64,
}

impl Service {
	/// The device pump: stream rows name destinations with fresh outbox
	/// content or device-list pokes.
	pub(super) async fn pump_devices(&self, update: StreamUpdate<DeviceStreamRow>) -> Result {
		for row in update.rows {
			self.fetch_device_edus(&row.destination).await?;
			self.kick(&row.destination)?;
		}

		Ok(())
	}

	/// First-contact hydration: the first time a destination is observed
	/// in this process, everything already pending for it in storage is
	/// pulled into the queue.
	pub(super) async fn hydrate_destination(&self, destination: &ServerName) -> Result {
		self.fetch_device_edus(destination).await
	}

	async fn fetch_device_edus(&self, destination: &ServerName) -> Result {
		let (message_since, poke_since) = {
			let cursors = self.device_cursors.lock().expect("locked");
			cursors
				.get(destination)
				.map_or((0, 0), |c| (c.messages, c.pokes))
		};

		let outbox = self
			.db
			.device_outbox(destination, message_since, DEVICE_DEQUEUE_LIMIT)
			.await?;

		let poke_budget = DEVICE_DEQUEUE_LIMIT.saturating_sub(outbox.len());
		let pokes = if poke_budget > 0 {
			self.db
				.device_list_pokes(destination, poke_since, poke_budget)
				.await?
		} else {
			Vec::new()
		};

		if outbox.is_empty() && pokes.is_empty() {
			return Ok(());
		}

		trace!(
			%destination,
			messages = outbox.len(),
			pokes = pokes.len(),
			"queueing device EDUs"
		);

		{
			let mut cursors = self.device_cursors.lock().expect("locked");
			let entry = cursors.entry(destination.to_owned()).or_default();
			if let Some(last) = outbox.last() {
				entry.messages = entry.messages.max(last.stream_id);
			}
			if let Some(last) = pokes.last() {
				entry.pokes = entry.pokes.max(last.stream_id);
			}
		}

		for row in outbox {
			self.queues.push_edu(EduEvent {
				destination: destination.to_owned(),
				origin: self.server.name.clone(),
				edu_type: edu::DIRECT_TO_DEVICE.to_owned(),
				content: row.messages,
				internal_key: None,
				stream_id: Some(row.stream_id),
			});
		}

		for poke in pokes {
			// an empty prev_id list makes the remote resync, so
			// placeholder device data is sufficient
			let content = DeviceListUpdateContent {
				user_id: poke.user_id,
				device_id: "placeholder".to_owned(),
				stream_id: poke.stream_id,
				prev_id: Vec::new(),
			};

			self.queues.push_edu(EduEvent {
				destination: destination.to_owned(),
				origin: self.server.name.clone(),
				edu_type: edu::DEVICE_LIST_UPDATE.to_owned(),
				content: serde_json::to_value(content)?,
				internal_key: None,
				stream_id: Some(poke.stream_id),
			});
		}

		Ok(())
	}

	/// Post-success cleanup: outbox rows are deleted and pokes marked sent
	/// only once the transaction carrying them was acknowledged.
	pub(super) async fn device_cleanup(&self, txn: &Transaction) -> Result {
		let mut outbox_ids = Vec::new();
		let mut poke_keys = Vec::new();

		for edu in &txn.edus {
			let Some(stream_id) = edu.stream_id else {
				continue;
			};

			match edu.edu_type.as_str() {
				| edu::DIRECT_TO_DEVICE => outbox_ids.push(stream_id),
				| edu::DEVICE_LIST_UPDATE => {
					match serde_json::from_value::<DeviceListUpdateContent>(
						edu.content.clone(),
					) {
						| Ok(content) => poke_keys.push((stream_id, content.user_id)),
						| Err(e) => error!(
							destination = %txn.destination,
							"device list EDU with undecodable content: {e}"
						),
					}
				},
				| _ => {},
			}
		}

		if !outbox_ids.is_empty() {
			self.db
				.delete_device_outbox(&txn.destination, &outbox_ids)
				.await?;

			let mut cursors = self.device_cursors.lock().expect("locked");
			let entry = cursors.entry(txn.destination.clone()).or_default();
			let max = outbox_ids.iter().copied().max().expect("non-empty");
			entry.messages = entry.messages.max(max);
		}

		if !poke_keys.is_empty() {
			self.db
				.mark_pokes_sent(&txn.destination, &poke_keys)
				.await?;

			let mut cursors = self.device_cursors.lock().expect("locked");
			let entry = cursors.entry(txn.destination.clone()).or_default();
			let max = poke_keys
				.iter()
				.map(|(id, _)| *id)
				.max()
				.expect("non-empty");
			entry.pokes = entry.pokes.max(max);
		}

		Ok(())
	}

	#[cfg(test)]
	pub(super) fn device_message_cursor(&self, destination: &ServerName) -> i64 {
		self.device_cursors
			.lock()
			.expect("locked")
			.get(destination)
			.map_or(0, |c| c.messages)
	}
}
