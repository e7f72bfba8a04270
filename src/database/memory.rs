use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	ops::Bound::{self, Excluded, Included},
	sync::RwLock,
};

use async_trait::async_trait;
use fedsender_core::Result;
use ruma::{OwnedRoomId, OwnedServerName, OwnedUserId, RoomId, ServerName, UserId};
use serde_json::Value as JsonValue;

use super::{EventRow, OutboxRow, PokeRow, Storage};

/// In-memory storage engine. Backs the test suite and the `memory:`
/// connection string; contents do not survive a restart.
#[derive(Debug, Default)]
pub struct Memory {
	inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
	positions: HashMap<String, i64>,
	events: BTreeMap<i64, (i64, JsonValue)>,
	memberships: HashMap<OwnedRoomId, HashMap<OwnedUserId, String>>,
	outbox: BTreeMap<(OwnedServerName, i64), JsonValue>,
	pokes: BTreeMap<(OwnedServerName, i64), (OwnedUserId, bool)>,
}

impl Memory {
	#[must_use]
	pub fn new() -> Self { Self::default() }

	pub fn insert_event(&self, stream_ordering: i64, format_version: i64, json: JsonValue) {
		self.inner
			.write()
			.expect("locked")
			.events
			.insert(stream_ordering, (format_version, json));
	}

	pub fn set_membership(&self, room_id: &RoomId, user_id: &UserId, membership: &str) {
		self.inner
			.write()
			.expect("locked")
			.memberships
			.entry(room_id.to_owned())
			.or_default()
			.insert(user_id.to_owned(), membership.to_owned());
	}

	pub fn push_outbox(&self, destination: &ServerName, stream_id: i64, messages: JsonValue) {
		self.inner
			.write()
			.expect("locked")
			.outbox
			.insert((destination.to_owned(), stream_id), messages);
	}

	pub fn push_poke(&self, destination: &ServerName, stream_id: i64, user_id: &UserId) {
		self.inner
			.write()
			.expect("locked")
			.pokes
			.insert((destination.to_owned(), stream_id), (user_id.to_owned(), false));
	}

	/// Stream ids still pending in the outbox for a destination.
	#[must_use]
	pub fn outbox_ids(&self, destination: &ServerName) -> Vec<i64> {
		self.inner
			.read()
			.expect("locked")
			.outbox
			.range(dest_range(destination))
			.map(|((_, stream_id), _)| *stream_id)
			.collect()
	}

	#[must_use]
	pub fn poke_sent(&self, destination: &ServerName, stream_id: i64) -> Option<bool> {
		self.inner
			.read()
			.expect("locked")
			.pokes
			.get(&(destination.to_owned(), stream_id))
			.map(|(_, sent)| *sent)
	}
}

fn dest_range(
	destination: &ServerName,
) -> (
	Bound<(OwnedServerName, i64)>,
	Bound<(OwnedServerName, i64)>,
) {
	(
		Included((destination.to_owned(), i64::MIN)),
		Included((destination.to_owned(), i64::MAX)),
	)
}

#[async_trait]
impl Storage for Memory {
	async fn stream_position(&self, kind: &str) -> Result<i64> {
		Ok(self
			.inner
			.read()
			.expect("locked")
			.positions
			.get(kind)
			.copied()
			.unwrap_or(0))
	}

	async fn set_stream_position(&self, kind: &str, stream_id: i64) -> Result {
		self.inner
			.write()
			.expect("locked")
			.positions
			.insert(kind.to_owned(), stream_id);

		Ok(())
	}

	async fn events_between(
		&self,
		after: i64,
		upto: i64,
		limit: usize,
	) -> Result<Vec<EventRow>> {
		Ok(self
			.inner
			.read()
			.expect("locked")
			.events
			.range((Excluded(after), Included(upto)))
			.take(limit)
			.map(|(stream_ordering, (format_version, json))| EventRow {
				stream_ordering: *stream_ordering,
				format_version: *format_version,
				json: json.clone(),
			})
			.collect())
	}

	async fn room_hosts(&self, room_id: &RoomId) -> Result<Vec<OwnedServerName>> {
		let inner = self.inner.read().expect("locked");
		let hosts: BTreeSet<_> = inner
			.memberships
			.get(room_id)
			.into_iter()
			.flatten()
			.filter(|(_, membership)| membership.as_str() == "join")
			.map(|(user_id, _)| user_id.server_name().to_owned())
			.collect();

		Ok(hosts.into_iter().collect())
	}

	async fn interested_hosts(&self, user_id: &UserId) -> Result<Vec<OwnedServerName>> {
		let inner = self.inner.read().expect("locked");
		let mut hosts = BTreeSet::new();
		for members in inner.memberships.values() {
			if members
				.get(user_id)
				.is_none_or(|membership| membership.as_str() != "join")
			{
				continue;
			}

			hosts.extend(
				members
					.iter()
					.filter(|(_, membership)| membership.as_str() == "join")
					.map(|(member, _)| member.server_name().to_owned()),
			);
		}

		Ok(hosts.into_iter().collect())
	}

	async fn device_outbox(
		&self,
		destination: &ServerName,
		after: i64,
		limit: usize,
	) -> Result<Vec<OutboxRow>> {
		Ok(self
			.inner
			.read()
			.expect("locked")
			.outbox
			.range((
				Excluded((destination.to_owned(), after)),
				Included((destination.to_owned(), i64::MAX)),
			))
			.take(limit)
			.map(|((destination, stream_id), messages)| OutboxRow {
				destination: destination.clone(),
				stream_id: *stream_id,
				messages: messages.clone(),
			})
			.collect())
	}

	async fn delete_device_outbox(
		&self,
		destination: &ServerName,
		stream_ids: &[i64],
	) -> Result {
		let mut inner = self.inner.write().expect("locked");
		for stream_id in stream_ids {
			inner
				.outbox
				.remove(&(destination.to_owned(), *stream_id));
		}

		Ok(())
	}

	async fn device_list_pokes(
		&self,
		destination: &ServerName,
		after: i64,
		limit: usize,
	) -> Result<Vec<PokeRow>> {
		Ok(self
			.inner
			.read()
			.expect("locked")
			.pokes
			.range((
				Excluded((destination.to_owned(), after)),
				Included((destination.to_owned(), i64::MAX)),
			))
			.filter(|(_, (_, sent))| !sent)
			.take(limit)
			.map(|((destination, stream_id), (user_id, sent))| PokeRow {
				destination: destination.clone(),
				stream_id: *stream_id,
				user_id: user_id.clone(),
				sent: *sent,
			})
			.collect())
	}

	async fn mark_pokes_sent(
		&self,
		destination: &ServerName,
		keys: &[(i64, OwnedUserId)],
	) -> Result {
		let mut inner = self.inner.write().expect("locked");
		for (stream_id, user_id) in keys {
			if let Some((poke_user, sent)) = inner
				.pokes
				.get_mut(&(destination.to_owned(), *stream_id))
			{
				if poke_user == user_id {
					*sent = true;
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use ruma::{room_id, server_name, user_id};
	use serde_json::json;

	use super::{Memory, Storage};

	#[tokio::test]
	async fn events_range_is_half_open_ordered_and_limited() {
		let db = Memory::new();
		for i in 1..=10 {
			db.insert_event(i, 3, json!({"i": i}));
		}

		let rows = db.events_between(3, 9, 4).await.unwrap();
		let ids: Vec<_> = rows.iter().map(|r| r.stream_ordering).collect();
		assert_eq!(ids, vec![4, 5, 6, 7]);
	}

	#[tokio::test]
	async fn room_hosts_are_joined_servers() {
		let db = Memory::new();
		let room = room_id!("!r:origin.example");
		db.set_membership(room, user_id!("@a:origin.example"), "join");
		db.set_membership(room, user_id!("@b:remote.example"), "join");
		db.set_membership(room, user_id!("@c:gone.example"), "leave");

		let hosts = db.room_hosts(room).await.unwrap();
		assert_eq!(hosts, vec![
			server_name!("origin.example").to_owned(),
			server_name!("remote.example").to_owned(),
		]);
	}

	#[tokio::test]
	async fn outbox_is_scoped_per_destination() {
		let db = Memory::new();
		let dest = server_name!("remote.example");
		db.push_outbox(dest, 7, json!({"m": 1}));
		db.push_outbox(dest, 9, json!({"m": 2}));
		db.push_outbox(server_name!("other.example"), 8, json!({"m": 3}));

		let rows = db.device_outbox(dest, 0, 100).await.unwrap();
		let ids: Vec<_> = rows.iter().map(|r| r.stream_id).collect();
		assert_eq!(ids, vec![7, 9]);

		db.delete_device_outbox(dest, &[7]).await.unwrap();
		assert_eq!(db.outbox_ids(dest), vec![9]);
		assert_eq!(db.outbox_ids(server_name!("other.example")), vec![8]);
	}

	#[tokio::test]
	async fn pokes_filter_sent_rows() {
		let db = Memory::new();
		let dest = server_name!("remote.example");
		let user = user_id!("@a:origin.example");
		db.push_poke(dest, 4, user);
		db.push_poke(dest, 5, user);

		db.mark_pokes_sent(dest, &[(4, user.to_owned())])
			.await
			.unwrap();

		let pending = db.device_list_pokes(dest, 0, 100).await.unwrap();
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].stream_id, 5);
		assert_eq!(db.poke_sent(dest, 4), Some(true));
	}
}
