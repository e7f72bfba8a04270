//! Storage contracts of the upstream homeserver, narrowed to what the
//! federation sender consumes. The relational backend itself is an external
//! collaborator; this crate ships the seam and an in-memory engine used by
//! tests and the `memory:` connection string.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use fedsender_core::{Config, Result, err};
use ruma::{OwnedServerName, OwnedUserId, RoomId, ServerName, UserId};
use serde_json::Value as JsonValue;

pub use self::memory::Memory;

/// Stream kind key of the durable `events` cursor.
pub const EVENTS_POSITION: &str = "events";

/// A stored room event eligible for federation, as returned by the
/// new-events range query.
#[derive(Clone, Debug)]
pub struct EventRow {
	/// Position of this event in the homeserver's event stream.
	pub stream_ordering: i64,
	/// Event-format version; 1 is the only shape carrying its own id.
	pub format_version: i64,
	/// The event's wire JSON as stored.
	pub json: JsonValue,
}

/// A pending device message bound for one destination.
#[derive(Clone, Debug)]
pub struct OutboxRow {
	pub destination: OwnedServerName,
	pub stream_id: i64,
	/// Content of the `m.direct_to_device` EDU as stored.
	pub messages: JsonValue,
}

/// A pending device-list update awaiting federation delivery.
#[derive(Clone, Debug)]
pub struct PokeRow {
	pub destination: OwnedServerName,
	pub stream_id: i64,
	pub user_id: OwnedUserId,
	pub sent: bool,
}

#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
	/// Durable cursor of the named replication stream.
	async fn stream_position(&self, kind: &str) -> Result<i64>;

	/// Advance the durable cursor. Never called with a smaller value than
	/// the one stored.
	async fn set_stream_position(&self, kind: &str, stream_id: i64) -> Result;

	/// Events in the half-open range `(after, upto]` ordered by stream id,
	/// at most `limit` rows.
	async fn events_between(&self, after: i64, upto: i64, limit: usize)
	-> Result<Vec<EventRow>>;

	/// Servers with at least one `join` membership in the room, self
	/// included.
	async fn room_hosts(&self, room_id: &RoomId) -> Result<Vec<OwnedServerName>>;

	/// Servers sharing at least one joined room with the user, self
	/// included.
	async fn interested_hosts(&self, user_id: &UserId) -> Result<Vec<OwnedServerName>>;

	/// Pending device messages for `destination` with stream id above
	/// `after`, ordered by stream id, at most `limit` rows.
	async fn device_outbox(
		&self,
		destination: &ServerName,
		after: i64,
		limit: usize,
	) -> Result<Vec<OutboxRow>>;

	/// Drop delivered outbox rows.
	async fn delete_device_outbox(&self, destination: &ServerName, stream_ids: &[i64])
	-> Result;

	/// Unsent device-list pokes for `destination` with stream id above
	/// `after`, ordered by stream id, at most `limit` rows.
	async fn device_list_pokes(
		&self,
		destination: &ServerName,
		after: i64,
		limit: usize,
	) -> Result<Vec<PokeRow>>;

	/// Flip `sent = true` on delivered pokes.
	async fn mark_pokes_sent(
		&self,
		destination: &ServerName,
		keys: &[(i64, OwnedUserId)],
	) -> Result;
}

/// Open the storage named by `connection_string`. Only the `memory:` engine
/// ships here; anything else is a startup error.
pub fn open(config: &Config) -> Result<Arc<dyn Storage>> {
	match config.connection_string.as_str() {
		| s if s.starts_with("memory:") => Ok(Arc::new(Memory::new())),
		| other => Err(err!(Config(
			"connection_string",
			"unsupported storage backend {other:?}; this worker ships the memory: engine only"
		))),
	}
}
