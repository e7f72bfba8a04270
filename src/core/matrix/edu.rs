use ruma::{OwnedServerName, OwnedUserId, presence::PresenceState};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use smallvec::SmallVec;

pub const PRESENCE: &str = "m.presence";
pub const DIRECT_TO_DEVICE: &str = "m.direct_to_device";
pub const DEVICE_LIST_UPDATE: &str = "m.device_list_update";

/// An ephemeral data unit addressed to one destination, queued client-side.
///
/// `internal_key` deduplicates pending EDUs: re-queueing an EDU with the
/// same key on the same destination replaces the pending one. `stream_id`
/// ties device EDUs back to their outbox rows for cleanup after a
/// successful send.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct EduEvent {
	pub destination: OwnedServerName,
	pub origin: OwnedServerName,
	pub edu_type: String,
	pub content: JsonValue,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub internal_key: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stream_id: Option<i64>,
}

impl EduEvent {
	/// The federation wire shape; addressing and bookkeeping fields are
	/// client-side only.
	#[must_use]
	pub fn to_wire(&self) -> JsonValue {
		json!({
			"edu_type": self.edu_type,
			"content": self.content,
		})
	}
}

/// Content of an `m.presence` EDU. Always carries exactly one update here;
/// the array form is the wire contract.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PresenceContent {
	pub push: SmallVec<[PresenceUpdate; 1]>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PresenceUpdate {
	pub user_id: OwnedUserId,
	pub presence: PresenceState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_active_ago: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status_msg: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub currently_active: Option<bool>,
}

/// Content of an `m.device_list_update` EDU built from an outbound poke.
/// An empty `prev_id` forces the remote to resync the device list, so
/// placeholder device data suffices.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DeviceListUpdateContent {
	pub user_id: OwnedUserId,
	pub device_id: String,
	pub stream_id: i64,
	#[serde(default)]
	pub prev_id: Vec<i64>,
}
