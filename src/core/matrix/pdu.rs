use std::collections::BTreeMap;

use ruma::{EventId, OwnedEventId, OwnedRoomId, OwnedServerName, OwnedUserId, RoomId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Result;

/// `server -> key_id -> base64 signature`
pub type Signatures = BTreeMap<OwnedServerName, BTreeMap<String, String>>;

/// A room event in one of the two federation wire shapes. V1 rooms carry an
/// explicit `event_id`; later room versions derive the id from the content
/// hash, so the field is absent on the wire. Serialization branches on the
/// variant, not on inheritance.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PduEvent {
	V1(PduV1),
	V2(PduV2),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PduV1 {
	pub event_id: OwnedEventId,
	pub room_id: OwnedRoomId,
	pub sender: OwnedUserId,
	pub origin: OwnedServerName,
	pub origin_server_ts: u64,
	#[serde(rename = "type")]
	pub kind: String,
	pub content: JsonValue,
	pub depth: u64,
	#[serde(default)]
	pub auth_events: Vec<JsonValue>,
	#[serde(default)]
	pub prev_events: Vec<JsonValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prev_state: Option<JsonValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub state_key: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redacts: Option<OwnedEventId>,
	#[serde(default)]
	pub hashes: BTreeMap<String, String>,
	#[serde(default)]
	pub signatures: Signatures,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unsigned: Option<JsonValue>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PduV2 {
	pub room_id: OwnedRoomId,
	pub sender: OwnedUserId,
	pub origin: OwnedServerName,
	pub origin_server_ts: u64,
	#[serde(rename = "type")]
	pub kind: String,
	pub content: JsonValue,
	pub depth: u64,
	#[serde(default)]
	pub auth_events: Vec<JsonValue>,
	#[serde(default)]
	pub prev_events: Vec<JsonValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub prev_state: Option<JsonValue>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub state_key: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redacts: Option<OwnedEventId>,
	#[serde(default)]
	pub hashes: BTreeMap<String, String>,
	#[serde(default)]
	pub signatures: Signatures,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unsigned: Option<JsonValue>,
}

impl PduEvent {
	/// Rehydrate an event from its stored wire JSON. `format_version` is the
	/// event-format version recorded alongside the row; version 1 events are
	/// the only ones carrying their own id.
	pub fn from_stored(format_version: i64, json: JsonValue) -> Result<Self> {
		if format_version == 1 {
			Ok(Self::V1(serde_json::from_value(json)?))
		} else {
			Ok(Self::V2(serde_json::from_value(json)?))
		}
	}

	#[inline]
	#[must_use]
	pub fn room_id(&self) -> &RoomId {
		match self {
			| Self::V1(pdu) => &pdu.room_id,
			| Self::V2(pdu) => &pdu.room_id,
		}
	}

	#[inline]
	#[must_use]
	pub fn sender(&self) -> &UserId {
		match self {
			| Self::V1(pdu) => &pdu.sender,
			| Self::V2(pdu) => &pdu.sender,
		}
	}

	/// Only V1 events carry an id on the wire.
	#[inline]
	#[must_use]
	pub fn event_id(&self) -> Option<&EventId> {
		match self {
			| Self::V1(pdu) => Some(&pdu.event_id),
			| Self::V2(_) => None,
		}
	}
}
