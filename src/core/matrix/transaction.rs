use ruma::{CanonicalJsonObject, OwnedServerName, canonical_json::try_from_json_map};
use serde_json::json;

use super::{EduEvent, PduEvent};
use crate::{Result, utils};

pub const PDU_LIMIT: usize = 50;
pub const EDU_LIMIT: usize = 100;

/// The unit of federation delivery: up to [`PDU_LIMIT`] PDUs and
/// [`EDU_LIMIT`] EDUs signed and sent as one HTTP request.
///
/// `transaction_id` is unique per (origin, destination) for the lifetime of
/// the process and monotonically increasing, so peers deduplicate retries
/// by id.
#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
	pub transaction_id: String,
	pub origin: OwnedServerName,
	pub origin_server_ts: u64,
	pub destination: OwnedServerName,
	pub pdus: Vec<PduEvent>,
	pub edus: Vec<EduEvent>,
}

impl Transaction {
	#[must_use]
	pub fn new(id: u64, origin: OwnedServerName, destination: OwnedServerName) -> Self {
		Self {
			transaction_id: id.to_string(),
			origin,
			origin_server_ts: utils::millis_since_unix_epoch(),
			destination,
			pdus: Vec::new(),
			edus: Vec::new(),
		}
	}

	/// Whether further items may be appended. A transaction at either cap
	/// accepts nothing more; the caller opens a fresh one.
	#[inline]
	#[must_use]
	pub fn has_room(&self) -> bool {
		self.pdus.len() < PDU_LIMIT && self.edus.len() < EDU_LIMIT
	}

	#[inline]
	#[must_use]
	pub fn is_empty(&self) -> bool { self.pdus.is_empty() && self.edus.is_empty() }

	pub fn push_pdu(&mut self, pdu: PduEvent) {
		debug_assert!(self.pdus.len() < PDU_LIMIT, "transaction pdus over limit");
		self.pdus.push(pdu);
	}

	/// Append an EDU, replacing any pending EDU carrying the same
	/// `internal_key` in place.
	pub fn push_edu(&mut self, edu: EduEvent) {
		if let Some(key) = edu.internal_key.as_deref() {
			if let Some(pending) = self
				.edus
				.iter_mut()
				.find(|e| e.internal_key.as_deref() == Some(key))
			{
				*pending = edu;
				return;
			}
		}

		debug_assert!(self.edus.len() < EDU_LIMIT, "transaction edus over limit");
		self.edus.push(edu);
	}

	/// The `PUT /_matrix/federation/v1/send/{txn_id}` body as canonical
	/// JSON, ready for signing.
	pub fn body(&self) -> Result<CanonicalJsonObject> {
		let body = json!({
			"origin": self.origin,
			"origin_server_ts": self.origin_server_ts,
			"pdus": self.pdus,
			"edus": self.edus.iter().map(EduEvent::to_wire).collect::<Vec<_>>(),
		});

		match body {
			| serde_json::Value::Object(map) => Ok(try_from_json_map(map)?),
			| _ => unreachable!("transaction body serializes to an object"),
		}
	}
}
