use std::collections::HashMap;

use fedsender_core::{EduEvent, Presence, Result, matrix::edu, trace, utils};
use ruma::OwnedUserId;

use super::Service;
use crate::replication::StreamUpdate;

impl Service {
	/// The presence pump: coalesce a replicated batch by user (later state
	/// wins), then fan each local user's state out to every remote sharing
	/// a room with them. The coalescing map lives per flush.
	pub(super) async fn pump_presence(&self, update: StreamUpdate<Presence>) -> Result {
		let mut user_presence: HashMap<OwnedUserId, Presence> = HashMap::new();
		for row in update.rows {
			if !self
				.server
				.is_ours(row.user_id.server_name().as_str())
			{
				continue;
			}

			user_presence.insert(row.user_id.clone(), row);
		}

		if user_presence.is_empty() {
			return Ok(());
		}

		let now = utils::millis_since_unix_epoch();
		for (user_id, presence) in user_presence {
			let hosts = self.db.interested_hosts(&user_id).await?;
			let content = serde_json::to_value(presence.to_content(now))?;
			trace!(%user_id, hosts = hosts.len(), "routing presence");

			for host in hosts {
				if self.server.is_ours(host.as_str()) {
					continue;
				}

				self.queues.push_edu(EduEvent {
					destination: host.clone(),
					origin: self.server.name.clone(),
					edu_type: edu::PRESENCE.to_owned(),
					content: content.clone(),
					internal_key: Some(format!("m.presence:{user_id}")),
					stream_id: None,
				});
				self.kick(&host)?;
			}
		}

		Ok(())
	}
}
