use ruma::{OwnedUserId, presence::PresenceState};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use super::edu::{PresenceContent, PresenceUpdate};

/// A presence snapshot as mirrored off the replication stream.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Presence {
	pub user_id: OwnedUserId,
	pub state: PresenceState,
	#[serde(default)]
	pub last_active_ts: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status_msg: Option<String>,
	#[serde(default)]
	pub currently_active: bool,
}

impl Presence {
	/// Format into the federation EDU content. `last_active_ago` is derived
	/// from `now` and only present for users with a recorded activity
	/// timestamp; `status_msg` is withheld for offline users and
	/// `currently_active` only accompanies online state.
	#[must_use]
	pub fn to_content(&self, now: u64) -> PresenceContent {
		let last_active_ago =
			(self.last_active_ts != 0).then(|| now.saturating_sub(self.last_active_ts));

		let status_msg = self
			.status_msg
			.clone()
			.filter(|_| self.state != PresenceState::Offline);

		let currently_active =
			(self.state == PresenceState::Online).then_some(self.currently_active);

		PresenceContent {
			push: smallvec![PresenceUpdate {
				user_id: self.user_id.clone(),
				presence: self.state.clone(),
				last_active_ago,
				status_msg,
				currently_active,
			}],
		}
	}
}
