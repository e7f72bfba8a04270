pub mod edu;
pub mod pdu;
pub mod presence;
pub mod transaction;

pub use edu::{DeviceListUpdateContent, EduEvent, PresenceContent, PresenceUpdate};
pub use pdu::{PduEvent, PduV1, PduV2};
pub use presence::Presence;
pub use transaction::{EDU_LIMIT, PDU_LIMIT, Transaction};
