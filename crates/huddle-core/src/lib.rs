pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::ProtocolError;
pub use ids::{ConnectionId, GroupId, UserId};
pub use protocol::{Envelope, InboundEvent, OutboundEvent};
