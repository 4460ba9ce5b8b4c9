//! # OTS wire protocol
//!
//! Typed messages exchanged over the broker between the server-side task
//! runner and the workers. Every message is a JSON object carrying a
//! `message_type` tag and a protocol `version` next to the fields of its kind.
//!
//! ```rust
//! use protocol::{pack, unpack, Message, TaskCondition};
//!
//! let message = Message::state_change("task-1", TaskCondition::Started);
//! let bytes = pack(&message).expect("encodable");
//! assert_eq!(unpack(&bytes).expect("decodable"), message);
//! ```
//!
//! Delivery is not the concern of this crate: messages are opaque payloads to
//! the broker, see the `transport` crate.

mod codec;
mod error;
mod message;
mod version;

pub use codec::*;
pub use error::*;
pub use message::*;
pub use version::*;
