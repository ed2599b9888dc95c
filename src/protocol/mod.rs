pub mod codec;
pub mod listener;
mod message_handler;
pub mod messages;
pub mod neighbor;

pub use codec::{Codec, Connection, WireError};
pub use messages::{Message, MessageKind};
pub use neighbor::{NeighborTable, PORT_CAPACITY, Reservation};
