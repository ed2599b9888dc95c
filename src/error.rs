use crate::protocol::MessageKind;
use crate::protocol::codec::WireError;
use crate::types::SimulatedAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0} is already bound to a neighbour slot")]
    DuplicateNeighbor(String),
    #[error("no free neighbour slot")]
    NoFreeSlot,
    #[error("no neighbour found for {0}")]
    NoSuchNeighbor(String),
    #[error("{0} is not in TWO_WAY state")]
    NotTwoWay(SimulatedAddr),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),
    #[error("timed out while {0}")]
    Timeout(&'static str),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("expected {expected:?}, received {received:?}")]
    UnexpectedMessage { expected: MessageKind, received: MessageKind },
    #[error("exchange cancelled by shutdown")]
    Cancelled,
}

impl RouterError {
    /// True for failures raised before any network or state effect.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            RouterError::InvalidInput(_)
                | RouterError::DuplicateNeighbor(_)
                | RouterError::NoFreeSlot
                | RouterError::NoSuchNeighbor(_)
                | RouterError::NotTwoWay(_)
        )
    }
}

pub type Result<T, E = RouterError> = std::result::Result<T, E>;
