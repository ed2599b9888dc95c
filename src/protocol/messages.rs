use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Result, RouterError};
use crate::types::{Cost, Lsa, MAX_COST, RouterIdentity, SimulatedAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageKind {
    Hello,
    LsaUpdate,
    Acknowledge,
    Connect,
    Disconnect,
    Quit,
    UpdateWeight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown message kind {0}")]
pub struct UnknownMessageKind(pub u8);

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Hello => 0,
            MessageKind::LsaUpdate => 1,
            MessageKind::Acknowledge => 2,
            MessageKind::Connect => 3,
            MessageKind::Disconnect => 4,
            MessageKind::Quit => 5,
            MessageKind::UpdateWeight => 6,
        }
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = UnknownMessageKind;

    fn try_from(tag: u8) -> std::result::Result<Self, Self::Error> {
        Ok(match tag {
            0 => MessageKind::Hello,
            1 => MessageKind::LsaUpdate,
            2 => MessageKind::Acknowledge,
            3 => MessageKind::Connect,
            4 => MessageKind::Disconnect,
            5 => MessageKind::Quit,
            6 => MessageKind::UpdateWeight,
            other => return Err(UnknownMessageKind(other)),
        })
    }
}

/// One protocol message. Exactly one request or reply travels per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub source_process_address: String,
    pub source_process_port: u16,
    pub source_simulated_address: SimulatedAddr,
    pub destination_simulated_address: SimulatedAddr,
    pub router_id: SimulatedAddr,
    pub neighbor_id: SimulatedAddr,
    pub kind: MessageKind,
    /// Link cost for Hello, Connect and UpdateWeight; zero otherwise.
    pub weight: i16,
    /// Acknowledge only.
    #[serde(default)]
    pub port_available: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lsa_snapshot: Vec<Lsa>,
}

impl Message {
    fn new(src: &RouterIdentity, dst: &RouterIdentity, kind: MessageKind) -> Self {
        Self {
            source_process_address: src.process_address.clone(),
            source_process_port: src.process_port,
            source_simulated_address: src.simulated_address,
            destination_simulated_address: dst.simulated_address,
            router_id: src.simulated_address,
            neighbor_id: dst.simulated_address,
            kind,
            weight: 0,
            port_available: false,
            lsa_snapshot: Vec::new(),
        }
    }

    fn with_weight(mut self, weight: Cost) -> Self {
        self.weight = i16::try_from(weight.min(MAX_COST)).unwrap_or(i16::MAX);
        self
    }

    fn with_snapshot(mut self, snapshot: Vec<Lsa>) -> Self {
        self.lsa_snapshot = snapshot;
        self
    }

    pub fn hello(src: &RouterIdentity, dst: &RouterIdentity, weight: Cost) -> Self {
        Self::new(src, dst, MessageKind::Hello).with_weight(weight)
    }

    pub fn lsa_update(src: &RouterIdentity, dst: &RouterIdentity, snapshot: Vec<Lsa>) -> Self {
        Self::new(src, dst, MessageKind::LsaUpdate).with_snapshot(snapshot)
    }

    pub fn acknowledge(src: &RouterIdentity, dst: &RouterIdentity, port_available: bool) -> Self {
        let mut msg = Self::new(src, dst, MessageKind::Acknowledge);
        msg.port_available = port_available;
        msg
    }

    pub fn connect(src: &RouterIdentity, dst: &RouterIdentity, weight: Cost) -> Self {
        Self::new(src, dst, MessageKind::Connect).with_weight(weight)
    }

    pub fn disconnect(src: &RouterIdentity, dst: &RouterIdentity, snapshot: Vec<Lsa>) -> Self {
        Self::new(src, dst, MessageKind::Disconnect).with_snapshot(snapshot)
    }

    pub fn quit(src: &RouterIdentity, dst: &RouterIdentity) -> Self {
        Self::new(src, dst, MessageKind::Quit)
    }

    pub fn update_weight(src: &RouterIdentity, dst: &RouterIdentity, snapshot: Vec<Lsa>, weight: Cost) -> Self {
        Self::new(src, dst, MessageKind::UpdateWeight)
            .with_snapshot(snapshot)
            .with_weight(weight)
    }

    /// Identity of the router that sent this message.
    pub fn sender(&self) -> RouterIdentity {
        RouterIdentity::new(
            self.source_process_address.clone(),
            self.source_process_port,
            self.source_simulated_address,
        )
    }

    pub fn cost(&self) -> Result<Cost> {
        Cost::try_from(self.weight).map_err(|_| RouterError::InvalidInput(format!("negative weight {} from {}", self.weight, self.source_simulated_address)))
    }

    pub fn into_snapshot(self) -> Vec<Lsa> {
        self.lsa_snapshot
    }
}
