use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Logical router address inside the simulated network. Used as the LSDB key
/// and as the graph node identifier.
pub type SimulatedAddr = Ipv4Addr;

/// Link cost.
pub type Cost = u16;

/// Costs travel as a signed 16-bit field on the wire.
pub const MAX_COST: Cost = i16::MAX as Cost;

/// Where a router can be reached, and who it claims to be.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouterIdentity {
    pub process_address: String,
    pub process_port: u16,
    pub simulated_address: SimulatedAddr,
}

impl RouterIdentity {
    pub fn new(process_address: impl Into<String>, process_port: u16, simulated_address: SimulatedAddr) -> Self {
        Self {
            process_address: process_address.into(),
            process_port,
            simulated_address,
        }
    }

    /// `host:port` of the router process.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.process_address, self.process_port)
    }
}

impl fmt::Display for RouterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.simulated_address, self.endpoint())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdjacencyStatus {
    /// No handshake has run over this link yet.
    #[default]
    None,
    Init,
    TwoWay,
}

impl fmt::Display for AdjacencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdjacencyStatus::None => write!(f, "NONE"),
            AdjacencyStatus::Init => write!(f, "INIT"),
            AdjacencyStatus::TwoWay => write!(f, "TWO_WAY"),
        }
    }
}

/// A weighted adjacency to one neighbour, held in a neighbour slot.
#[derive(Debug, Clone)]
pub struct Link {
    pub local: RouterIdentity,
    pub remote: RouterIdentity,
    pub weight: Cost,
    pub status: AdjacencyStatus,
    pub since: DateTime<Utc>,
}

impl Link {
    pub fn new(local: RouterIdentity, remote: RouterIdentity, weight: Cost) -> Self {
        Self {
            local,
            remote,
            weight,
            status: AdjacencyStatus::None,
            since: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: AdjacencyStatus) -> Self {
        self.set_status(status);
        self
    }

    pub fn set_status(&mut self, status: AdjacencyStatus) {
        if self.status != status {
            self.status = status;
            self.since = Utc::now();
        }
    }

    pub fn is_two_way(&self) -> bool {
        self.status == AdjacencyStatus::TwoWay
    }

    /// Whole seconds spent in the current status.
    pub fn status_age_secs(&self) -> i64 {
        Utc::now().signed_duration_since(self.since).num_seconds()
    }

    /// The edge this adjacency contributes to the local LSA.
    pub fn descriptor(&self) -> LinkDescriptor {
        LinkDescriptor {
            neighbor: self.remote.simulated_address,
            port: self.remote.process_port,
            cost: self.weight,
        }
    }
}

/// One edge entry inside an LSA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDescriptor {
    pub neighbor: SimulatedAddr,
    pub port: u16,
    pub cost: Cost,
}

/// Link-state advertisement: one router's adjacency list plus its freshness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lsa {
    pub origin: SimulatedAddr,
    pub sequence: i32,
    /// Sorted by neighbour address, at most one entry per neighbour.
    links: Vec<LinkDescriptor>,
}

impl Lsa {
    pub fn new(origin: SimulatedAddr, sequence: i32) -> Self {
        Self {
            origin,
            sequence,
            links: Vec::new(),
        }
    }

    pub fn with_links(origin: SimulatedAddr, sequence: i32, links: impl IntoIterator<Item = LinkDescriptor>) -> Self {
        let mut lsa = Self::new(origin, sequence);
        for link in links {
            lsa.upsert_link(link);
        }
        lsa
    }

    pub fn links(&self) -> &[LinkDescriptor] {
        &self.links
    }

    pub fn link_to(&self, neighbor: SimulatedAddr) -> Option<&LinkDescriptor> {
        self.links
            .binary_search_by_key(&neighbor, |l| l.neighbor)
            .ok()
            .map(|i| &self.links[i])
    }

    /// Inserts or replaces the descriptor for `link.neighbor`.
    pub fn upsert_link(&mut self, link: LinkDescriptor) {
        match self.links.binary_search_by_key(&link.neighbor, |l| l.neighbor) {
            Ok(i) => self.links[i] = link,
            Err(i) => self.links.insert(i, link),
        }
    }

    pub fn remove_link(&mut self, neighbor: SimulatedAddr) -> Option<LinkDescriptor> {
        self.links
            .binary_search_by_key(&neighbor, |l| l.neighbor)
            .ok()
            .map(|i| self.links.remove(i))
    }

    /// Re-sorts and dedups descriptors of an LSA that arrived off the wire.
    pub(crate) fn normalize(&mut self) {
        self.links.sort_by_key(|l| l.neighbor);
        self.links.dedup_by_key(|l| l.neighbor);
    }

    pub fn bump_sequence(&mut self) {
        self.sequence = self.sequence.saturating_add(1);
    }
}

impl fmt::Display for Lsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):", self.origin, self.sequence)?;
        for link in &self.links {
            write!(f, "\t{},{},{}", link.neighbor, link.port, link.cost)?;
        }
        Ok(())
    }
}
