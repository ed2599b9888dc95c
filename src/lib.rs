pub mod algorithms;
pub mod command;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod router;
pub mod types;

use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use network::LinkStateDatabase;
use protocol::NeighborTable;
use types::RouterIdentity;

pub use error::{Result, RouterError};
pub use router::{ConnectOutcome, DisconnectOutcome, Router, RouterOptions, UpdateOutcome};

/// Everything a router mutates while running. The neighbour slots and the
/// LSDB live behind one lock so that a reconciliation is atomic with
/// respect to slot changes.
#[derive(Debug, Clone)]
pub struct RouterState {
    pub identity: RouterIdentity,
    pub neighbors: NeighborTable,
    pub lsdb: LinkStateDatabase,
}

impl RouterState {
    pub fn new(identity: RouterIdentity) -> Self {
        let lsdb = LinkStateDatabase::new(identity.simulated_address);
        Self {
            identity,
            neighbors: NeighborTable::new(),
            lsdb,
        }
    }
}

impl fmt::Display for RouterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.lsdb)
    }
}

pub type SharedRouterState = Arc<Mutex<RouterState>>;
