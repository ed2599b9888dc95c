pub mod interface;
pub mod lsdb;

pub use interface::discover_process_address;
pub use lsdb::{LinkStateDatabase, ReconcileOutcome, SweepPolicy};
