//! Resource accounting for warmups.

mod ledger;
mod manager;

pub use ledger::ResourceStats;
pub use manager::{ResourceAllocation, ResourceManager};
