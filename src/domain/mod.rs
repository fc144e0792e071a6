//! Domain types and the ports the engine talks through.

pub mod ledger;
pub mod phone;
pub mod plan;
pub mod ports;
pub mod transaction;
