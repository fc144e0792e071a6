//! Adapters for the durable store and the payment gateway.

pub mod in_memory;
pub mod lipia;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
