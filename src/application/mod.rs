//! Application layer: the payment orchestrator and the machinery that keeps the
//! durable store and the fallback mirror consistent.
//!
//! `PaymentEngine` is the entry point. `EngineRuntime` wires it together with the
//! connectivity supervisor and the callback consumer task.

pub mod callbacks;
pub mod connectivity;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod mirror;
pub mod runtime;
pub mod store;
pub mod supervisor;
pub mod sync;
