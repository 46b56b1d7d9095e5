//! Domain layer: roster entities, the settlement rules, and the ledger port.

pub mod action_log;
pub mod distribution;
pub mod event;
pub mod money;
pub mod payment;
pub mod ports;
pub mod settlement;
pub mod student;
