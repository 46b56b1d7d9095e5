//! Application layer: the lifecycle coordinator and the pieces it orchestrates.
//!
//! `Coordinator` is the primary entry point for every mutating station command. It
//! serializes work per student through `StudentLocks`, reconciles roster imports and
//! publishes one event per persisted log entry.

pub mod command;
pub mod coordinator;
pub mod import;
pub mod locks;
