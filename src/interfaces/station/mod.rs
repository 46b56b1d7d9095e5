//! The station gateway: wire protocol, TCP server and the station-side client adapter.

pub mod client;
pub mod protocol;
pub mod server;
