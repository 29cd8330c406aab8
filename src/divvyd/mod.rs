//! Upstream divvyd connection layer: transport, command multiplexer,
//! connectivity monitor, and amount conversions.

pub mod amount;
pub mod client;
pub mod connection;
pub mod errors;
pub mod monitor;
#[cfg(test)]
pub mod testing;
pub mod types;
pub mod ws;

pub use client::NodeClient;
pub use connection::{ConnectionState, NodeConnection, NodeEvent, NodeTransport};
pub use errors::{LedgerError, LedgerResult};
pub use monitor::{ConnectionMonitor, HeartbeatWorker};
