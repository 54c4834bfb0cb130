//! Chrome DevTools Protocol client: one multiplexed RPC + event channel per tab.

mod connection;
mod error;
pub mod protocol;

pub use connection::Connection;
pub use error::CdpError;
pub use protocol::EventMessage;
