//! Streaming market-data plumbing for the optdesk engine.
//!
//! Owns the transport seam, the reconnecting connection manager with its
//! bounded pending queue, the sparse tick decoder, the price store, and
//! the instrument-master HTTP client.

pub mod connection;
pub mod error;
pub mod instruments;
pub mod message;
pub mod prices;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState, SendOutcome};
pub use error::FeedError;
pub use instruments::{HttpInstrumentMaster, InstrumentMaster, StrikeRow, SymbolData};
pub use message::{ControlMessage, FeedAction, TickMessage};
pub use prices::{PriceStore, Quote};
pub use transport::{Transport, WsTransport};
