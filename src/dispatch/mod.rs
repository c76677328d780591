//! Token routing, bot managers and outbound dispatch
//!
//! The pieces that make N bot credentials look like one bot: a pure router
//! mapping users to credentials, manager variants owning one transport
//! client per credential, and the dispatcher that sends through the routed
//! client with failover to the primary.

/// Response dispatch with primary-credential failover
pub mod dispatcher;
/// Bot manager variants selected at startup
pub mod manager;
/// Pure user→credential routing
pub mod router;
/// Outbound transport contract and Telegram implementation
pub mod transport;

pub use dispatcher::{DispatchError, ResponseDispatcher};
pub use manager::{BotManager, ManagerStats, ShardedManager, SingleInterfaceManager};
pub use router::{RouterConfig, TokenRouter};
pub use transport::{MessageRef, OutboundPayload, OutboundTransport, TransportError};
