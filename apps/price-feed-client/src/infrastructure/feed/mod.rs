//! Realtime Feed Channel
//!
//! WebSocket client for the price/sentiment feed.
//!
//! # Components
//!
//! - [`manager`]: connection lifecycle actor
//! - [`reconnect`]: backoff schedule
//! - [`heartbeat`]: liveness probing
//! - [`router`]: inbound validation and dispatch
//! - [`codec`]: JSON envelope encoding/decoding
//! - [`transport`]: `tokio-tungstenite` connector

pub mod codec;
pub mod heartbeat;
pub mod manager;
pub mod reconnect;
pub mod router;
pub mod transport;

pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{HeartbeatConfig, HeartbeatState};
pub use manager::{ConnectionManager, ManagerConfig, SendError};
pub use reconnect::{BackoffConfig, BackoffPolicy};
pub use router::{MessageRouter, RouteOutcome};
pub use transport::TungsteniteConnector;
