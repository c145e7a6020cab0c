//! Application Layer - Ports and the application shell.
//!
//! Port interfaces define how the connection subsystem reaches the network;
//! services compose the manager with the fallback source.

/// Port interfaces for transports and snapshot sources.
pub mod ports;

/// Application services (live/fallback supervision).
pub mod services;
