//! Domain Layer - Core connection and message types.
//!
//! Pure types with no I/O: the connection state machine, the wire envelope
//! vocabulary, and the subscriber registry.

/// Connection lifecycle state machine and notifications.
pub mod connection;

/// Wire envelope, categories, and price records.
pub mod streaming;

/// Category-keyed subscriber registry.
pub mod subscription;
