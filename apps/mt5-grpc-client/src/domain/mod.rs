//! Domain Layer - Connection and subscription types.
//!
//! Pure types shared by the executor and the subscription pump. Nothing
//! here performs I/O.

/// Session credentials, tokens, and connection state.
pub mod connection;

/// Subscription lifecycle state and statistics.
pub mod subscription;
