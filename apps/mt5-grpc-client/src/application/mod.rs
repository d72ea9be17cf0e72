//! Application Layer - Port definitions and the account facade.
//!
//! Ports describe the collaborators the execution core drives (the session
//! handle, server streams, authentication). Services compose the executor
//! and the subscription pump into the surface that RPC wrappers call.

/// Port interfaces for the session handle and server streams.
pub mod ports;

/// Account facade over the executor and subscription pump.
pub mod services;
