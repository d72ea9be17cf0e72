//! Application Services
//!
//! The account facade that per-RPC wrappers are written against.

mod account;

pub use account::Mt5Account;
