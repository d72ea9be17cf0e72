//! Stream Subscriptions
//!
//! A [`SubscriptionPump`] turns a server-streaming call into a
//! [`Subscription`]: a bounded data channel plus a bounded error channel fed
//! by one background task. The task re-opens the stream after transient
//! failures and emits at most one terminal error.
//!
//! # Delivery
//!
//! Messages arrive in server order within one connection epoch. Messages in
//! flight when a connection drops may be lost. A full data channel blocks the
//! pump, which in turn stops reading the network stream.

mod adapter;
mod pump;
mod subscription;

pub use adapter::StreamAdapter;
pub use pump::{PumpConfig, SubscriptionPump};
pub use subscription::{Subscription, SubscriptionHandle};
