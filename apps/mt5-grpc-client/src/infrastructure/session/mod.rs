//! Session Management
//!
//! [`SharedSession`] wraps any [`SessionHandle`](crate::application::ports::SessionHandle)
//! with an epoch counter and a single-flight reconnect gate, so that every
//! caller that lost the same connection shares one physical reconnect.
//! [`GrpcSession`] is the tonic-backed handle.

mod grpc;
mod shared;

pub use grpc::GrpcSession;
pub use shared::SharedSession;
