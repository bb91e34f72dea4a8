//! Broker transports.
//!
//! The transport abstraction and the resilience wrapped around it live in
//! `ledger-events`. This module provides infrastructure-backed transports.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsTransport;
