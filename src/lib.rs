//! Sliding Quota - shared sliding-window rate limiting
//!
//! This crate enforces per-identifier request quotas across any number of
//! stateless service instances. All window state lives in a shared ordered
//! event store (Redis in production); each admission decision is made by one
//! atomic trim/count/insert operation against that store.

pub mod config;
pub mod error;
pub mod ratelimit;
