//! # Request Proxy Protocol
//!
//! The stages a descriptor passes through between decoding and streaming:
//! account lookup, token authentication, request building and execution.

pub mod accounts;
pub mod auth;
pub mod builder;
pub mod executor;
