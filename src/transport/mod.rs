//! # Transports
//!
//! - **pipe**: bounded result pipe between the broker and its caller
//! - **http**: upstream HTTP transport on `reqwest`
//! - **local**: unix socket front end (unix only)

pub mod http;
#[cfg(unix)]
pub mod local;
pub mod pipe;

pub use pipe::{split_result, ResponseHandle, ResultBody, ResultPipe};
