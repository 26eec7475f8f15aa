//! # Error Types
//!
//! Error handling for every stage of a brokered request.
//!
//! Errors raised while decoding, authenticating, building or executing a
//! request never cross the process boundary as a failure of the call itself.
//! They are captured, normalized with [`BrokerError::into_wire`], and written
//! into the error slot of the result envelope so the caller can read them.
//!
//! ## Error Categories
//! - **Envelope Errors**: malformed or truncated descriptor bytes
//! - **Authorization Errors**: unknown account, invalid token, corrupted stored hash
//! - **Request Errors**: bad URL, unsupported method, reserved header supplied
//! - **Upstream Errors**: non-2xx responses and transport failures
//! - **Local Errors**: I/O, configuration, closed pipes
//!
//! ## Example Usage
//! ```rust
//! use request_broker::error::{BrokerError, Result};
//!
//! fn check_url(url: &str) -> Result<()> {
//!     if !url.starts_with('/') {
//!         return Err(BrokerError::InvalidRequestUrl(url.to_string()));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_url("remote.php").is_err());
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Envelope errors
    pub const ERR_EMPTY_ENVELOPE: &str = "Envelope is empty";
    pub const ERR_INVALID_MAGIC: &str = "Envelope magic bytes do not match";
    pub const ERR_UNEXPECTED_KIND: &str = "Envelope carries an unexpected object kind";
    pub const ERR_UNKNOWN_VERSION: &str = "Unknown result envelope version";
    pub const ERR_OVERSIZED_ENVELOPE: &str = "Envelope exceeds maximum size";

    /// Request validation errors
    pub const ERR_URL_NOT_ROOTED: &str = "URL need to start with a /";
    pub const ERR_RESERVED_HEADER: &str = "The 'OCS-APIREQUEST' header will be automatically added by the broker. Please remove the header before making a request";

    /// Upstream errors
    pub const ERR_NO_RESPONSE_BODY: &str = "No response body";
}

/// Primary error type for all broker operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum BrokerError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Invalid request URL: {0}")]
    InvalidRequestUrl(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Reserved header conflict: {0}")]
    ReservedHeaderConflict(String),

    #[error("HTTP request failed with status {status}: {diagnostic}")]
    HttpRequestFailed { status: u16, diagnostic: String },

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Result pipe closed")]
    PipeClosed,

    // Local-only variants stay last so wire indices of the others are stable
    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Serialization(#[from] bincode::Error),
}

impl BrokerError {
    /// Convert into a variant that can be written into a result envelope.
    ///
    /// `Io` and `Serialization` wrap foreign error types that cannot be
    /// serialized; they are flattened into their message.
    pub fn into_wire(self) -> Self {
        match self {
            BrokerError::Io(e) => BrokerError::TransportError(e.to_string()),
            BrokerError::Serialization(e) => BrokerError::MalformedEnvelope(e.to_string()),
            other => other,
        }
    }

    /// Short stable name of the error kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Io(_) => "io",
            BrokerError::Serialization(_) => "serialization",
            BrokerError::MalformedEnvelope(_) => "malformed_envelope",
            BrokerError::AccountNotFound(_) => "account_not_found",
            BrokerError::InvalidToken => "invalid_token",
            BrokerError::InvalidRequestUrl(_) => "invalid_request_url",
            BrokerError::UnsupportedMethod(_) => "unsupported_method",
            BrokerError::ReservedHeaderConflict(_) => "reserved_header_conflict",
            BrokerError::HttpRequestFailed { .. } => "http_request_failed",
            BrokerError::TransportError(_) => "transport_error",
            BrokerError::ConfigError(_) => "config_error",
            BrokerError::PipeClosed => "pipe_closed",
        }
    }
}

/// Type alias for Results using BrokerError
pub type Result<T> = std::result::Result<T, BrokerError>;
