//! # Request Broker
//!
//! Performs authenticated HTTP and WebDAV requests against a server account
//! on behalf of local callers, streaming each response back as a result
//! envelope.
//!
//! A caller sends a serialized [`RequestDescriptor`](core::descriptor::RequestDescriptor)
//! naming the account, method, path, headers and its access token. The broker
//! checks the token against the credential stored for that caller and account,
//! injects the `OCS-APIREQUEST` marker header, executes the request, and
//! returns a byte stream:
//!
//! ```text
//! [Magic(4)] [Kind(1)] [Version(1)] [Error slot] [Headers (v2 only)] [raw body...]
//! ```
//!
//! Failures before or during execution land in the error slot; the caller
//! never sees a half-written envelope.
//!
//! ## Modules
//! - [`core`]: descriptors, envelope serialization and the prefix codec
//! - [`protocol`]: authentication, request building and execution
//! - [`service`]: the [`RequestBroker`](service::RequestBroker) entry point
//! - [`transport`]: result pipe, reqwest transport, unix socket front end
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging, metrics

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use service::RequestBroker;
