//! # Core Protocol Components
//!
//! Request descriptors, envelope codecs, and the body stream type shared by
//! every stage of a brokered request.
//!
//! ## Components
//! - **Descriptor**: what a caller asks for
//! - **Serialization**: descriptor and result envelopes
//! - **Codec**: Tokio decoder for reading a result prefix off a byte stream
//!
//! ## Wire Format
//! ```text
//! [Magic(4)] [Kind(1)] ... [raw body]
//! ```
//!
//! ## Security
//! - Descriptor envelopes are size-limited before any allocation
//! - Magic and kind bytes prevent accidental misinterpretation

pub mod codec;
pub mod descriptor;
pub mod serialization;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::io;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Lazily produced body bytes, used for request and response bodies alike
pub type BodyStream = BoxStream<'static, io::Result<Bytes>>;

/// Wrap an async reader as a body stream
pub fn body_from_reader<R>(reader: R) -> BodyStream
where
    R: AsyncRead + Send + 'static,
{
    ReaderStream::new(reader).boxed()
}

/// A body stream yielding one buffer
pub fn body_from_bytes(bytes: impl Into<Bytes>) -> BodyStream {
    futures::stream::once(futures::future::ready(Ok(bytes.into()))).boxed()
}
