//! # Envelope Serialization
//!
//! Binary encoding of the two envelopes that cross the process boundary.
//!
//! ## Wire Format
//! ```text
//! descriptor: [Magic(4)] [Kind=0x01] [bincode(RequestDescriptor)]
//! result:     [Magic(4)] [Kind=0x02] [Version(1)] [bincode(Option<BrokerError>)]
//!             [bincode(Option<String>) headers, V2 only] [raw body ...]
//! ```
//!
//! Every element after the header is self-delimiting, so a reader that
//! decodes the result prefix stops exactly where the body begins. The body
//! carries no length prefix.

use crate::config::{MAGIC_BYTES, MAX_ENVELOPE_SIZE};
use crate::core::descriptor::RequestDescriptor;
use crate::error::{constants, BrokerError, Result};
use bincode::Options;
use std::io::Read;

/// Kind byte of a request descriptor envelope
pub const KIND_DESCRIPTOR: u8 = 0x01;

/// Kind byte of a result envelope
pub const KIND_RESULT: u8 = 0x02;

/// Bytes preceding the bincode payload of a descriptor envelope
pub const DESCRIPTOR_HEADER_LEN: usize = 5;

/// Bytes preceding the bincode slots of a result envelope
pub const RESULT_HEADER_LEN: usize = 6;

/// Result envelope layout selected by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    /// Error slot only, then body
    V1,
    /// Error slot and headers text, then body
    #[default]
    V2,
}

impl ProtocolVersion {
    /// Get the version byte for the wire protocol
    pub fn version_byte(self) -> u8 {
        match self {
            ProtocolVersion::V1 => 0x01,
            ProtocolVersion::V2 => 0x02,
        }
    }

    /// Detect version from its byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ProtocolVersion::V1),
            0x02 => Some(ProtocolVersion::V2),
            _ => None,
        }
    }

    /// Whether the result envelope carries the headers slot
    pub fn includes_headers(self) -> bool {
        matches!(self, ProtocolVersion::V2)
    }
}

/// Decoded result prefix: everything in a result envelope before the body
#[derive(Debug)]
pub struct ResultPrefix {
    pub version: ProtocolVersion,
    pub error: Option<BrokerError>,
    pub headers: Option<String>,
}

fn wire_options() -> impl Options + Copy {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

/// Encode a descriptor envelope
pub fn encode_descriptor(descriptor: &RequestDescriptor) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(DESCRIPTOR_HEADER_LEN + 256);
    buf.extend_from_slice(&MAGIC_BYTES);
    buf.push(KIND_DESCRIPTOR);
    wire_options().serialize_into(&mut buf, descriptor)?;
    Ok(buf)
}

/// Decode a descriptor envelope.
///
/// Anything that is not exactly one well-formed descriptor within
/// `max_size` bytes fails with `MalformedEnvelope`.
pub fn decode_descriptor(data: &[u8], max_size: usize) -> Result<RequestDescriptor> {
    if data.is_empty() {
        return Err(malformed(constants::ERR_EMPTY_ENVELOPE));
    }
    if data.len() > max_size {
        return Err(BrokerError::MalformedEnvelope(format!(
            "{}: {} bytes",
            constants::ERR_OVERSIZED_ENVELOPE,
            data.len()
        )));
    }
    if data.len() < DESCRIPTOR_HEADER_LEN || data[0..4] != MAGIC_BYTES {
        return Err(malformed(constants::ERR_INVALID_MAGIC));
    }
    if data[4] != KIND_DESCRIPTOR {
        return Err(malformed(constants::ERR_UNEXPECTED_KIND));
    }

    wire_options()
        .with_limit(max_size as u64)
        .reject_trailing_bytes()
        .deserialize(&data[DESCRIPTOR_HEADER_LEN..])
        .map_err(|e| BrokerError::MalformedEnvelope(e.to_string()))
}

/// Encode the result prefix that precedes the raw body.
///
/// `headers` is ignored for [`ProtocolVersion::V1`]. Fails if the error
/// value cannot be serialized (callers pass errors through
/// [`BrokerError::into_wire`] first) or if a slot would exceed the limit the
/// reading side enforces. The broker truncates its text to
/// [`MAX_SLOT_TEXT_LEN`](crate::config::MAX_SLOT_TEXT_LEN) beforehand.
pub fn encode_result_prefix(
    version: ProtocolVersion,
    error: Option<&BrokerError>,
    headers: Option<&str>,
) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(RESULT_HEADER_LEN + 64 + headers.map_or(0, str::len));
    buf.extend_from_slice(&MAGIC_BYTES);
    buf.push(KIND_RESULT);
    buf.push(version.version_byte());

    let options = wire_options();
    options.serialize_into(&mut buf, &error)?;
    check_slot_size(buf.len() - RESULT_HEADER_LEN)?;
    if version.includes_headers() {
        let before = buf.len();
        options.serialize_into(&mut buf, &headers)?;
        check_slot_size(buf.len() - before)?;
    }
    Ok(buf)
}

// Each slot is read back under a MAX_ENVELOPE_SIZE limit
fn check_slot_size(len: usize) -> Result<()> {
    if len > MAX_ENVELOPE_SIZE {
        return Err(malformed(constants::ERR_OVERSIZED_ENVELOPE));
    }
    Ok(())
}

/// Cut `text` to at most `max_len` bytes on a character boundary
pub fn truncate_text(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}

/// Decode a result prefix from a blocking reader.
///
/// Reads exactly the prefix bytes; the reader is left positioned at the
/// first body byte.
pub fn decode_result_prefix<R: Read>(reader: &mut R) -> Result<ResultPrefix> {
    read_result_prefix(reader).map_err(|e| match e {
        BrokerError::Serialization(inner) => BrokerError::MalformedEnvelope(inner.to_string()),
        other => other,
    })
}

/// Like [`decode_result_prefix`] but keeps raw bincode errors so callers can
/// tell a short read from corrupt data.
pub(crate) fn read_result_prefix<R: Read>(reader: &mut R) -> Result<ResultPrefix> {
    let mut header = [0u8; RESULT_HEADER_LEN];
    reader.read_exact(&mut header)?;
    let version = parse_result_header(&header)?;

    let options = wire_options()
        .with_limit(MAX_ENVELOPE_SIZE as u64)
        .allow_trailing_bytes();
    let error: Option<BrokerError> = options.deserialize_from(&mut *reader)?;
    let headers: Option<String> = if version.includes_headers() {
        options.deserialize_from(&mut *reader)?
    } else {
        None
    };

    Ok(ResultPrefix {
        version,
        error,
        headers,
    })
}

fn parse_result_header(header: &[u8]) -> Result<ProtocolVersion> {
    if header[0..4] != MAGIC_BYTES {
        return Err(malformed(constants::ERR_INVALID_MAGIC));
    }
    if header[4] != KIND_RESULT {
        return Err(malformed(constants::ERR_UNEXPECTED_KIND));
    }
    ProtocolVersion::from_byte(header[5]).ok_or_else(|| {
        BrokerError::MalformedEnvelope(format!("{}: {}", constants::ERR_UNKNOWN_VERSION, header[5]))
    })
}

// Wire indices of the BrokerError variants, in declaration order
const VARIANT_INVALID_TOKEN: u32 = 2;
const VARIANT_HTTP_REQUEST_FAILED: u32 = 6;
const VARIANT_PIPE_CLOSED: u32 = 9;
const WIRE_VARIANTS: u32 = 10;

/// Length of the result prefix at the start of `buf`, or `None` while the
/// buffered bytes do not cover it yet.
///
/// Walks the fixint length fields without allocating, so a caller feeding
/// bytes in small reads can wait for the whole prefix and deserialize once.
pub(crate) fn result_prefix_len(buf: &[u8]) -> Result<Option<usize>> {
    let Some(header) = buf.get(..RESULT_HEADER_LEN) else {
        return Ok(None);
    };
    let version = parse_result_header(header)?;
    let mut scan = SlotScanner {
        buf,
        pos: RESULT_HEADER_LEN,
    };

    let Some(has_error) = scan.option_tag()? else {
        return Ok(None);
    };
    if has_error {
        let Some(index) = scan.array::<4>() else {
            return Ok(None);
        };
        let complete = match u32::from_le_bytes(index) {
            VARIANT_INVALID_TOKEN | VARIANT_PIPE_CLOSED => true,
            VARIANT_HTTP_REQUEST_FAILED => scan.array::<2>().is_some() && scan.string()?,
            index if index < WIRE_VARIANTS => scan.string()?,
            index => {
                return Err(BrokerError::MalformedEnvelope(format!(
                    "Unknown error variant: {index}"
                )))
            }
        };
        if !complete {
            return Ok(None);
        }
    }

    if version.includes_headers() {
        let Some(has_headers) = scan.option_tag()? else {
            return Ok(None);
        };
        if has_headers && !scan.string()? {
            return Ok(None);
        }
    }
    Ok(Some(scan.pos))
}

struct SlotScanner<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl SlotScanner<'_> {
    fn take(&mut self, len: usize) -> Option<&[u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.buf.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    fn option_tag(&mut self) -> Result<Option<bool>> {
        match self.array::<1>() {
            None => Ok(None),
            Some([0]) => Ok(Some(false)),
            Some([1]) => Ok(Some(true)),
            Some([tag]) => Err(BrokerError::MalformedEnvelope(format!(
                "Invalid option tag: {tag}"
            ))),
        }
    }

    /// Skip a length-prefixed string; false when it is not fully buffered
    fn string(&mut self) -> Result<bool> {
        let Some(len) = self.array::<8>() else {
            return Ok(false);
        };
        let len = u64::from_le_bytes(len);
        if len > MAX_ENVELOPE_SIZE as u64 {
            return Err(malformed(constants::ERR_OVERSIZED_ENVELOPE));
        }
        Ok(self.take(len as usize).is_some())
    }
}

fn malformed(msg: &str) -> BrokerError {
    BrokerError::MalformedEnvelope(msg.to_string())
}
