//! Maps request descriptors onto outbound requests.
//!
//! Building is pure: nothing here touches the network, so every refusal
//! (unknown method, unrooted URL, forged marker header) happens before a
//! connection is opened.

use crate::core::descriptor::{Method, RequestDescriptor};
use crate::core::BodyStream;
use crate::error::{constants, BrokerError, Result};
use std::fmt;

/// Marker header injected into every outbound request
pub const RESERVED_HEADER: &str = "OCS-APIREQUEST";

pub const RESERVED_HEADER_VALUE: &str = "true";

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";

pub const CONTENT_TYPE_XML: &str = "text/xml; charset=UTF-8";

/// Body sent with a PROPFIND when the caller supplies none
pub const PROPFIND_ALLPROP_BODY: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
<D:propfind xmlns:D=\"DAV:\"><D:allprop/></D:propfind>";

/// Depth used for every PROPFIND
pub const PROPFIND_DEPTH: u8 = 1;

/// Request body attached to an outbound request
pub enum RequestBody {
    /// Bytes supplied by the caller on the separate body channel, sent as is
    Stream(BodyStream),
    /// Text taken from the descriptor
    Text {
        content: String,
        content_type: &'static str,
    },
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Stream(_) => f.write_str("Stream(..)"),
            RequestBody::Text {
                content,
                content_type,
            } => f
                .debug_struct("Text")
                .field("len", &content.len())
                .field("content_type", content_type)
                .finish(),
        }
    }
}

/// PROPFIND specifics. The response body is handed back raw; the broker
/// never parses multistatus XML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropfindOptions {
    pub depth: u8,
    pub all_properties: bool,
}

/// A request ready to be handed to an [`HttpTransport`](crate::protocol::executor::HttpTransport)
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    /// Absolute URL without query string
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub propfind: Option<PropfindOptions>,
}

impl OutboundRequest {
    /// First value of a header, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }
}

/// Build the outbound request for `descriptor` against `base_uri`.
///
/// `body` is the caller's separate body channel, if any. It takes precedence
/// over `body_text` and is dropped for methods that never carry a body.
pub fn build(
    descriptor: &RequestDescriptor,
    base_uri: &str,
    body: Option<BodyStream>,
) -> Result<OutboundRequest> {
    validate_url(&descriptor.url)?;
    let method: Method = descriptor.method.parse()?;
    let headers = build_headers(descriptor, method)?;

    let url = format!("{}{}", base_uri.trim_end_matches('/'), descriptor.url);
    let body = select_body(method, descriptor.body_text.as_deref(), body);
    let propfind = (method == Method::Propfind).then_some(PropfindOptions {
        depth: PROPFIND_DEPTH,
        all_properties: true,
    });

    Ok(OutboundRequest {
        method,
        url,
        query: query_pairs(descriptor),
        headers,
        body,
        propfind,
    })
}

/// Request paths must be rooted below the account's base URI
pub fn validate_url(url: &str) -> Result<()> {
    if url.starts_with('/') {
        Ok(())
    } else {
        Err(BrokerError::InvalidRequestUrl(format!(
            "{}: '{url}'",
            constants::ERR_URL_NOT_ROOTED
        )))
    }
}

/// Flatten query parameters; the ordered form wins when it is non-empty
pub fn query_pairs(descriptor: &RequestDescriptor) -> Vec<(String, String)> {
    match &descriptor.query_params {
        Some(params) if !params.is_empty() => params
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect(),
        _ => descriptor
            .legacy_params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

fn build_headers(descriptor: &RequestDescriptor, method: Method) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::with_capacity(descriptor.headers.len() + 2);
    headers.push((RESERVED_HEADER.to_string(), RESERVED_HEADER_VALUE.to_string()));

    for (name, values) in &descriptor.headers {
        if name.eq_ignore_ascii_case(RESERVED_HEADER) {
            return Err(BrokerError::ReservedHeaderConflict(
                constants::ERR_RESERVED_HEADER.to_string(),
            ));
        }
        headers.push((name.clone(), values.join(",")));
    }

    if method == Method::Propfind {
        headers.push(("Depth".to_string(), PROPFIND_DEPTH.to_string()));
    }

    Ok(headers)
}

fn select_body(method: Method, text: Option<&str>, stream: Option<BodyStream>) -> Option<RequestBody> {
    if !method.accepts_body() {
        return None;
    }
    if let Some(stream) = stream {
        return Some(RequestBody::Stream(stream));
    }

    let content_type = match method {
        Method::Propfind => CONTENT_TYPE_XML,
        _ => CONTENT_TYPE_JSON,
    };
    match text {
        Some(text) if !text.is_empty() => Some(RequestBody::Text {
            content: text.to_string(),
            content_type,
        }),
        _ if method == Method::Propfind => Some(RequestBody::Text {
            content: PROPFIND_ALLPROP_BODY.to_string(),
            content_type,
        }),
        _ => None,
    }
}
