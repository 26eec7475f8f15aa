//! Executes outbound requests and classifies their outcome.

use crate::config::MAX_SLOT_TEXT_LEN;
use crate::core::serialization::truncate_text;
use crate::core::BodyStream;
use crate::error::{constants, BrokerError, Result};
use crate::protocol::builder::OutboundRequest;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, instrument};

/// Sends outbound requests upstream.
///
/// Implementations must not read the response body before returning; the
/// body is consumed lazily by whoever ends up streaming it.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: OutboundRequest, follow_redirects: bool)
        -> Result<TransportResponse>;
}

/// Response head plus a lazy body, as returned by a transport
pub struct TransportResponse {
    pub status: u16,
    /// Status line and headers rendered as text
    pub headers_text: String,
    pub body: Option<BodyStream>,
}

/// Successful execution: status, headers text and the unread body
pub struct ExecutionResult {
    pub status: u16,
    pub headers_text: String,
    pub body: Option<BodyStream>,
}

impl fmt::Debug for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionResult")
            .field("status", &self.status)
            .field("headers_text", &self.headers_text)
            .field("body", &self.body.as_ref().map(|_| ".."))
            .finish()
    }
}

/// 2xx is success, everything else is a failure
pub fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Send `request` and classify the response.
    ///
    /// On a non-2xx status the body is read into the diagnostic text, up to
    /// [`MAX_SLOT_TEXT_LEN`] bytes, and the response is dropped, releasing its
    /// connection.
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    pub async fn execute(
        &self,
        request: OutboundRequest,
        follow_redirects: bool,
    ) -> Result<ExecutionResult> {
        let response = self.transport.send(request, follow_redirects).await?;
        let status = response.status;

        if is_success(status) {
            debug!(status, "Upstream request succeeded");
            return Ok(ExecutionResult {
                status,
                headers_text: response.headers_text,
                body: response.body,
            });
        }

        let diagnostic = match response.body {
            Some(body) => read_diagnostic(body).await,
            None => constants::ERR_NO_RESPONSE_BODY.to_string(),
        };
        error!(status, diagnostic_len = diagnostic.len(), "Upstream request failed");

        Err(BrokerError::HttpRequestFailed { status, diagnostic })
    }
}

async fn read_diagnostic(mut body: BodyStream) -> String {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                let room = MAX_SLOT_TEXT_LEN - buf.len();
                buf.extend_from_slice(&bytes[..bytes.len().min(room)]);
                if buf.len() == MAX_SLOT_TEXT_LEN {
                    break;
                }
            }
            Err(e) => return e.to_string(),
        }
    }
    let mut text = String::from_utf8_lossy(&buf).into_owned();
    truncate_text(&mut text, MAX_SLOT_TEXT_LEN);
    text
}
