//! HTTP transport backed by `reqwest`.
//!
//! Keeps two clients built from the same [`HttpConfig`]: one follows up to
//! `max_redirects` redirects, the other never follows any. The descriptor's
//! `follow_redirects` flag picks between them per request.
//!
//! `request_timeout` bounds the wait for the response head only. A body that
//! keeps streaming is never cut off by it.

use crate::config::HttpConfig;
use crate::core::descriptor::Method;
use crate::error::{BrokerError, Result};
use crate::protocol::builder::{OutboundRequest, RequestBody};
use crate::protocol::executor::{HttpTransport, TransportResponse};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{redirect, Client};
use std::fmt::Write as _;
use std::io;
use std::time::Duration;
use tracing::{debug, instrument};

pub struct ReqwestTransport {
    following: Client,
    direct: Client,
    head_timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = |policy: redirect::Policy| {
            Client::builder()
                .connect_timeout(config.connect_timeout)
                .user_agent(config.user_agent.as_str())
                .redirect(policy)
                .build()
                .map_err(|e| BrokerError::ConfigError(format!("Failed to build HTTP client: {e}")))
        };

        Ok(Self {
            following: client(redirect::Policy::limited(config.max_redirects))?,
            direct: client(redirect::Policy::none())?,
            head_timeout: config.request_timeout,
        })
    }
}

fn to_reqwest_method(method: Method) -> Result<reqwest::Method> {
    Ok(match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Head => reqwest::Method::HEAD,
        Method::Propfind | Method::Mkcol => reqwest::Method::from_bytes(method.as_str().as_bytes())
            .map_err(|e| BrokerError::TransportError(e.to_string()))?,
    })
}

fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| BrokerError::TransportError(format!("Invalid header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| BrokerError::TransportError(format!("Invalid value for header '{name}': {e}")))?;
        map.append(name, value);
    }
    Ok(map)
}

/// Status line followed by one `name: value` line per header
pub fn render_headers(response: &reqwest::Response) -> String {
    let status = response.status();
    let mut text = format!(
        "{:?} {} {}\r\n",
        response.version(),
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in response.headers() {
        let _ = write!(text, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
    text
}

fn transport_error(e: reqwest::Error) -> BrokerError {
    BrokerError::TransportError(e.to_string())
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn send(&self, request: OutboundRequest, follow_redirects: bool) -> Result<TransportResponse> {
        let client = if follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        let mut builder = client
            .request(to_reqwest_method(request.method)?, &request.url)
            .headers(header_map(&request.headers)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match request.body {
            Some(RequestBody::Stream(stream)) => builder.body(reqwest::Body::wrap_stream(stream)),
            Some(RequestBody::Text {
                content,
                content_type,
            }) => builder.header(CONTENT_TYPE, content_type).body(content),
            None => builder,
        };

        let response = tokio::time::timeout(self.head_timeout, builder.send())
            .await
            .map_err(|_| {
                BrokerError::TransportError(format!(
                    "No response within {} ms",
                    self.head_timeout.as_millis()
                ))
            })?
            .map_err(transport_error)?;
        let status = response.status().as_u16();
        let headers_text = render_headers(&response);
        debug!(status, "Upstream responded");

        let body = response
            .bytes_stream()
            .map_err(io::Error::other)
            .boxed();

        Ok(TransportResponse {
            status,
            headers_text,
            body: Some(body),
        })
    }
}
