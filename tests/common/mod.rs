//! Shared fixtures for broker integration tests

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use request_broker::config::BrokerConfig;
use request_broker::core::body_from_bytes;
use request_broker::core::descriptor::{Method, RequestDescriptor};
use request_broker::core::serialization::encode_descriptor;
use request_broker::core::BodyStream;
use request_broker::error::{BrokerError, Result};
use request_broker::protocol::accounts::{Account, StaticAccounts};
use request_broker::protocol::auth::{generate_salt, hash_token, MemoryCredentialStore};
use request_broker::protocol::builder::{OutboundRequest, RequestBody};
use request_broker::protocol::executor::{HttpTransport, TransportResponse};
use request_broker::RequestBroker;
use std::sync::{Arc, Mutex};

pub const ACCOUNT: &str = "alice";
pub const BASE_URI: &str = "https://cloud.example.com";
pub const CALLER: &str = "com.example.app";
pub const TOKEN: &str = "tok-alice-0123456789";

/// What the fake upstream saw
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub content_type: Option<&'static str>,
    pub follow_redirects: bool,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

type Responder = Box<dyn Fn(&RecordedRequest) -> Result<TransportResponse> + Send + Sync>;

/// In-process upstream answering every request through a closure
pub struct FakeTransport {
    respond: Responder,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl FakeTransport {
    pub fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&RecordedRequest) -> Result<TransportResponse> + Send + Sync + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Always answer with `status`, `headers_text` and `body`
    pub fn fixed(status: u16, headers_text: &'static str, body: Option<&'static [u8]>) -> Arc<Self> {
        Self::new(move |_| {
            Ok(TransportResponse {
                status,
                headers_text: headers_text.to_string(),
                body: body.map(|b| body_from_bytes(Bytes::from_static(b))),
            })
        })
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last(&self) -> RecordedRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request reached the upstream")
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn send(&self, request: OutboundRequest, follow_redirects: bool) -> Result<TransportResponse> {
        let (body, content_type) = match request.body {
            Some(RequestBody::Stream(mut stream)) => {
                let mut buf = Vec::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| BrokerError::TransportError(e.to_string()))?;
                    buf.extend_from_slice(&chunk);
                }
                (Some(buf), None)
            }
            Some(RequestBody::Text {
                content,
                content_type,
            }) => (Some(content.into_bytes()), Some(content_type)),
            None => (None, None),
        };

        let recorded = RecordedRequest {
            method: request.method,
            url: request.url,
            query: request.query,
            headers: request.headers,
            body,
            content_type,
            follow_redirects,
        };
        let response = (self.respond)(&recorded);
        self.requests.lock().unwrap().push(recorded);
        response
    }
}

pub fn config_with_capacity(capacity: usize) -> BrokerConfig {
    BrokerConfig::default_with_overrides(|c| c.pipe.capacity = capacity)
}

/// Broker with one account, paired with [`CALLER`] under [`TOKEN`]
pub fn broker_with(transport: Arc<FakeTransport>, config: &BrokerConfig) -> RequestBroker {
    let accounts = StaticAccounts::new().with_account(Account::new(ACCOUNT, BASE_URI));
    let credentials =
        MemoryCredentialStore::new().with_credential(CALLER, ACCOUNT, hash_token(TOKEN, &generate_salt()));
    RequestBroker::new(config, Arc::new(accounts), Arc::new(credentials), transport)
}

pub fn broker(transport: Arc<FakeTransport>) -> RequestBroker {
    broker_with(transport, &BrokerConfig::default())
}

pub fn caller() -> Vec<String> {
    vec![CALLER.to_string()]
}

pub fn descriptor(method: &str, url: &str) -> RequestDescriptor {
    RequestDescriptor::new(ACCOUNT, method, url, TOKEN)
}

pub fn envelope(descriptor: &RequestDescriptor) -> Vec<u8> {
    encode_descriptor(descriptor).expect("encode descriptor")
}

pub fn stream_of(chunks: &[&'static [u8]]) -> BodyStream {
    let chunks: Vec<std::io::Result<Bytes>> = chunks
        .iter()
        .copied()
        .map(|c| Ok(Bytes::from_static(c)))
        .collect();
    futures::stream::iter(chunks).boxed()
}
