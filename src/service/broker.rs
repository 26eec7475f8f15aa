//! # Request Broker
//!
//! Entry point for brokered requests. One call decodes a descriptor envelope,
//! checks the caller's token for the target account, builds and executes the
//! upstream request, and hands back a [`ResponseHandle`] streaming the result
//! envelope.
//!
//! Every failure up to and including execution is reported in-band through
//! the error slot of the result prefix. The call itself only fails when the
//! prefix cannot be serialized.
//!
//! ## Example
//! ```no_run
//! use request_broker::config::BrokerConfig;
//! use request_broker::protocol::accounts::{Account, StaticAccounts};
//! use request_broker::protocol::auth::{hash_token, MemoryCredentialStore};
//! use request_broker::service::broker::RequestBroker;
//! use request_broker::transport::http::ReqwestTransport;
//! use std::sync::Arc;
//!
//! # async fn run(envelope: Vec<u8>) -> request_broker::error::Result<()> {
//! let config = BrokerConfig::default();
//! let accounts = StaticAccounts::new().with_account(Account::new("alice", "https://cloud.example.com"));
//! let credentials = MemoryCredentialStore::new()
//!     .with_credential("org.example.sync", "alice", hash_token("secret", "salt"));
//! let transport = ReqwestTransport::new(&config.http)?;
//!
//! let broker = RequestBroker::new(&config, Arc::new(accounts), Arc::new(credentials), Arc::new(transport));
//! let caller = vec!["org.example.sync".to_string()];
//! let (prefix, _body) = broker
//!     .perform_request_v2(&caller, &envelope, None)
//!     .await?
//!     .into_parts()
//!     .await?;
//! println!("{:?}", prefix.error);
//! # Ok(())
//! # }
//! ```

use crate::config::{BrokerConfig, MAX_SLOT_TEXT_LEN};
use crate::core::serialization::{
    decode_descriptor, encode_result_prefix, truncate_text, ProtocolVersion,
};
use crate::core::BodyStream;
use crate::error::{BrokerError, Result};
use crate::protocol::accounts::AccountResolver;
use crate::protocol::auth::{CredentialStore, TokenAuthenticator};
use crate::protocol::builder::build;
use crate::protocol::executor::{ExecutionResult, HttpTransport, RequestExecutor};
use crate::transport::pipe::{ResponseHandle, ResultPipe};
use crate::utils::metrics::{Metrics, Timer};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

pub struct RequestBroker {
    accounts: Arc<dyn AccountResolver>,
    authenticator: TokenAuthenticator,
    executor: RequestExecutor,
    pipe: ResultPipe,
    max_envelope_size: usize,
    metrics: Arc<Metrics>,
}

impl RequestBroker {
    pub fn new(
        config: &BrokerConfig,
        accounts: Arc<dyn AccountResolver>,
        credentials: Arc<dyn CredentialStore>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let metrics = Arc::new(Metrics::new());
        Self {
            accounts,
            authenticator: TokenAuthenticator::new(credentials),
            executor: RequestExecutor::new(transport),
            pipe: ResultPipe::new(config.pipe.capacity, metrics.clone()),
            max_envelope_size: config.codec.max_envelope_size,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Largest descriptor envelope accepted, in bytes
    pub fn max_envelope_size(&self) -> usize {
        self.max_envelope_size
    }

    /// Result envelope carries the error slot and the body
    pub async fn perform_request_v1(
        &self,
        caller: &[String],
        envelope: &[u8],
        body: Option<BodyStream>,
    ) -> Result<ResponseHandle> {
        self.perform(ProtocolVersion::V1, caller, envelope, body).await
    }

    /// Result envelope carries the error slot, the response headers and the body
    pub async fn perform_request_v2(
        &self,
        caller: &[String],
        envelope: &[u8],
        body: Option<BodyStream>,
    ) -> Result<ResponseHandle> {
        self.perform(ProtocolVersion::V2, caller, envelope, body).await
    }

    /// Run one brokered request and start streaming its result envelope.
    ///
    /// `caller` lists every identity the calling process is known by; a
    /// credential stored under any of them authorizes the request.
    #[instrument(skip(self, caller, envelope, body), fields(version = version.version_byte(), envelope_len = envelope.len()))]
    pub async fn perform(
        &self,
        version: ProtocolVersion,
        caller: &[String],
        envelope: &[u8],
        body: Option<BodyStream>,
    ) -> Result<ResponseHandle> {
        self.metrics.request_received();

        let (error, headers, body) = match self.process(caller, envelope, body).await {
            Ok(ExecutionResult {
                status,
                headers_text,
                body,
            }) => {
                debug!(status, "Request completed");
                self.metrics.request_succeeded();
                (None, Some(headers_text), body)
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Request failed");
                self.metrics.request_failed(&e);
                (Some(e.into_wire()), None, None)
            }
        };

        let headers = headers.filter(|_| version.includes_headers()).map(|mut text| {
            truncate_text(&mut text, MAX_SLOT_TEXT_LEN);
            text
        });
        let prefix = encode_result_prefix(version, error.as_ref(), headers.as_deref())
            .inspect_err(|e| {
                error!(error = %e, "Failed to serialize result envelope");
                self.metrics.envelope_failure();
            })?;

        Ok(self.pipe.stream(Bytes::from(prefix), body))
    }

    async fn process(
        &self,
        caller: &[String],
        envelope: &[u8],
        body: Option<BodyStream>,
    ) -> Result<ExecutionResult> {
        let _timer = Timer::start("process_request");
        let descriptor = decode_descriptor(envelope, self.max_envelope_size)?;
        debug!(
            account = %descriptor.account_id,
            method = %descriptor.method,
            url = %descriptor.url,
            "Decoded request descriptor"
        );

        let account = self
            .accounts
            .account(&descriptor.account_id)
            .ok_or_else(|| BrokerError::AccountNotFound(descriptor.account_id.clone()))?;

        if !self
            .authenticator
            .is_authorized(caller, &descriptor.account_id, &descriptor.token)?
        {
            return Err(BrokerError::InvalidToken);
        }

        let request = build(&descriptor, &account.base_uri, body)?;
        self.executor
            .execute(request, descriptor.follow_redirects)
            .await
    }
}
