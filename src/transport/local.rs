//! Unix domain socket front end for the broker.
//!
//! Each connection carries exactly one request:
//!
//! ```text
//! client -> broker: [Version(1)] [EnvelopeLen(u32 BE)] [Envelope] [HasBody(1)] [body until half-close]
//! broker -> client: [Result prefix] [body until close]
//! ```
//!
//! The caller's identities come from the peer credentials of the socket,
//! never from anything the client sends.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, instrument, warn};

use crate::core::body_from_reader;
use crate::core::serialization::{encode_result_prefix, ProtocolVersion};
use crate::error::{constants, BrokerError, Result};
use crate::service::broker::RequestBroker;

/// Maps a peer's user id to the identities it may present credentials under
pub trait IdentityResolver: Send + Sync {
    fn identities(&self, uid: u32) -> Vec<String>;
}

/// Fixed uid to identity table
#[derive(Debug, Default, Clone)]
pub struct StaticIdentities {
    by_uid: HashMap<u32, Vec<String>>,
}

impl StaticIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, uid: u32, identity: impl Into<String>) -> Self {
        self.by_uid.entry(uid).or_default().push(identity.into());
        self
    }
}

impl IdentityResolver for StaticIdentities {
    fn identities(&self, uid: u32) -> Vec<String> {
        self.by_uid.get(&uid).cloned().unwrap_or_default()
    }
}

/// Serve brokered requests on a unix socket until CTRL+C
#[instrument(skip(path, broker, identities), fields(socket_path = %path.as_ref().display()))]
pub async fn start_server<P: AsRef<Path>>(
    path: P,
    broker: Arc<RequestBroker>,
    identities: Arc<dyn IdentityResolver>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    start_server_with_shutdown(path, broker, identities, shutdown_rx).await
}

/// Serve brokered requests on a unix socket with an external shutdown channel
#[instrument(skip(path, broker, identities, shutdown_rx), fields(socket_path = %path.as_ref().display()))]
pub async fn start_server_with_shutdown<P: AsRef<Path>>(
    path: P,
    broker: Arc<RequestBroker>,
    identities: Arc<dyn IdentityResolver>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    if path.as_ref().exists() {
        tokio::fs::remove_file(&path).await.ok();
    }

    let path_string = path.as_ref().to_string_lossy().to_string();

    let listener = UnixListener::bind(&path)?;
    info!(path = %path_string, "Listening on unix socket");

    let active_connections = Arc::new(Mutex::new(0u32));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down broker. Waiting for requests to finish...");

                let timeout = tokio::time::sleep(Duration::from_secs(10));
                tokio::pin!(timeout);

                loop {
                    tokio::select! {
                        _ = &mut timeout => {
                            warn!("Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(100)) => {
                            let connections = *active_connections.lock().await;
                            if connections == 0 {
                                info!("All requests finished, shutting down");
                                break;
                            }
                            debug!(connections, "Waiting for requests to finish");
                        }
                    }
                }

                if Path::new(&path_string).exists() {
                    if let Err(e) = tokio::fs::remove_file(&path_string).await {
                        error!(error = %e, path = %path_string, "Failed to remove socket file");
                    } else {
                        info!(path = %path_string, "Removed socket file");
                    }
                }

                broker.metrics().log_metrics();
                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _)) => {
                        let active_connections = active_connections.clone();
                        let broker = broker.clone();
                        let identities = identities.clone();

                        {
                            let mut count = active_connections.lock().await;
                            *count += 1;
                        }

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &broker, identities.as_ref()).await {
                                warn!(kind = e.kind(), error = %e, "Connection ended with error");
                            }

                            let mut count = active_connections.lock().await;
                            *count -= 1;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

/// Serve a single request on an accepted connection
pub async fn handle_connection(
    stream: UnixStream,
    broker: &RequestBroker,
    identities: &dyn IdentityResolver,
) -> Result<()> {
    let uid = stream.peer_cred()?.uid();
    let (mut reader, mut writer) = stream.into_split();

    let version_byte = reader.read_u8().await?;
    let version = ProtocolVersion::from_byte(version_byte).ok_or_else(|| {
        BrokerError::MalformedEnvelope(format!("{}: {version_byte}", constants::ERR_UNKNOWN_VERSION))
    })?;

    let envelope_len = reader.read_u32().await? as usize;
    if envelope_len > broker.max_envelope_size() {
        let error = BrokerError::MalformedEnvelope(format!(
            "{}: {envelope_len} bytes",
            constants::ERR_OVERSIZED_ENVELOPE
        ));
        warn!(uid, envelope_len, "Refusing oversized envelope");
        writer
            .write_all(&encode_result_prefix(version, Some(&error), None)?)
            .await?;
        writer.shutdown().await?;
        return Ok(());
    }

    let mut envelope = vec![0u8; envelope_len];
    reader.read_exact(&mut envelope).await?;
    let has_body = reader.read_u8().await? != 0;
    let body = has_body.then(|| body_from_reader(reader));

    let caller = identities.identities(uid);
    debug!(uid, identities = caller.len(), has_body, "Request received");

    let mut handle = broker.perform(version, &caller, &envelope, body).await?;
    let written = tokio::io::copy(&mut handle, &mut writer).await?;
    writer.shutdown().await?;
    debug!(uid, bytes = written, "Result delivered");

    Ok(())
}

/// Send one request to a broker socket.
///
/// The write side is closed once the request is sent; read the result
/// envelope from the returned stream, e.g. with
/// [`split_result`](crate::transport::pipe::split_result).
#[instrument(skip(path, envelope, body), fields(socket_path = %path.as_ref().display()))]
pub async fn send_request<P: AsRef<Path>>(
    path: P,
    version: ProtocolVersion,
    envelope: &[u8],
    body: Option<&[u8]>,
) -> Result<UnixStream> {
    let len = u32::try_from(envelope.len())
        .map_err(|_| BrokerError::MalformedEnvelope(constants::ERR_OVERSIZED_ENVELOPE.to_string()))?;

    let mut stream = UnixStream::connect(path).await?;
    stream.write_u8(version.version_byte()).await?;
    stream.write_u32(len).await?;
    stream.write_all(envelope).await?;
    stream.write_u8(u8::from(body.is_some())).await?;
    if let Some(body) = body {
        stream.write_all(body).await?;
    }
    stream.shutdown().await?;

    Ok(stream)
}
