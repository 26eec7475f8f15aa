use crate::core::serialization::{read_result_prefix, result_prefix_len, ResultPrefix};
use crate::error::{BrokerError, Result};
use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// Incremental decoder for the result prefix.
///
/// Yields one [`ResultPrefix`] once enough bytes are buffered and consumes
/// nothing beyond it, so whatever remains in the buffer is body. Partial
/// input is measured from its length fields and never deserialized.
#[derive(Debug, Default)]
pub struct ResultPrefixCodec;

impl Decoder for ResultPrefixCodec {
    type Item = ResultPrefix;
    type Error = BrokerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ResultPrefix>> {
        let Some(len) = result_prefix_len(&src[..])? else {
            return Ok(None);
        };

        let mut prefix_bytes: &[u8] = &src[..len];
        let prefix = read_result_prefix(&mut prefix_bytes).map_err(|e| match e {
            BrokerError::Serialization(e) => BrokerError::MalformedEnvelope(e.to_string()),
            BrokerError::Io(e) => BrokerError::MalformedEnvelope(e.to_string()),
            other => other,
        })?;
        src.advance(len);
        Ok(Some(prefix))
    }
}
