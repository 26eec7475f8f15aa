#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use request_broker::core::codec::ResultPrefixCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);
    let _ = ResultPrefixCodec.decode(&mut buf);
});
