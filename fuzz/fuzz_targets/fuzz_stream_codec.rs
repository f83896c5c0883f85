#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use neurolamp_protocol::core::codec::FrameCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Feed the stream in two pieces and drain every frame the codec yields
    let split = data.first().map_or(0, |b| *b as usize).min(data.len());
    let mut codec = FrameCodec::with_max_length(4096);
    let mut buf = BytesMut::new();

    for piece in [&data[..split], &data[split..]] {
        buf.extend_from_slice(piece);
        while let Ok(Some(frame)) = codec.decode(&mut buf) {
            assert!(frame.len() >= 52);
        }
    }
});
