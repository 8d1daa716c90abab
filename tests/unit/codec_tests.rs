//! Frame codec tests: chunking, overflow, and custom delimiters.

use bytes::{Bytes, BytesMut};
use mcp_bridge::socket::{FrameCodec, FrameOptions};
use mcp_bridge::AppError;
use tokio_util::codec::Decoder;

fn feed(codec: &mut FrameCodec, chunks: &[&[u8]]) -> Vec<Bytes> {
    let mut buf = BytesMut::new();
    let mut frames = Vec::new();
    for chunk in chunks {
        buf.extend_from_slice(chunk);
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
    }
    frames
}

#[test]
fn two_frames_survive_any_chunking() {
    let expected = vec![Bytes::from_static(b"A"), Bytes::from_static(b"B")];

    let chunkings: [&[&[u8]]; 4] = [
        &[b"A\nB\n"],
        &[b"A\n", b"B\n"],
        &[b"A", b"\nB\n"],
        &[b"A", b"\n", b"B", b"\n"],
    ];
    for chunks in chunkings {
        let mut codec = FrameCodec::default();
        assert_eq!(feed(&mut codec, chunks), expected, "chunking {chunks:?}");
    }
}

#[test]
fn byte_at_a_time_delivery_yields_frames_in_order() {
    let input = b"first\nsecond\nthird\n";
    let chunks: Vec<&[u8]> = input.chunks(1).collect();
    let mut codec = FrameCodec::default();
    let frames = feed(&mut codec, &chunks);
    assert_eq!(
        frames,
        vec![
            Bytes::from_static(b"first"),
            Bytes::from_static(b"second"),
            Bytes::from_static(b"third"),
        ]
    );
}

#[test]
fn overflow_discards_buffer_and_recovers() {
    let mut codec = FrameCodec::new(FrameOptions::new("\n", 8));
    let mut buf = BytesMut::from(&b"0123456789"[..]);

    let err = codec.decode(&mut buf).unwrap_err();
    assert!(matches!(err, AppError::Frame(_)));
    assert!(buf.is_empty(), "overflowed bytes must be dropped");

    buf.extend_from_slice(b"ok\n");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"ok")));
}

#[test]
fn custom_delimiter_frames_correctly() {
    let mut codec = FrameCodec::new(FrameOptions::new("\r\n", 1024));
    let frames = feed(&mut codec, &[b"one\r", b"\ntwo\r\n"]);
    assert_eq!(
        frames,
        vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")]
    );
}

#[test]
fn partial_frame_at_eof_is_dropped() {
    let mut codec = FrameCodec::default();
    let mut buf = BytesMut::from(&b"done\npartial"[..]);
    assert_eq!(
        codec.decode_eof(&mut buf).unwrap(),
        Some(Bytes::from_static(b"done"))
    );
    assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    assert!(buf.is_empty());
}
