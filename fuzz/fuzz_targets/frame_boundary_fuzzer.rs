//! Fuzz target for frame reassembly across read boundaries
//!
//! Prevent desynchronization when a peer dribbles bytes (HIGH priority)
//!
//! # Strategy
//!
//! - Bodies: JSON-ish text, empty, containing a lone `\r` or `\n`
//! - Chunking: arbitrary split points, including inside the terminator
//!
//! # Invariants
//!
//! - Chunked delivery yields exactly the frames of one-shot delivery
//! - Frames come out in order, terminator stripped
//! - Only the bytes after the last terminator remain buffered
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use proton_proto::{Frame, FrameCodec};

#[derive(Debug, Clone, Arbitrary)]
enum Body {
    Text(String),
    Empty,
    LoneCarriageReturn(String),
    LoneLineFeed(String),
}

impl Body {
    fn bytes(&self) -> Vec<u8> {
        let mut text = match self {
            Self::Text(text) => text.clone(),
            Self::Empty => String::new(),
            Self::LoneCarriageReturn(text) => format!("{text}\r{text}"),
            Self::LoneLineFeed(text) => format!("{text}\n{text}"),
        };
        // Embedded terminators would split the body; the codec is right to do so
        while text.contains("\r\n") {
            text = text.replace("\r\n", "");
        }
        text.into_bytes()
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    bodies: Vec<Body>,
    trailing: Vec<u8>,
    splits: Vec<u16>,
}

fn decode_all(codec: &mut FrameCodec, buffer: &mut BytesMut, chunk: &[u8], out: &mut Vec<Frame>) {
    let mut next = codec.feed(buffer, chunk);
    while let Ok(Some(frame)) = next {
        out.push(frame);
        next = codec.next_frame(buffer);
    }
}

fuzz_target!(|input: Input| {
    let trailing: Vec<u8> = input.trailing.iter().copied().filter(|b| *b != b'\n').collect();

    let mut wire = Vec::new();
    let mut expected = Vec::new();
    for body in &input.bodies {
        let bytes = body.bytes();
        // A body ending in \r would fuse with the terminator
        if bytes.last() == Some(&b'\r') {
            continue;
        }
        wire.extend_from_slice(&bytes);
        wire.extend_from_slice(b"\r\n");
        expected.push(Frame::new(bytes));
    }
    wire.extend_from_slice(&trailing);

    let mut codec = FrameCodec::new();
    let mut buffer = BytesMut::new();
    let mut frames = Vec::new();

    let mut offset = 0usize;
    for split in &input.splits {
        let end = (offset + *split as usize).min(wire.len());
        decode_all(&mut codec, &mut buffer, &wire[offset..end], &mut frames);
        offset = end;
    }
    decode_all(&mut codec, &mut buffer, &wire[offset..], &mut frames);

    assert_eq!(frames, expected);
    assert_eq!(&buffer[..], &trailing[..]);
});
