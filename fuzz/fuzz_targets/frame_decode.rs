//! Fuzz target for FrameCodec::feed
//!
//! This fuzzer feeds arbitrary byte sequences to the frame codec to find:
//! - Parser crashes or panics
//! - Off-by-one errors around the terminator
//! - Frames that still contain a terminator
//!
//! The fuzzer should NEVER panic. Oversized input must return an error.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use proton_proto::{FrameCodec, TERMINATOR};

fuzz_target!(|data: &[u8]| {
    let mut codec = FrameCodec::with_max_frame_size(4096);
    let mut buffer = BytesMut::new();

    let mut next = codec.feed(&mut buffer, data);
    while let Ok(Some(frame)) = next {
        assert!(!frame.body().windows(TERMINATOR.len()).any(|w| w == TERMINATOR));
        assert!(frame.len() <= 4096);
        next = codec.next_frame(&mut buffer);
    }
});
