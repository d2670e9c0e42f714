//! Property-based tests for frame reassembly and request encoding.
//!
//! The codec must produce the same frames no matter how the byte stream is
//! chunked, and any valid request must survive encode → frame → decode.

use bytes::BytesMut;
use proptest::prelude::*;
use proton_proto::{Action, Frame, FrameCodec, Params, Request, TERMINATOR};
use serde_json::Value;

fn arbitrary_action() -> impl Strategy<Value = Action> {
    prop::sample::select(Action::ALL.to_vec())
}

/// Scalar JSON values, including strings with characters that need escaping
fn arbitrary_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<u32>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 \r\n\t\"\\\\]{0,24}".prop_map(Value::from),
    ]
}

fn arbitrary_map() -> impl Strategy<Value = Params> {
    prop::collection::btree_map("[a-z_]{1,8}", arbitrary_scalar(), 0..6)
        .prop_map(|entries| entries.into_iter().collect())
}

/// Requests that satisfy their action's required-params contract
fn arbitrary_request() -> impl Strategy<Value = Request> {
    (arbitrary_action(), arbitrary_map(), prop::option::of(arbitrary_map()), any::<bool>())
        .prop_map(|(action, mut params, opts, omit_params)| {
            for key in action.required_params() {
                params.entry((*key).to_string()).or_insert_with(|| Value::from("x"));
            }

            let omit = omit_params && action.required_params().is_empty();
            let params = if omit { None } else { Some(params) };

            Request { action, params, opts }
        })
}

/// Feed `wire` to a fresh codec in chunks cut at `cuts` and collect frames
fn reassemble(wire: &[u8], cuts: &[usize]) -> Vec<Frame> {
    let mut codec = FrameCodec::new();
    let mut buffer = BytesMut::new();
    let mut frames = Vec::new();

    let mut points: Vec<usize> = cuts.iter().map(|c| c % (wire.len() + 1)).collect();
    points.push(0);
    points.push(wire.len());
    points.sort_unstable();
    points.dedup();

    for window in points.windows(2) {
        let chunk = &wire[window[0]..window[1]];
        let mut next = codec.feed(&mut buffer, chunk).expect("feed should succeed");
        while let Some(frame) = next {
            frames.push(frame);
            next = codec.next_frame(&mut buffer).expect("next_frame should succeed");
        }
    }

    assert!(buffer.is_empty(), "no bytes should remain after the final terminator");
    frames
}

#[test]
fn prop_request_roundtrip() {
    proptest!(|(request in arbitrary_request())| {
        let frame = request.encode().expect("encode should succeed");

        // PROPERTY: Encoded body never contains the terminator
        prop_assert!(!frame.body().windows(2).any(|w| w == TERMINATOR));

        let decoded = Request::decode(&frame).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded, request);
    });
}

#[test]
fn prop_chunking_does_not_change_frames() {
    proptest!(|(
        requests in prop::collection::vec(arbitrary_request(), 1..6),
        cuts in prop::collection::vec(any::<usize>(), 0..12),
    )| {
        let frames: Vec<Frame> =
            requests.iter().map(|r| r.encode().expect("encode should succeed")).collect();

        let mut wire = Vec::new();
        for frame in &frames {
            wire.extend_from_slice(&frame.to_bytes());
        }

        let reassembled = reassemble(&wire, &cuts);

        // PROPERTY: Same frames in the same order regardless of chunk boundaries
        prop_assert_eq!(reassembled, frames);
    });
}

#[test]
fn prop_split_terminator_yields_one_frame() {
    proptest!(|(request in arbitrary_request())| {
        let frame = request.encode().expect("encode should succeed");
        let wire = frame.to_bytes();
        let split = wire.len() - 1;

        let mut codec = FrameCodec::new();
        let mut buffer = BytesMut::new();

        // PROPERTY: `...\r` alone is not a frame, the following `\n` completes exactly one
        prop_assert_eq!(codec.feed(&mut buffer, &wire[..split]).expect("feed"), None);
        prop_assert_eq!(codec.feed(&mut buffer, &wire[split..]).expect("feed"), Some(frame));
        prop_assert_eq!(codec.next_frame(&mut buffer).expect("next_frame"), None);
    });
}

#[test]
fn prop_arbitrary_bytes_never_panic() {
    proptest!(|(chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 0..8))| {
        let mut codec = FrameCodec::with_max_frame_size(128);
        let mut buffer = BytesMut::new();

        for chunk in &chunks {
            match codec.feed(&mut buffer, chunk) {
                Ok(Some(frame)) => {
                    // Decode may fail, but must not panic
                    let _ = Request::decode(&frame);
                },
                Ok(None) => {},
                Err(_) => break,
            }
        }
    });
}
