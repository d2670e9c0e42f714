//! Property-based tests for the connection state machine
//!
//! Simulates the event loop against a single connection with arbitrary read
//! chunking and arbitrary write completion timing, and checks that requests
//! are answered exactly once, in arrival order, one at a time.

use std::{net::SocketAddr, time::Instant};

use bytes::Bytes;
use proptest::prelude::*;
use proton_core::{Connection, ConnectionState};
use proton_proto::{FrameCodec, TERMINATOR};

/// Encoded request bodies `{"n":<i>}` for i in 0..count
fn wire_for(count: usize) -> Vec<u8> {
    let mut wire = Vec::new();
    for i in 0..count {
        wire.extend_from_slice(format!("{{\"n\":{i}}}\r\n").as_bytes());
    }
    wire
}

/// Drive a connection the way the server loop does
///
/// `chunks` cuts the wire into reads; `delays[i]` says how many reads happen
/// before the in-flight write completes.
fn simulate(count: usize, cuts: &[usize], delays: &[u8]) -> Vec<String> {
    let t0 = Instant::now();
    let mut conn: Connection<Instant> =
        Connection::new(SocketAddr::from(([127, 0, 0, 1], 1)), t0);
    conn.complete_handshake(Some("proton"), "proton").expect("handshake");

    let wire = wire_for(count);
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (wire.len() + 1)).collect();
    points.extend([0, wire.len()]);
    points.sort_unstable();
    points.dedup();

    let mut written = Vec::new();
    let mut in_flight: Option<(Bytes, u8)> = None;
    let mut delay_iter = delays.iter().copied().cycle();

    let mut step = |conn: &mut Connection<Instant>,
                    in_flight: &mut Option<(Bytes, u8)>,
                    written: &mut Vec<String>| {
        // Writer side: complete or age the in-flight write
        if let Some((bytes, remaining)) = in_flight.take() {
            if remaining == 0 {
                written.push(String::from_utf8_lossy(&bytes).into_owned());
                conn.write_completed();
            } else {
                *in_flight = Some((bytes, remaining - 1));
            }
        }

        // Loop side: dispatch at most one frame, then flush
        if let Some(frame) = conn.next_frame().expect("frame") {
            let body = String::from_utf8_lossy(frame.body()).into_owned();
            conn.enqueue(Bytes::from(format!("re:{body}"))).expect("enqueue");
        }

        if in_flight.is_none() {
            if let Some(bytes) = conn.pop_outbound() {
                *in_flight = Some((bytes, delay_iter.next().unwrap_or(0) % 3));
            }
        }
    };

    for window in points.windows(2) {
        conn.receive(&wire[window[0]..window[1]]).expect("receive");
        step(&mut conn, &mut in_flight, &mut written);
    }

    // Drain: no more input, keep servicing writes
    let mut guard = 0;
    let busy = |conn: &Connection<Instant>, in_flight: &Option<(Bytes, u8)>| {
        conn.has_pending_output() || conn.buffered() > 0 || in_flight.is_some()
    };
    while busy(&conn, &in_flight) && guard < 10_000 {
        step(&mut conn, &mut in_flight, &mut written);
        guard += 1;
    }

    assert_eq!(conn.state(), ConnectionState::Idle);
    assert!(!conn.registered_for_write());
    written
}

#[test]
fn prop_responses_in_arrival_order() {
    proptest!(|(
        count in 1usize..12,
        cuts in prop::collection::vec(any::<usize>(), 0..16),
        delays in prop::collection::vec(any::<u8>(), 1..8),
    )| {
        let written = simulate(count, &cuts, &delays);

        // PROPERTY: Every request answered exactly once, in order
        let expected: Vec<String> = (0..count).map(|i| format!("re:{{\"n\":{i}}}")).collect();
        prop_assert_eq!(written, expected);
    });
}

#[test]
fn prop_accumulator_never_exceeds_limit() {
    proptest!(|(
        max in 4usize..64,
        chunks in prop::collection::vec(1usize..32, 1..20),
        stall in any::<bool>(),
    )| {
        let peer = SocketAddr::from(([127, 0, 0, 1], 1));
        let codec = FrameCodec::with_max_frame_size(max);
        let mut conn: Connection<Instant> = Connection::with_codec(peer, Instant::now(), codec);
        conn.complete_handshake(Some("proton"), "proton").expect("handshake");

        if stall {
            // One request answered but never written back
            conn.receive(b"{}\r\n").expect("receive");
            conn.next_frame().expect("frame").expect("complete frame");
            conn.enqueue(Bytes::from_static(b"r\r\n")).expect("enqueue");
        }

        let limit = max + TERMINATOR.len();
        let mut total = 0;
        for len in chunks {
            let result = conn.receive(&vec![b'x'; len]);
            total += len;

            // PROPERTY: Input past the limit closes the connection, never buffers
            if total > limit {
                prop_assert!(result.is_err());
                prop_assert_eq!(conn.state(), ConnectionState::Closed);
                prop_assert_eq!(conn.buffered(), 0);
                break;
            }
            prop_assert!(result.is_ok());
            prop_assert!(conn.buffered() <= limit);
            if !stall {
                prop_assert!(conn.next_frame().is_ok());
            }
        }
    });
}
