//! Fuzz target for Request::decode
//!
//! Harden request validation against hostile JSON (HIGH priority)
//!
//! # Strategy
//!
//! - Random bytes: arbitrary frame bodies (general malformation)
//! - Structured: valid envelope with arbitrary action names and param values
//!
//! # Invariants
//!
//! - Invalid input returns a structured, recoverable error
//! - Every accepted request carries its action's required params
//! - Accepted requests re-encode to a body that decodes to the same request
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use proton_proto::{Frame, Request};

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    RandomBytes(Vec<u8>),
    Envelope { action: String, keys: Vec<String>, number: Option<u64>, text: Option<String> },
}

fn body(input: &Input) -> Vec<u8> {
    match input {
        Input::RandomBytes(bytes) => bytes.clone(),
        Input::Envelope { action, keys, number, text } => {
            let params: Vec<String> = keys
                .iter()
                .enumerate()
                .map(|(i, key)| {
                    let value = match (i % 2, number, text) {
                        (0, Some(n), _) => n.to_string(),
                        (_, _, Some(t)) => format!("{t:?}"),
                        _ => "null".to_string(),
                    };
                    format!("{key:?}:{value}")
                })
                .collect();
            format!("{{\"action\":{action:?},\"params\":{{{}}}}}", params.join(",")).into_bytes()
        },
    }
}

fuzz_target!(|input: Input| {
    let frame = Frame::new(body(&input));

    match Request::decode(&frame) {
        Ok(request) => {
            for key in request.action.required_params() {
                assert!(request.param(key).is_some());
            }
            let reencoded = request.encode().expect("accepted request must encode");
            assert_eq!(Request::decode(&reencoded).ok(), Some(request));
        },
        Err(err) => assert!(err.is_recoverable()),
    }
});
