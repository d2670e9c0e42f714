//! Fuzz target for the full request pipeline
//!
//! Drives `ServerDriver` with arbitrary chunks and write completions
//! (HIGH priority)
//!
//! # Strategy
//!
//! - Bytes: valid requests, garbage lines, partial lines
//! - Writes: completions interleaved at arbitrary points
//! - Storage: `ChaoticStorage` with a fuzzer-chosen failure rate
//!
//! # Invariants
//!
//! - At most one response in flight per connection
//! - Every response is one terminated JSON object with a known status
//! - Storage failures never close the connection
//! - NEVER panic

#![no_main]

use std::net::SocketAddr;

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use proton_crypto::PasswordCipher;
use proton_proto::{Action, Frame, Request, Response};
use proton_server::{
    DriverConfig, ServerAction, ServerDriver, ServerEvent, SystemEnv,
    storage::{ChaoticStorage, MemoryStorage},
};

const CONNECTION: u64 = 1;

#[derive(Debug, Clone, Arbitrary)]
enum Step {
    Register { username: u8 },
    Login { username: u8 },
    Logout,
    Get { id: Option<u8> },
    Create { title: String },
    Delete { id: u8 },
    Garbage(Vec<u8>),
    Partial(Vec<u8>),
    WriteCompleted,
}

impl Step {
    fn credentials(action: Action, username: u8) -> Request {
        Request::new(action)
            .with_param("username", format!("u{username}"))
            .with_param("password", "p")
    }

    fn wire(&self) -> Option<Bytes> {
        let request = match self {
            Self::Register { username } => Self::credentials(Action::Register, *username),
            Self::Login { username } => Self::credentials(Action::Login, *username),
            Self::Logout => Request::new(Action::Logout),
            Self::Get { id: Some(id) } => Request::new(Action::Get).with_param("id", *id),
            Self::Get { id: None } => Request::new(Action::Get),
            Self::Create { title } => Request::new(Action::Create)
                .with_param("title", title.clone())
                .with_param("content", "c"),
            Self::Delete { id } => Request::new(Action::Delete).with_param("id", *id),
            Self::Garbage(bytes) => {
                let mut bytes: Vec<u8> = bytes.iter().copied().filter(|b| *b != b'\n').collect();
                bytes.extend_from_slice(b"\r\n");
                return Some(Bytes::from(bytes));
            },
            Self::Partial(bytes) => return Some(Bytes::from(bytes.clone())),
            Self::WriteCompleted => return None,
        };
        Some(request.encode().expect("request encodes").to_bytes())
    }
}

#[derive(Debug, Clone, Arbitrary)]
struct Input {
    failure_percent: u8,
    seed: u64,
    steps: Vec<Step>,
}

fuzz_target!(|input: Input| {
    let failure_rate = f64::from(input.failure_percent % 101) / 100.0;
    let storage = ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, input.seed);
    let cipher = PasswordCipher::from_secret(b"fuzz", b"salt").expect("cipher");
    let config = DriverConfig { max_frame_size: 64 * 1024, ..Default::default() };
    let mut driver = ServerDriver::new(SystemEnv::new(), storage, cipher, config);

    let accepted = driver.process_event(ServerEvent::ConnectionAccepted {
        connection_id: CONNECTION,
        peer: SocketAddr::from(([127, 0, 0, 1], 50000)),
        identity: Some("proton".to_string()),
    });
    assert!(accepted.is_ok());

    let mut in_flight = false;

    for step in input.steps {
        let event = match step.wire() {
            Some(bytes) => ServerEvent::BytesReceived { connection_id: CONNECTION, bytes },
            None => ServerEvent::WriteCompleted { connection_id: CONNECTION },
        };
        let completing = matches!(event, ServerEvent::WriteCompleted { .. });

        let actions = match driver.process_event(event) {
            Ok(actions) => actions,
            Err(err) => match err.connection_id() {
                Some(id) => driver.fail_connection(id, &err),
                None => return,
            },
        };

        if completing {
            in_flight = false;
        }

        for action in actions {
            match action {
                ServerAction::SendToConnection { bytes, .. } => {
                    assert!(!in_flight, "second response before write completed");
                    in_flight = true;
                    let body = bytes.strip_suffix(b"\r\n").expect("terminated response");
                    let response = Response::decode(&Frame::new(body.to_vec()));
                    assert!(response.is_ok(), "response must be valid JSON");
                },
                // Input past the frame limit legitimately closes the connection
                ServerAction::CloseConnection { .. } => return,
                ServerAction::Log { .. } => {},
            }
        }
    }
});
