//! Proton wire protocol.
//!
//! Every message, in both directions, is a UTF-8 JSON object followed by the
//! two-byte terminator `\r\n`. There is no length prefix: the terminator alone
//! delimits frames. JSON string escaping guarantees that a well-formed object
//! never contains a raw `\r\n` outside of its terminator.
//!
//! # Layers
//!
//! - [`FrameCodec`]: incremental byte scanning, turns a byte stream into
//!   [`Frame`]s and back
//! - [`Request`]: client → server envelope (`action`, `params`, `opts`) with
//!   per-action structural validation
//! - [`Response`]: server → client envelope (`status`, `message`, `data`)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
mod frame;
mod request;
mod response;

pub use errors::{ProtocolError, Result};
pub use frame::{Frame, FrameCodec};
pub use request::{Action, Params, Request};
pub use response::{Record, Response, Status};

/// Frame terminator appended to every JSON object on the wire.
pub const TERMINATOR: &[u8; 2] = b"\r\n";

/// Largest frame body (excluding terminator) a peer may send: 16 MiB.
///
/// A buffer that grows past this without a terminator is a protocol violation.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Human-readable messages carried in [`Response::message`].
pub mod messages {
    /// Frame was not valid JSON or violated the request structure.
    pub const SYNTAX_ERROR: &str = "SYNTAX ERROR";
    /// Unexpected internal failure.
    pub const SERVER_ERROR: &str = "SERVER ERROR";
    /// Gated action without a valid session token.
    pub const PERMISSION_DENIED: &str = "Permission denied. Authorization required.";
    /// `register` with a username that is already taken.
    pub const USER_EXISTS: &str = "Given user already exists.";
    /// `login` with an unknown username or wrong password.
    pub const INVALID_CREDENTIALS: &str = "Incorrect username or/and password.";
    /// Record addressed by id does not exist.
    pub const NOT_FOUND: &str = "Not Found.";
    /// Confirmation attached to a successful `create`.
    pub const POST_CREATED: &str = "Post created successfully.";
}
