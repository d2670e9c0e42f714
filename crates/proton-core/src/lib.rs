//! Proton protocol core.
//!
//! Pure, I/O-free building blocks shared by the server runtime and its tests:
//!
//! - [`Connection`]: per-socket state machine owning the inbound accumulator,
//!   the outbound FIFO and the session token bound to the socket
//! - [`Environment`]: time and randomness, injected so tests control both
//!
//! Nothing here touches a socket. Callers feed bytes in and drain bytes out.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;

pub use connection::{Connection, ConnectionState};
pub use env::Environment;
pub use error::ConnectionError;
