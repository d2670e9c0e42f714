//! Per-socket connection state machine.
//!
//! Owns everything the event loop knows about one accepted socket: the inbound
//! byte accumulator, the outbound FIFO, the write-interest flag and the session
//! token bound to the socket after `login`. Pure: no I/O, time is passed in.
//!
//! # State Machine
//!
//! ```text
//! ┌─────────────┐ identity ok ┌──────┐ bytes  ┌─────────┐
//! │ Handshaking │────────────>│ Idle │───────>│ Framing │
//! └─────────────┘             └──────┘        └─────────┘
//!        │                      ^                  │ frame complete
//!        │ identity bad         │ queue drained    ↓
//!        ↓                 ┌──────────┐ enqueue ┌─────────────┐
//!   ┌────────┐             │ Writable │<────────│ Dispatching │
//!   │ Closed │             └──────────┘         └─────────────┘
//!   └────────┘
//! ```
//!
//! Any state moves to `Closed` on peer EOF, I/O error, oversized frame or
//! shutdown.
//!
//! The accumulator never holds more than one maximum-size frame plus its
//! terminator, whatever the state. A peer that keeps sending while its
//! response sits unread is closed rather than buffered.
//!
//! # Ordering
//!
//! At most one frame is handed out between consecutive drains of the outbound
//! queue: [`Connection::next_frame`] yields nothing while a response is pending
//! or in flight. Response N is therefore fully written before request N+1 is
//! dispatched, and responses never interleave.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    ops::Sub,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use proton_proto::{Frame, FrameCodec, ProtocolError, TERMINATOR};

use crate::error::ConnectionError;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TLS established, peer identity not yet checked
    Handshaking,
    /// Ready for the next request, nothing buffered
    Idle,
    /// Partial frame buffered
    Framing,
    /// One frame handed to the dispatcher, response not yet queued
    Dispatching,
    /// Response queued or in flight
    Writable,
    /// Terminal
    Closed,
}

/// Connection state machine.
///
/// Generic over `Instant` so tests can drive a manual clock.
#[derive(Debug)]
pub struct Connection<I = Instant>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    peer: SocketAddr,
    /// Verified certificate identity, set once the handshake check passes
    identity: Option<String>,
    opened_at: I,
    read_buf: BytesMut,
    codec: FrameCodec,
    outbound: VecDeque<Bytes>,
    registered_for_write: bool,
    write_in_flight: bool,
    token: Option<String>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a connection in [`ConnectionState::Handshaking`].
    pub fn new(peer: SocketAddr, now: I) -> Self {
        Self::with_codec(peer, now, FrameCodec::new())
    }

    /// Create a connection with a custom frame codec (frame size limit).
    pub fn with_codec(peer: SocketAddr, now: I, codec: FrameCodec) -> Self {
        Self {
            state: ConnectionState::Handshaking,
            peer,
            identity: None,
            opened_at: now,
            read_buf: BytesMut::new(),
            codec,
            outbound: VecDeque::new(),
            registered_for_write: false,
            write_in_flight: false,
            token: None,
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Verified peer identity. `None` before the handshake check.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// How long the connection has been open.
    pub fn age(&self, now: I) -> Duration {
        now - self.opened_at
    }

    /// Whether the event loop should be watching this socket for writability.
    pub fn registered_for_write(&self) -> bool {
        self.registered_for_write
    }

    /// Whether a response is queued or currently being written.
    pub fn has_pending_output(&self) -> bool {
        self.write_in_flight || !self.outbound.is_empty()
    }

    /// Number of responses queued and not yet handed to the writer.
    pub fn queued(&self) -> usize {
        self.outbound.len()
    }

    /// Bytes received but not yet consumed as frames.
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    /// Session token bound to this socket.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Bind a session token after a successful login.
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    /// Unbind and return the session token.
    pub fn clear_token(&mut self) -> Option<String> {
        self.token.take()
    }

    /// Check the peer certificate identity.
    ///
    /// On mismatch the connection moves straight to `Closed`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if not in `Handshaking`
    /// - `ConnectionError::IdentityMissing` if the certificate had no identity
    /// - `ConnectionError::IdentityMismatch` if it differs from `expected`
    pub fn complete_handshake(
        &mut self,
        identity: Option<&str>,
        expected: &str,
    ) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Handshaking {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "complete_handshake".to_string(),
            });
        }

        let Some(identity) = identity else {
            self.close();
            return Err(ConnectionError::IdentityMissing);
        };

        if identity != expected {
            self.close();
            return Err(ConnectionError::IdentityMismatch {
                expected: expected.to_string(),
                actual: identity.to_string(),
            });
        }

        self.identity = Some(identity.to_string());
        self.state = ConnectionState::Idle;
        Ok(())
    }

    /// Append bytes read from the socket.
    ///
    /// Does not decode. Call [`Connection::next_frame`] afterwards.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if `Handshaking` or `Closed`
    /// - `ConnectionError::Protocol` if the accumulator would outgrow the
    ///   frame limit. The connection is closed.
    pub fn receive(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if matches!(self.state, ConnectionState::Handshaking | ConnectionState::Closed) {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "receive".to_string(),
            });
        }

        let size = self.read_buf.len() + bytes.len();
        let max = self.codec.max_frame_size();
        if size > max + TERMINATOR.len() {
            self.close();
            return Err(ProtocolError::FrameTooLarge { size, max }.into());
        }

        self.read_buf.extend_from_slice(bytes);

        if self.state == ConnectionState::Idle && !self.read_buf.is_empty() {
            self.state = ConnectionState::Framing;
        }

        Ok(())
    }

    /// Cut the next complete frame out of the accumulator.
    ///
    /// Returns `Ok(None)` when no complete frame is buffered, or while a
    /// previous request is still being dispatched or written.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Protocol` if the accumulator outgrew the frame
    ///   limit. The connection is closed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if !matches!(self.state, ConnectionState::Idle | ConnectionState::Framing) {
            return Ok(None);
        }

        match self.codec.next_frame(&mut self.read_buf) {
            Ok(Some(frame)) => {
                self.state = ConnectionState::Dispatching;
                Ok(Some(frame))
            },
            Ok(None) => {
                self.state = if self.read_buf.is_empty() {
                    ConnectionState::Idle
                } else {
                    ConnectionState::Framing
                };
                Ok(None)
            },
            Err(err) => {
                self.close();
                Err(err.into())
            },
        }
    }

    /// Queue an encoded response (terminator included).
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidState` if `Closed`
    pub fn enqueue(&mut self, bytes: Bytes) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::InvalidState {
                state: self.state,
                operation: "enqueue".to_string(),
            });
        }

        self.outbound.push_back(bytes);
        self.registered_for_write = true;

        if self.state == ConnectionState::Dispatching {
            self.state = ConnectionState::Writable;
        }

        Ok(())
    }

    /// Take the oldest queued response for writing.
    ///
    /// Returns `None` while a write is already in flight; writes are strictly
    /// one at a time. An empty queue clears write interest.
    pub fn pop_outbound(&mut self) -> Option<Bytes> {
        if self.write_in_flight {
            return None;
        }

        match self.outbound.pop_front() {
            Some(bytes) => {
                self.write_in_flight = true;
                Some(bytes)
            },
            None => {
                self.registered_for_write = false;
                None
            },
        }
    }

    /// Record that the in-flight write finished.
    ///
    /// Once the queue is drained, write interest is cleared and a `Writable`
    /// connection returns to `Idle`/`Framing`, ready for the next request.
    pub fn write_completed(&mut self) {
        self.write_in_flight = false;

        if !self.outbound.is_empty() {
            return;
        }

        self.registered_for_write = false;

        if self.state == ConnectionState::Writable {
            self.state = if self.read_buf.is_empty() {
                ConnectionState::Idle
            } else {
                ConnectionState::Framing
            };
        }
    }

    /// Mark the connection closed and free its buffers.
    ///
    /// Returns how many queued responses were discarded.
    pub fn close(&mut self) -> usize {
        let discarded = self.outbound.len();

        self.state = ConnectionState::Closed;
        self.outbound.clear();
        self.read_buf.clear();
        self.codec.reset();
        self.registered_for_write = false;
        self.write_in_flight = false;
        self.token = None;

        discarded
    }
}
