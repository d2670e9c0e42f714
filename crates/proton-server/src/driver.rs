//! Server driver.
//!
//! Ties together connection state machines, the ConnectionRegistry arena,
//! the RequestDispatcher and storage. Pure: the runtime feeds [`ServerEvent`]s
//! in and executes the [`ServerAction`]s that come out. Nothing here awaits.
//!
//! Readable maps to [`ServerEvent::BytesReceived`], writable to
//! [`ServerEvent::WriteCompleted`]. Each connection has at most one
//! [`ServerAction::SendToConnection`] outstanding; the next one is emitted only
//! after the runtime reports the previous write complete.

use std::{net::SocketAddr, time::Duration};

use bytes::Bytes;
use proton_core::{Connection, ConnectionError, ConnectionState, Environment};
use proton_crypto::PasswordCipher;
use proton_proto::{FrameCodec, MAX_FRAME_SIZE, Request, Response, Status};

use crate::{
    dispatcher::{DispatchError, RequestDispatcher, SessionChange},
    registry::ConnectionRegistry,
    server_error::ServerError,
    session::{DEFAULT_TOKEN_TTL, SessionManager},
    storage::Storage,
};

/// Certificate common name clients must present by default.
pub const DEFAULT_PEER_IDENTITY: &str = "proton";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// Common name the client certificate must carry
    pub expected_identity: String,
    /// Session token lifetime
    pub token_ttl: Duration,
    /// Largest accepted request frame
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 10_000,
            expected_identity: DEFAULT_PEER_IDENTITY.to_string(),
            token_ttl: DEFAULT_TOKEN_TTL,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

/// Events that the server driver processes.
///
/// These are produced by the external runtime (production or tests).
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// TLS handshake finished on a new socket
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        connection_id: u64,
        /// Remote address
        peer: SocketAddr,
        /// Common name of the verified client certificate
        identity: Option<String>,
    },

    /// Bytes were read from a connection
    BytesReceived {
        /// Connection that sent the bytes
        connection_id: u64,
        /// Raw bytes, any chunking
        bytes: Bytes,
    },

    /// The last `SendToConnection` for this connection was fully written
    WriteCompleted {
        /// Connection whose write finished
        connection_id: u64,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        connection_id: u64,
        /// Reason for closure
        reason: String,
    },
}

/// Actions that the server driver produces.
///
/// These are executed by runtime-specific code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Write these bytes to a connection, then report `WriteCompleted`
    SendToConnection {
        /// Target connection ID
        connection_id: u64,
        /// One encoded response, terminator included
        bytes: Bytes,
    },

    /// Close a connection
    CloseConnection {
        /// Connection to close
        connection_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
        /// When the event occurred (Unix seconds)
        timestamp: u64,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

/// Action-based server driver.
///
/// Orchestrates connection lifecycle, request framing and dispatch.
pub struct ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Live connections
    registry: ConnectionRegistry<E::Instant>,
    /// Action table, sessions, password cipher
    dispatcher: RequestDispatcher,
    /// Storage backend
    storage: S,
    /// Environment (time, RNG)
    env: E,
    /// Server configuration
    config: ServerConfig,
}

impl<E, S> ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create a new server driver.
    pub fn new(env: E, storage: S, cipher: PasswordCipher, config: ServerConfig) -> Self {
        let sessions = SessionManager::new(config.token_ttl);

        Self {
            registry: ConnectionRegistry::new(),
            dispatcher: RequestDispatcher::new(cipher, sessions),
            storage,
            env,
            config,
        }
    }

    /// Process a server event and return actions to execute.
    ///
    /// This is the main entry point for the server driver.
    ///
    /// # Errors
    ///
    /// Errors with a [`ServerError::connection_id`] concern that connection
    /// only; pass them to [`ServerDriver::fail_connection`]. Errors without one
    /// are fatal for the loop.
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, ServerError> {
        match event {
            ServerEvent::ConnectionAccepted { connection_id, peer, identity } => {
                self.handle_connection_accepted(connection_id, peer, identity.as_deref())
            },
            ServerEvent::BytesReceived { connection_id, bytes } => {
                self.handle_bytes_received(connection_id, &bytes)
            },
            ServerEvent::WriteCompleted { connection_id } => {
                self.handle_write_completed(connection_id)
            },
            ServerEvent::ConnectionClosed { connection_id, reason } => {
                Ok(self.handle_connection_closed(connection_id, &reason))
            },
        }
    }

    /// Answer `SERVER ERROR` on a connection whose servicing failed.
    ///
    /// The connection stays open. If it is already gone, only logs.
    pub fn fail_connection(
        &mut self,
        connection_id: u64,
        error: &ServerError,
    ) -> Vec<ServerAction> {
        let mut actions =
            vec![self.log(LogLevel::Error, format!("connection {connection_id}: {error}"))];

        let Some(conn) = self.registry.get_mut(connection_id) else {
            return actions;
        };

        let queued = server_error_bytes().is_some_and(|bytes| conn.enqueue(bytes).is_ok());

        if queued {
            actions.extend(self.flush(connection_id));
        } else {
            self.registry.remove(connection_id);
            actions.push(ServerAction::CloseConnection {
                connection_id,
                reason: error.to_string(),
            });
        }

        actions
    }

    /// Last-resort shutdown.
    ///
    /// Every connection with a pending response gets `SERVER ERROR` written
    /// directly (bypassing its queue), then every connection is closed and the
    /// registry emptied.
    pub fn abort_all(&mut self, reason: &str) -> Vec<ServerAction> {
        let mut actions =
            vec![self.log(LogLevel::Error, format!("aborting all connections: {reason}"))];

        if let Some(bytes) = server_error_bytes() {
            for connection_id in self.registry.with_pending_output() {
                let bytes = bytes.clone();
                actions.push(ServerAction::SendToConnection { connection_id, bytes });
            }
        }

        for connection_id in self.registry.ids() {
            if let Some(mut conn) = self.registry.remove(connection_id) {
                conn.close();
            }
            actions.push(ServerAction::CloseConnection {
                connection_id,
                reason: reason.to_string(),
            });
        }

        actions
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Connection state by id.
    pub fn connection(&self, connection_id: u64) -> Option<&Connection<E::Instant>> {
        self.registry.get(connection_id)
    }

    /// Connection arena.
    pub fn registry(&self) -> &ConnectionRegistry<E::Instant> {
        &self.registry
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Driver configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle a new connection being accepted.
    fn handle_connection_accepted(
        &mut self,
        connection_id: u64,
        peer: SocketAddr,
        identity: Option<&str>,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let now = self.env.now();

        if self.registry.contains(connection_id) {
            return Err(ServerError::ConnectionAlreadyExists(connection_id));
        }

        if self.registry.len() >= self.config.max_connections {
            return Ok(vec![
                ServerAction::CloseConnection {
                    connection_id,
                    reason: "max connections exceeded".to_string(),
                },
                self.log(LogLevel::Warn, format!("rejected {peer}: max connections exceeded")),
            ]);
        }

        let codec = FrameCodec::with_max_frame_size(self.config.max_frame_size);
        let mut conn = Connection::with_codec(peer, now, codec);

        if let Err(err) = conn.complete_handshake(identity, &self.config.expected_identity) {
            return Ok(vec![
                ServerAction::CloseConnection { connection_id, reason: err.to_string() },
                self.log(LogLevel::Warn, format!("rejected {peer}: {err}")),
            ]);
        }

        self.registry.insert(connection_id, conn);

        Ok(vec![self.log(
            LogLevel::Info,
            format!("connection {connection_id} accepted from {peer}"),
        )])
    }

    /// Handle bytes read from a connection.
    fn handle_bytes_received(
        &mut self,
        connection_id: u64,
        bytes: &[u8],
    ) -> Result<Vec<ServerAction>, ServerError> {
        let Some(conn) = self.registry.get_mut(connection_id) else {
            return Ok(vec![self.stale(connection_id, "bytes received")]);
        };

        if let Err(err) = conn.receive(bytes) {
            if conn.state() == ConnectionState::Closed {
                return Ok(self.drop_connection(connection_id, &err));
            }
            return Err(ServerError::ConnectionFailed { connection_id, reason: err.to_string() });
        }

        self.pump(connection_id)
    }

    /// Handle the runtime finishing a write.
    fn handle_write_completed(
        &mut self,
        connection_id: u64,
    ) -> Result<Vec<ServerAction>, ServerError> {
        let Some(conn) = self.registry.get_mut(connection_id) else {
            return Ok(vec![self.stale(connection_id, "write completed")]);
        };

        conn.write_completed();

        self.pump(connection_id)
    }

    /// Handle a connection being closed.
    ///
    /// The peer hung up or a socket task failed. The runtime still holds the
    /// connection's IO tasks, so this emits `CloseConnection` to release them.
    fn handle_connection_closed(&mut self, connection_id: u64, reason: &str) -> Vec<ServerAction> {
        let Some(mut conn) = self.registry.remove(connection_id) else {
            return vec![self.stale(connection_id, "connection closed")];
        };

        let peer = conn.peer();
        let age = conn.age(self.env.now()).as_secs();
        let discarded = conn.close();

        let mut actions =
            vec![ServerAction::CloseConnection { connection_id, reason: reason.to_string() }];
        if discarded > 0 {
            actions.push(self.log(
                LogLevel::Debug,
                format!("connection {connection_id} discarded {discarded} unwritten responses"),
            ));
        }
        actions.push(self.log(
            LogLevel::Info,
            format!("connection {connection_id} ({peer}) closed after {age}s: {reason}"),
        ));
        actions
    }

    /// Forget a connection its state machine already closed.
    fn drop_connection(&mut self, connection_id: u64, err: &ConnectionError) -> Vec<ServerAction> {
        let peer = self.registry.remove(connection_id).map(|conn| conn.peer());

        let mut actions =
            vec![ServerAction::CloseConnection { connection_id, reason: err.to_string() }];
        if let Some(peer) = peer {
            actions.push(self.log(LogLevel::Warn, format!("closing {peer}: {err}")));
        }
        actions
    }

    /// Dispatch at most one buffered frame, then flush.
    fn pump(&mut self, connection_id: u64) -> Result<Vec<ServerAction>, ServerError> {
        let mut actions = Vec::new();

        let Some(conn) = self.registry.get_mut(connection_id) else {
            return Ok(actions);
        };

        let frame = match conn.next_frame() {
            Ok(frame) => frame,
            // Oversized frame: the connection is already closed
            Err(err) => return Ok(self.drop_connection(connection_id, &err)),
        };

        if let Some(frame) = frame {
            let peer = conn.peer();

            let (response, label, detail) = match Request::decode(&frame) {
                Ok(request) => {
                    let dispatched =
                        self.dispatcher.dispatch(&self.env, &self.storage, conn.token(), &request);

                    match dispatched.session {
                        SessionChange::Unchanged => {},
                        SessionChange::Bind(token) => conn.set_token(token),
                        SessionChange::Clear => {
                            conn.clear_token();
                        },
                    }

                    let internal =
                        dispatched.error.as_ref().is_some_and(DispatchError::is_internal);
                    let detail = dispatched.error.map(|e| (e.to_string(), internal));
                    (dispatched.response, request.action.as_str(), detail)
                },
                Err(err) => (Response::syntax_error(), "invalid", Some((err.to_string(), false))),
            };

            let encoded = response.encode().map_err(|e| ServerError::Protocol {
                connection_id,
                reason: e.to_string(),
            })?;

            conn.enqueue(encoded.to_bytes()).map_err(|e: ConnectionError| {
                ServerError::ConnectionFailed { connection_id, reason: e.to_string() }
            })?;

            actions.push(self.response_log(connection_id, peer, label, &response, detail));
        }

        actions.extend(self.flush(connection_id));
        Ok(actions)
    }

    /// Hand the oldest queued response to the runtime if none is in flight.
    fn flush(&mut self, connection_id: u64) -> Vec<ServerAction> {
        let Some(conn) = self.registry.get_mut(connection_id) else {
            return Vec::new();
        };

        if !conn.registered_for_write() {
            return Vec::new();
        }

        match conn.pop_outbound() {
            Some(bytes) => vec![ServerAction::SendToConnection { connection_id, bytes }],
            None => Vec::new(),
        }
    }

    fn response_log(
        &self,
        connection_id: u64,
        peer: SocketAddr,
        action: &str,
        response: &Response,
        detail: Option<(String, bool)>,
    ) -> ServerAction {
        let level = match (&detail, response.status) {
            (Some((_, true)), _) => LogLevel::Error,
            (_, Status::Ok) => LogLevel::Info,
            (_, Status::Error | Status::Wrong) => LogLevel::Warn,
        };

        let status = response.status;
        let mut message = format!("connection {connection_id} ({peer}) {action} -> {status}");
        if let Some(text) = &response.message {
            message.push_str(&format!(" \"{text}\""));
        }
        if let Some((reason, _)) = detail {
            message.push_str(&format!(" [{reason}]"));
        }

        self.log(level, message)
    }

    fn stale(&self, connection_id: u64, event: &str) -> ServerAction {
        self.log(LogLevel::Debug, format!("{event} for unknown connection {connection_id}"))
    }

    fn log(&self, level: LogLevel, message: String) -> ServerAction {
        ServerAction::Log { level, message, timestamp: self.env.wall_clock_secs() }
    }
}

/// Encoded `SERVER ERROR` response.
fn server_error_bytes() -> Option<Bytes> {
    Response::server_error().encode().ok().map(|frame| frame.to_bytes())
}
