//! Proton production server.
//!
//! Production server implementation using rustls for mutually-authenticated
//! TLS, Tokio for async runtime, and system time with cryptographic RNG.
//!
//! # Architecture
//!
//! This crate provides production "glue" that wraps the action-based
//! [`ServerDriver`] with real I/O. The driver follows the Sans-IO pattern:
//! events in, actions out, no awaiting. [`Server`] executes those actions
//! using Tokio tasks.
//!
//! One event-loop task exclusively owns the driver (and with it every
//! connection's state, the session manager and storage). Accept, handshake,
//! read and write happen in their own tasks and talk to the loop over
//! channels, so a slow client never stalls another.
//!
//! # Components
//!
//! - [`ServerDriver`]: Action-based orchestrator (pure logic, no I/O)
//! - [`RequestDispatcher`]: Action table (register, login, logout, CRUD)
//! - [`SessionManager`]: Token issue, validation and revocation
//! - [`Server`]: Production runtime that executes `ServerDriver` actions
//! - [`TlsTransport`]: TCP listener plus rustls mTLS acceptor
//! - [`SystemEnv`]: Production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dispatcher;
mod driver;
mod error;
mod executor;
mod registry;
pub mod schema;
mod server_error;
pub mod session;
pub mod storage;
mod system_env;
#[cfg(test)]
mod test_support;
pub mod transport;

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

pub use dispatcher::{DispatchError, Dispatched, RequestDispatcher, SessionChange};
pub use driver::{
    DEFAULT_PEER_IDENTITY, LogLevel, ServerAction, ServerConfig as DriverConfig, ServerDriver,
    ServerEvent,
};
pub use error::ServerError;
pub use executor::ConnectionHandle;
use proton_crypto::PasswordCipher;
pub use registry::ConnectionRegistry;
pub use server_error::{ExecutorError, ServerError as DriverError};
pub use session::{DEFAULT_TOKEN_TTL, SessionError, SessionManager};
pub use storage::{ChaoticStorage, MemoryStorage, RedbStorage, Storage, StorageError};
pub use system_env::SystemEnv;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_rustls::{TlsAcceptor, server::TlsStream};
pub use transport::{TlsError, TlsTransport};

/// Depth of the channel feeding the event loop.
///
/// Readers block once it is full, which throttles fast clients.
const EVENT_QUEUE_DEPTH: usize = 1024;

/// A connection that passed the TLS handshake, on its way to the loop.
struct Handshaken {
    connection_id: u64,
    peer: SocketAddr,
    identity: Option<String>,
    stream: TlsStream<TcpStream>,
}

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "127.0.0.1:6666")
    pub bind_address: String,
    /// Path to the server certificate chain (PEM format)
    pub cert_path: String,
    /// Path to the server private key (PEM format)
    pub key_path: String,
    /// Path to the CA bundle client certificates must chain to (PEM format)
    pub client_ca_path: String,
    /// Secret the password-cipher key is derived from
    pub secret_key: String,
    /// Salt for the password-cipher key derivation
    pub salt: String,
    /// Driver configuration (limits, identity, token lifetime)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:6666".to_string(),
            cert_path: "server.pem".to_string(),
            key_path: "server.key".to_string(),
            client_ca_path: "client.pem".to_string(),
            secret_key: "SECRET_KEY".to_string(),
            salt: "SALT".to_string(),
            driver: DriverConfig::default(),
        }
    }
}

/// Production Proton server.
///
/// Wraps `ServerDriver` with the mTLS transport and system environment.
pub struct Server<S = MemoryStorage>
where
    S: Storage,
{
    /// The action-based server driver
    driver: ServerDriver<SystemEnv, S>,
    /// TLS listener
    transport: TlsTransport,
}

impl<S> Server<S>
where
    S: Storage,
{
    /// Create and bind a new server.
    ///
    /// Loads the certificates, derives the password cipher and binds the
    /// listening socket.
    pub async fn bind(config: ServerRuntimeConfig, storage: S) -> Result<Self, ServerError> {
        let acceptor =
            transport::load_acceptor(&config.cert_path, &config.key_path, &config.client_ca_path)?;

        Self::bind_with_acceptor(config, storage, acceptor).await
    }

    /// Create and bind a new server with an already-built acceptor.
    ///
    /// The PEM paths in `config` are ignored.
    pub async fn bind_with_acceptor(
        config: ServerRuntimeConfig,
        storage: S,
        acceptor: TlsAcceptor,
    ) -> Result<Self, ServerError> {
        let cipher =
            PasswordCipher::from_secret(config.secret_key.as_bytes(), config.salt.as_bytes())
                .map_err(|e| ServerError::Config(e.to_string()))?;

        let driver = ServerDriver::new(SystemEnv::new(), storage, cipher, config.driver);
        let transport = TlsTransport::bind(&config.bind_address, acceptor).await?;

        Ok(Self { driver, transport })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Run the server, accepting connections and servicing requests.
    ///
    /// Runs until an unattributable driver error occurs. Every connection
    /// with an unanswered request gets `SERVER ERROR` first.
    pub async fn run(self) -> Result<(), ServerError> {
        let Self { mut driver, transport } = self;
        tracing::info!("Server starting on {}", transport.local_addr()?);

        let (handshaken_tx, mut handshaken_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let acceptor = tokio::spawn(accept_loop(transport, handshaken_tx));

        let mut handles: HashMap<u64, ConnectionHandle> = HashMap::new();

        let result = loop {
            let event = tokio::select! {
                Some(accepted) = handshaken_rx.recv() => {
                    let Handshaken { connection_id, peer, identity, stream } = accepted;
                    let handle = ConnectionHandle::spawn(connection_id, stream, events_tx.clone());
                    handles.insert(connection_id, handle);
                    ServerEvent::ConnectionAccepted { connection_id, peer, identity }
                },
                Some(event) = events_rx.recv() => event,
                else => break Err(ServerError::Internal("event channels closed".to_string())),
            };

            let actions = match driver.process_event(event) {
                Ok(actions) => actions,
                Err(e) => match e.connection_id() {
                    Some(connection_id) => driver.fail_connection(connection_id, &e),
                    None => {
                        let actions = driver.abort_all(&e.to_string());
                        executor::execute_actions(actions, &mut handles);
                        break Err(ServerError::Driver(e));
                    },
                },
            };
            executor::execute_actions(actions, &mut handles);
        };

        acceptor.abort();
        result
    }
}

/// Accept sockets forever, handing each to its own handshake task.
async fn accept_loop(transport: TlsTransport, handshaken: mpsc::Sender<Handshaken>) {
    let next_id = AtomicU64::new(1);

    loop {
        match transport.accept().await {
            Ok((stream, peer)) => {
                let connection_id = next_id.fetch_add(1, Ordering::Relaxed);
                let acceptor = transport.acceptor();
                let handshaken = handshaken.clone();
                tokio::spawn(async move {
                    handshake(connection_id, peer, stream, &acceptor, &handshaken).await;
                });
            },
            Err(e) => {
                tracing::error!("Accept error: {}", e);
            },
        }
    }
}

/// Run the TLS handshake and pass the connection to the loop.
///
/// Failed handshakes (no client certificate, untrusted chain) end here,
/// before the driver ever sees the connection.
async fn handshake(
    connection_id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    acceptor: &TlsAcceptor,
    handshaken: &mpsc::Sender<Handshaken>,
) {
    match transport::handshake(acceptor, stream).await {
        Ok((stream, identity)) => {
            let accepted = Handshaken { connection_id, peer, identity, stream };
            if handshaken.send(accepted).await.is_err() {
                tracing::debug!("Event loop gone, dropping connection {}", connection_id);
            }
        },
        Err(e) => {
            tracing::warn!("Connection {} from {} rejected: {}", connection_id, peer, e);
        },
    }
}
