//! TCP + rustls mutual-TLS transport.
//!
//! The listener accepts raw TCP sockets; the TLS handshake runs afterwards in
//! the per-connection task so a slow handshake never blocks accepting others.
//!
//! # Security
//!
//! Client certificates are mandatory and must chain to the configured client
//! CA bundle. Chain validation happens inside rustls; checking the verified
//! certificate's common name against the expected identity is the driver's
//! job, using [`peer_identity`].

use std::{fs, io, net::SocketAddr, path::Path, sync::Arc};

use rustls::{
    RootCertStore, ServerConfig,
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{TlsAcceptor, server::TlsStream};
use x509_parser::prelude::*;

use crate::error::ServerError;

/// Errors that can occur during TLS setup or handshake.
#[derive(Debug, Error)]
pub enum TlsError {
    /// PEM file could not be read
    #[error("failed to read '{path}': {source}")]
    Read {
        /// File path
        path: String,
        /// Underlying I/O error
        source: io::Error,
    },

    /// PEM content could not be parsed
    #[error("invalid PEM in '{path}': {reason}")]
    Pem {
        /// File path
        path: String,
        /// Parser message
        reason: String,
    },

    /// No certificate in a file that must contain one
    #[error("no certificates found in '{0}'")]
    NoCertificates(String),

    /// No private key in the key file
    #[error("no private key found in '{0}'")]
    NoPrivateKey(String),

    /// Certificate rejected by the root store
    #[error("invalid certificate: {0}")]
    InvalidCert(String),

    /// Client verifier could not be built
    #[error("failed to build verifier: {0}")]
    Verifier(String),

    /// Server config could not be built
    #[error("failed to build config: {0}")]
    Config(String),

    /// Handshake with a peer failed
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// Load server chain, key and client CA bundle from PEM files.
///
/// # Errors
///
/// Any unreadable or unparsable file, or a config rustls rejects.
pub fn load_acceptor(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
    client_ca_path: impl AsRef<Path>,
) -> Result<TlsAcceptor, TlsError> {
    let chain = read_certs(cert_path.as_ref())?;
    let key = read_key(key_path.as_ref())?;
    let client_roots = read_certs(client_ca_path.as_ref())?;

    build_acceptor(chain, key, client_roots)
}

/// Build an acceptor that requires client certificates chaining to
/// `client_roots`.
///
/// # Errors
///
/// Returns an error if a root is rejected or rustls refuses the key/chain.
pub fn build_acceptor(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_roots: Vec<CertificateDer<'static>>,
) -> Result<TlsAcceptor, TlsError> {
    let provider = crypto_provider();

    let mut roots = RootCertStore::empty();
    for root in client_roots {
        roots.add(root).map_err(|e| TlsError::InvalidCert(e.to_string()))?;
    }

    let verifier =
        WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
            .build()
            .map_err(|e| TlsError::Verifier(e.to_string()))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(|e| TlsError::Config(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Run the server side of the handshake.
///
/// Returns the stream and the common name of the verified client certificate.
///
/// # Errors
///
/// Returns `TlsError::Handshake` if the peer fails the handshake (including
/// presenting no certificate or one outside the client CA).
pub async fn handshake(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
) -> Result<(TlsStream<TcpStream>, Option<String>), TlsError> {
    let stream = acceptor.accept(stream).await.map_err(|e| TlsError::Handshake(e.to_string()))?;
    let identity = peer_identity(stream.get_ref().1);
    Ok((stream, identity))
}

/// Common name of the end-entity certificate the peer presented.
pub fn peer_identity(connection: &rustls::ServerConnection) -> Option<String> {
    connection.peer_certificates()?.first().and_then(|cert| common_name(cert.as_ref()))
}

/// First subject common name of a DER certificate.
pub fn common_name(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let cn = cert.subject().iter_common_name().next()?;
    cn.as_str().ok().map(str::to_string)
}

fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read { path: path.display().to_string(), source })
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let pem = read_pem(path)?;

    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Pem { path: path.display().to_string(), reason: e.to_string() })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }

    Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let pem = read_pem(path)?;

    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| TlsError::Pem { path: path.display().to_string(), reason: e.to_string() })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.display().to_string()))
}

/// TLS listener.
///
/// Owns the bound TCP socket and the acceptor used for every handshake.
pub struct TlsTransport {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl TlsTransport {
    /// Bind the listening socket.
    pub async fn bind(address: &str, acceptor: TlsAcceptor) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {addr}: {e}")))?;

        tracing::info!("TLS transport bound to {}", addr);

        Ok(Self { listener, acceptor })
    }

    /// Accept the next TCP connection. The handshake is not started.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ServerError> {
        self.listener
            .accept()
            .await
            .map_err(|e| ServerError::Transport(format!("accept failed: {e}")))
    }

    /// Acceptor for handshakes on accepted sockets.
    pub fn acceptor(&self) -> TlsAcceptor {
        self.acceptor.clone()
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }
}

/// Provider used for every config built here.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

#[cfg(test)]
mod tests {
    use rcgen::{
        BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    };
    use rustls::pki_types::PrivatePkcs8KeyDer;

    use super::*;

    fn self_signed(cn: &str, ca: bool) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, cn);
        if ca {
            params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        }
        let cert = params.self_signed(&key).unwrap();

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        (cert.der().clone(), key)
    }

    #[test]
    fn common_name_is_extracted() {
        let (cert, _) = self_signed("proton", false);
        assert_eq!(common_name(cert.as_ref()), Some("proton".to_string()));
    }

    #[test]
    fn common_name_of_garbage_is_none() {
        assert_eq!(common_name(b"not a certificate"), None);
    }

    #[test]
    fn acceptor_builds_with_client_ca() {
        let (server_cert, server_key) = self_signed("server", false);
        let (ca_cert, _) = self_signed("client-ca", true);

        assert!(build_acceptor(vec![server_cert], server_key, vec![ca_cert]).is_ok());
    }

    #[test]
    fn acceptor_requires_a_client_root() {
        let (server_cert, server_key) = self_signed("server", false);

        let result = build_acceptor(vec![server_cert], server_key, vec![]);
        assert!(matches!(result, Err(TlsError::Verifier(_))));
    }

    #[test]
    fn missing_files_are_reported() {
        let result = load_acceptor("/nonexistent/server.pem", "/nonexistent/server.key", "ca");
        assert!(matches!(result, Err(TlsError::Read { .. })));
    }

    #[tokio::test]
    async fn transport_binds_ephemeral_port() {
        let (server_cert, server_key) = self_signed("server", false);
        let (ca_cert, _) = self_signed("client-ca", true);
        let acceptor = build_acceptor(vec![server_cert], server_key, vec![ca_cert]).unwrap();

        let transport = TlsTransport::bind("127.0.0.1:0", acceptor).await.unwrap();
        assert_ne!(transport.local_addr().unwrap().port(), 0, "Should have assigned a port");
    }

    #[tokio::test]
    async fn transport_rejects_invalid_address() {
        let (server_cert, server_key) = self_signed("server", false);
        let (ca_cert, _) = self_signed("client-ca", true);
        let acceptor = build_acceptor(vec![server_cert], server_key, vec![ca_cert]).unwrap();

        let result = TlsTransport::bind("invalid:address:format", acceptor).await;
        assert!(result.is_err(), "Should reject invalid address");
    }
}
