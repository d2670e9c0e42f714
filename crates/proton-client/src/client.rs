//! Connection and request/response exchange.

use std::{fs, path::Path, sync::Arc, time::Duration};

use futures::{SinkExt, StreamExt};
use proton_proto::{Frame, FrameCodec, Request, Response};
use rustls::{
    ClientConfig, RootCertStore,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tokio_rustls::{TlsConnector, client::TlsStream};
use tokio_util::codec::Framed;

use crate::error::ClientError;

/// How long [`Client::request`] waits for a response by default.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client side of the mutual-TLS setup.
pub struct ClientTls {
    /// CAs the server certificate must chain to
    pub roots: Vec<CertificateDer<'static>>,
    /// Client certificate chain presented to the server
    pub cert_chain: Vec<CertificateDer<'static>>,
    /// Private key for the first certificate in `cert_chain`
    pub key: PrivateKeyDer<'static>,
}

impl ClientTls {
    /// Load roots, certificate chain and key from PEM files.
    pub fn from_pem_files(
        ca_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
    ) -> Result<Self, ClientError> {
        let roots = read_certs(ca_path.as_ref())?;
        let cert_chain = read_certs(cert_path.as_ref())?;

        let key_path = key_path.as_ref();
        let pem = read_pem(key_path)?;
        let key = rustls_pemfile::private_key(&mut &pem[..])
            .map_err(|e| pem_error(key_path, e.to_string()))?
            .ok_or_else(|| pem_error(key_path, "no private key found".to_string()))?;

        Ok(Self { roots, cert_chain, key })
    }

    fn into_connector(self) -> Result<TlsConnector, ClientError> {
        let mut roots = RootCertStore::empty();
        for root in self.roots {
            roots.add(root).map_err(|e| ClientError::Tls(e.to_string()))?;
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ClientError::Tls(e.to_string()))?
            .with_root_certificates(roots)
            .with_client_auth_cert(self.cert_chain, self.key)
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        Ok(TlsConnector::from(Arc::new(config)))
    }
}

/// A connection to a Proton server.
///
/// At most one request is outstanding at a time, which `&mut self` on
/// [`Client::request`] enforces.
pub struct Client<T = TlsStream<TcpStream>> {
    framed: Framed<T, FrameCodec>,
    timeout: Duration,
}

impl Client {
    /// Connect and complete the mutual-TLS handshake.
    ///
    /// `server_name` is checked against the server certificate.
    pub async fn connect(
        addr: &str,
        server_name: &str,
        tls: ClientTls,
    ) -> Result<Self, ClientError> {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::InvalidServerName(server_name.to_string()))?;
        let connector = tls.into_connector()?;

        let stream = TcpStream::connect(addr).await?;
        let stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::Tls(e.to_string()))?;

        tracing::debug!("connected to {}", addr);

        Ok(Self::from_stream(stream))
    }
}

impl<T> Client<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Speak the protocol over an already-established stream.
    pub fn from_stream(stream: T) -> Self {
        Self { framed: Framed::new(stream, FrameCodec::new()), timeout: DEFAULT_TIMEOUT }
    }

    /// Change how long to wait for each response.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send one request and wait for its response.
    pub async fn request(&mut self, request: &Request) -> Result<Response, ClientError> {
        self.request_frame(request.encode()?).await
    }

    /// Send an arbitrary frame body and wait for the response.
    ///
    /// Lets callers exercise the server's handling of malformed requests.
    pub async fn request_frame(&mut self, frame: Frame) -> Result<Response, ClientError> {
        tokio::time::timeout(self.timeout, self.framed.send(frame))
            .await
            .map_err(|_| ClientError::Timeout)??;

        let frame = tokio::time::timeout(self.timeout, self.framed.next())
            .await
            .map_err(|_| ClientError::Timeout)?
            .ok_or(ClientError::Closed)??;

        Ok(Response::decode(&frame)?)
    }

    /// Underlying stream.
    pub fn into_inner(self) -> T {
        self.framed.into_inner()
    }
}

fn pem_error(path: &Path, reason: String) -> ClientError {
    ClientError::Pem { path: path.display().to_string(), reason }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ClientError> {
    fs::read(path).map_err(|e| pem_error(path, e.to_string()))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ClientError> {
    let pem = read_pem(path)?;
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(path, e.to_string()))?;

    if certs.is_empty() {
        return Err(pem_error(path, "no certificates found".to_string()));
    }

    Ok(certs)
}

#[cfg(test)]
mod tests {
    use proton_proto::{Action, Status};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, duplex};

    use super::*;

    #[tokio::test]
    async fn request_waits_for_matching_response() {
        let (client_side, server_side) = duplex(4096);
        let mut client = Client::from_stream(client_side);

        let server = tokio::spawn(async move {
            let mut server_side = BufReader::new(server_side);
            let mut line = String::new();
            server_side.read_line(&mut line).await.unwrap();
            let request: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
            assert_eq!(request["action"], "get");
            server_side.get_mut().write_all(b"{\"status\":\"OK\",\"data\":[]}\r\n").await.unwrap();
        });

        let response = client.request(&Request::new(Action::Get)).await.unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.data, Some(vec![]));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let (client_side, server_side) = duplex(4096);
        let mut client = Client::from_stream(client_side);
        drop(server_side);

        let result = client.request(&Request::new(Action::Logout)).await;
        assert!(matches!(result, Err(ClientError::Closed | ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let (client_side, _server_side) = duplex(4096);
        let mut client = Client::from_stream(client_side).with_timeout(Duration::from_millis(50));

        let result = client.request(&Request::new(Action::Logout)).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }

    #[test]
    fn missing_pem_files_are_reported() {
        let result = ClientTls::from_pem_files("/nonexistent/ca.pem", "cert.pem", "key.pem");
        assert!(matches!(result, Err(ClientError::Pem { .. })));
    }
}
