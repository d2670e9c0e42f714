//! End-to-end tests over real sockets and mutual TLS.
//!
//! Certificates are minted per test with rcgen: one CA for the server, one CA
//! for clients. The server runs the production `Server` runtime on an
//! ephemeral port; clients use `proton-client`.

use std::{net::SocketAddr, time::Duration};

use proton_client::{Client, ClientError, ClientTls};
use proton_proto::{Action, Frame, Request, Response, Status, messages};
use proton_server::{MemoryStorage, Server, ServerRuntimeConfig, transport};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

struct Authority {
    cert: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    fn der(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    fn issue(
        &self,
        common_name: &str,
        usage: ExtendedKeyUsagePurpose,
    ) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.extended_key_usages = vec![usage];
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        (cert.der().clone(), key)
    }
}

struct Harness {
    addr: SocketAddr,
    server_ca: Authority,
    client_ca: Authority,
}

impl Harness {
    async fn start() -> Self {
        let server_ca = Authority::new("Proton Server CA");
        let client_ca = Authority::new("Proton Client CA");

        let (cert, key) = server_ca.issue("localhost", ExtendedKeyUsagePurpose::ServerAuth);
        let acceptor = transport::build_acceptor(vec![cert], key, vec![client_ca.der()]).unwrap();

        let config =
            ServerRuntimeConfig { bind_address: "127.0.0.1:0".to_string(), ..Default::default() };
        let server =
            Server::bind_with_acceptor(config, MemoryStorage::new(), acceptor).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        Self { addr, server_ca, client_ca }
    }

    fn tls_for(&self, issuer: &Authority, common_name: &str) -> ClientTls {
        let (cert, key) = issuer.issue(common_name, ExtendedKeyUsagePurpose::ClientAuth);
        ClientTls { roots: vec![self.server_ca.der()], cert_chain: vec![cert], key }
    }

    async fn client(&self) -> Client {
        let tls = self.tls_for(&self.client_ca, "proton");
        Client::connect(&self.addr.to_string(), "localhost", tls)
            .await
            .unwrap()
            .with_timeout(Duration::from_secs(10))
    }

    /// Connect with the given certificate and try one request.
    async fn attempt(&self, tls: ClientTls) -> Result<Response, ClientError> {
        let mut client = Client::connect(&self.addr.to_string(), "localhost", tls)
            .await?
            .with_timeout(Duration::from_secs(10));
        client.request(&Request::new(Action::Get)).await
    }
}

fn credentials(action: Action, username: &str) -> Request {
    Request::new(action).with_param("username", username).with_param("password", "pw")
}

async fn logged_in(harness: &Harness, username: &str) -> Client {
    let mut client = harness.client().await;
    let registered = client.request(&credentials(Action::Register, username)).await.unwrap();
    assert_eq!(registered.status, Status::Ok);
    let login = client.request(&credentials(Action::Login, username)).await.unwrap();
    assert_eq!(login.status, Status::Ok);
    client
}

#[tokio::test]
async fn register_login_create_get_delete() {
    let harness = Harness::start().await;
    let mut client = logged_in(&harness, "alice").await;

    let create = Request::new(Action::Create)
        .with_param("title", "hello")
        .with_param("content", "first post");
    let created = client.request(&create).await.unwrap();
    assert_eq!(created.status, Status::Ok);
    assert_eq!(created.message.as_deref(), Some(messages::POST_CREATED));
    let id = created.data.unwrap()[0]["id"].as_u64().unwrap();

    let fetched = client.request(&Request::new(Action::Get).with_param("id", id)).await.unwrap();
    assert_eq!(fetched.status, Status::Ok);
    let post = &fetched.data.unwrap()[0];
    assert_eq!(post["title"], "hello");
    assert_eq!(post["content"], "first post");

    let deleted =
        client.request(&Request::new(Action::Delete).with_param("id", id)).await.unwrap();
    assert_eq!(deleted.status, Status::Ok);

    let all = client.request(&Request::new(Action::Get)).await.unwrap();
    assert_eq!(all.status, Status::Ok);
    assert_eq!(all.data, Some(vec![]));
}

#[tokio::test]
async fn gated_actions_require_login() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    let denied = client.request(&Request::new(Action::Get)).await.unwrap();
    assert_eq!(denied, Response::error(messages::PERMISSION_DENIED));

    // Connection stays usable
    let registered = client.request(&credentials(Action::Register, "bob")).await.unwrap();
    assert_eq!(registered.status, Status::Ok);
}

#[tokio::test]
async fn missing_post_is_not_found() {
    let harness = Harness::start().await;
    let mut client = logged_in(&harness, "carol").await;

    let missing = client.request(&Request::new(Action::Get).with_param("id", 999)).await.unwrap();
    assert_eq!(missing, Response::wrong(messages::NOT_FOUND));
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let harness = Harness::start().await;
    let mut client = harness.client().await;

    let garbage = client.request_frame(Frame::new(&b"{not json"[..])).await.unwrap();
    assert_eq!(garbage, Response::syntax_error());

    let registered = client.request(&credentials(Action::Register, "dave")).await.unwrap();
    assert_eq!(registered.status, Status::Ok);
}

#[tokio::test]
async fn logout_revokes_the_session() {
    let harness = Harness::start().await;
    let mut client = logged_in(&harness, "erin").await;

    let out = client.request(&Request::new(Action::Logout)).await.unwrap();
    assert_eq!(out.status, Status::Ok);

    let denied = client.request(&Request::new(Action::Get)).await.unwrap();
    assert_eq!(denied, Response::error(messages::PERMISSION_DENIED));
}

/// Interleave create and get-by-id, checking every reply answers this client.
async fn create_and_read_back(mut client: Client, name: &'static str) -> Vec<u64> {
    let mut ids = Vec::new();
    for i in 0..20 {
        let title = format!("{name}-{i}");
        let create = Request::new(Action::Create)
            .with_param("title", title.as_str())
            .with_param("content", name);
        let created = client.request(&create).await.unwrap();
        assert_eq!(created.message.as_deref(), Some(messages::POST_CREATED));
        let post = &created.data.unwrap()[0];
        assert_eq!(post["title"], title);
        let id = post["id"].as_u64().unwrap();

        let fetched = client.request(&Request::new(Action::Get).with_param("id", id)).await;
        let fetched = fetched.unwrap().data.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0]["id"], id);
        assert_eq!(fetched[0]["title"], title);
        assert_eq!(fetched[0]["content"], name);

        ids.push(id);
    }
    ids
}

#[tokio::test]
async fn concurrent_clients_are_isolated() {
    let harness = Harness::start().await;
    let first = logged_in(&harness, "frank").await;
    let second = logged_in(&harness, "grace").await;

    let first_task = tokio::spawn(create_and_read_back(first, "frank"));
    let second_task = tokio::spawn(create_and_read_back(second, "grace"));

    let first_ids = first_task.await.unwrap();
    let second_ids = second_task.await.unwrap();

    // Per-connection order holds and the two clients never share a record
    assert!(first_ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(second_ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(first_ids.iter().all(|id| !second_ids.contains(id)));
}

#[tokio::test]
async fn disconnected_client_is_released() {
    let harness = Harness::start().await;
    let client = logged_in(&harness, "ivan").await;

    // Half-close: the server sees EOF and must close its end of the socket
    let mut stream = client.into_inner();
    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    let drained =
        tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut rest)).await;
    assert!(drained.is_ok(), "server kept the connection open after the peer hung up");
    assert!(rest.is_empty());

    // Listener and loop carry on, and the session outlives the socket
    let mut next = harness.client().await;
    let login = next.request(&credentials(Action::Login, "ivan")).await.unwrap();
    assert_eq!(login.status, Status::Ok);
    let all = next.request(&Request::new(Action::Get)).await.unwrap();
    assert_eq!(all.status, Status::Ok);
}

#[tokio::test]
async fn wrong_common_name_is_rejected() {
    let harness = Harness::start().await;

    let tls = harness.tls_for(&harness.client_ca, "intruder");
    assert!(harness.attempt(tls).await.is_err());
}

#[tokio::test]
async fn untrusted_client_certificate_is_rejected() {
    let harness = Harness::start().await;
    let rogue = Authority::new("Rogue CA");

    let tls = harness.tls_for(&rogue, "proton");
    assert!(harness.attempt(tls).await.is_err());

    // Listener survives the failed handshake
    let mut client = harness.client().await;
    let registered = client.request(&credentials(Action::Register, "heidi")).await.unwrap();
    assert_eq!(registered.status, Status::Ok);
}
