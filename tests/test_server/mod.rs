#![allow(dead_code)]

//! In-process Quill server for integration testing
//!
//! Each [`TestServer`] runs the real listener, dispatcher and federation
//! client on OS-assigned ports, with in-memory storage and static
//! session tokens. It listens twice: once with TLS and once in plaintext
//! for the CLI tests.
//!
//! Every server holds a certificate for its own domain issued by one
//! shared test CA. Listeners trust that CA for client certificates and
//! present the same certificate when delivering to peers.
//!
//! ```text
//!   TestServerBuilder::new("local.domain")
//!       .account("uid-alice", "alice", "tok-alice")
//!       .peer("remote.domain", other.tls_port())
//!       .start()
//! ```

use quill_server::accounts::{AccountSeed, seed_accounts};
use quill_server::connection::{ClientIdentity, ServerTrust, tls_connector};
use quill_server::{
    ClientConfig, Dispatcher, FederationClient, Listener, PeerDirectory, QuillClient, Server,
    StaticTokenAuthenticator, Storage, TlsTrust, tls,
};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rustls::RootCertStore;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

struct TestCa {
    cert: Certificate,
    key: KeyPair,
}

static TEST_CA: LazyLock<TestCa> = LazyLock::new(|| {
    let mut params = CertificateParams::new(Vec::<String>::new()).expect("CA params");
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params
        .distinguished_name
        .push(DnType::CommonName, "Quill Test CA");
    let key = KeyPair::generate().expect("generate CA key");
    let cert = params.self_signed(&key).expect("self-sign CA");
    TestCa { cert, key }
});

/// A root store holding only the shared test CA.
pub fn test_ca_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots
        .add(TEST_CA.cert.der().clone())
        .expect("add test CA");
    roots
}

/// A certificate for `domain` and localhost, issued by the test CA.
pub fn peer_identity(domain: &str) -> ClientIdentity {
    let mut params = CertificateParams::new(vec![
        domain.to_string(),
        "127.0.0.1".to_string(),
        "localhost".to_string(),
    ])
    .expect("leaf params");
    params.distinguished_name.push(DnType::CommonName, domain);
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    let key = KeyPair::generate().expect("generate leaf key");
    let cert = params
        .signed_by(&key, &TEST_CA.cert, &TEST_CA.key)
        .expect("sign leaf");
    ClientIdentity {
        certs: vec![cert.der().clone()],
        key: PrivatePkcs8KeyDer::from(key.serialize_der()).into(),
    }
}

pub struct TestServerBuilder {
    domain: String,
    accounts: Vec<AccountSeed>,
    peers: Vec<(String, u16)>,
    peer_timeout: Duration,
}

impl TestServerBuilder {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            accounts: Vec::new(),
            peers: Vec::new(),
            peer_timeout: Duration::from_secs(5),
        }
    }

    /// Register `local~<domain>` under `uid`, authenticated by `token`.
    pub fn account(mut self, uid: &str, local: &str, token: &str) -> Self {
        self.accounts.push(AccountSeed {
            uid: uid.to_string(),
            quill_mail: format!("{local}~{}", self.domain),
            email: format!("{local}@example.com"),
            token: token.to_string(),
        });
        self
    }

    /// Route federation for `domain` to a TLS listener on localhost.
    pub fn peer(mut self, domain: &str, port: u16) -> Self {
        self.peers.push((domain.to_string(), port));
        self
    }

    pub async fn start(self) -> TestServer {
        // Multiple tests may race to install the provider, so ignore
        // the error if it's already set.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let identity = peer_identity(&self.domain);
        let server_config = tls::server_config(
            identity.certs.clone(),
            identity.key.clone_key(),
            &ServerTrust::Roots(test_ca_roots()),
        )
        .expect("build server TLS config");

        let tls_listener = Listener::tls("127.0.0.1:0", TlsAcceptor::from(server_config))
            .await
            .expect("bind TLS listener");
        let plain_listener = Listener::plain("127.0.0.1:0")
            .await
            .expect("bind plaintext listener");
        let tls_port = tls_listener.local_addr().unwrap().port();
        let plain_port = plain_listener.local_addr().unwrap().port();

        let storage = Storage::in_memory();
        let auth = Arc::new(StaticTokenAuthenticator::new());
        seed_accounts(&self.accounts, storage.users.as_ref(), &auth)
            .await
            .expect("seed accounts");

        let mut directory = PeerDirectory::new(1);
        for (domain, port) in &self.peers {
            directory = directory.with_peer(domain, "127.0.0.1", *port);
        }
        let connector =
            tls_connector(ServerTrust::AcceptAny, Some(identity)).expect("build connector");
        let federation = FederationClient::new(directory, connector, self.peer_timeout);

        let dispatcher = Dispatcher::new(self.domain.clone(), storage, auth, Arc::new(federation));
        let server = Server::new(dispatcher, Duration::from_secs(1));
        let shutdown = server.shutdown_token();

        let handle = tokio::spawn(async move {
            server
                .run(vec![tls_listener, plain_listener])
                .await
                .expect("server run");
        });

        TestServer {
            domain: self.domain,
            tls_port,
            plain_port,
            shutdown,
            _handle: handle,
        }
    }
}

/// A running server. Dropping it cancels the server.
pub struct TestServer {
    domain: String,
    tls_port: u16,
    plain_port: u16,
    shutdown: CancellationToken,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub const fn tls_port(&self) -> u16 {
        self.tls_port
    }

    pub const fn plain_port(&self) -> u16 {
        self.plain_port
    }

    /// An address on this server's domain.
    pub fn address(&self, local: &str) -> String {
        format!("{local}~{}", self.domain)
    }

    /// A TLS client sending `token`, or anonymous when `None`.
    pub fn client(&self, token: Option<&str>) -> QuillClient {
        QuillClient::new(ClientConfig {
            host: "127.0.0.1".to_string(),
            port: self.tls_port,
            token: token.map(str::to_string),
            trust: TlsTrust::Insecure,
            plaintext: false,
        })
        .expect("build client")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
