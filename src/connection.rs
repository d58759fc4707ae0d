//! Client-side connection and TLS helpers
//!
//! Provides the low-level `connect_*()` and `exchange()` functions shared
//! by the federation client and [`QuillClient`](crate::QuillClient). Each
//! exchange writes one packet and reads exactly one packet back.

use crate::error::{Error, Result};
use crate::protocol::{ErrorResponsePayload, Packet, PacketCodec, PacketType};
use futures::{SinkExt, StreamExt};
use rustls::RootCertStore;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_util::codec::Framed;
use tracing::debug;

/// A packet stream over any transport.
pub type PacketStream<S> = Framed<S, PacketCodec>;

/// How a client decides whether to trust the server certificate.
#[derive(Debug, Clone)]
pub enum ServerTrust {
    /// Verify against these roots.
    Roots(RootCertStore),
    /// Accept every certificate. Development only.
    AcceptAny,
}

/// A certificate chain and key presented to servers that ask for one.
#[derive(Debug)]
pub struct ClientIdentity {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Build a TLS connector.
///
/// # Errors
///
/// Returns [`Error::Tls`] when rustls rejects the client identity.
pub fn tls_connector(trust: ServerTrust, identity: Option<ClientIdentity>) -> Result<TlsConnector> {
    let builder = rustls::ClientConfig::builder_with_provider(crate::tls::provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?;

    let builder = match trust {
        ServerTrust::Roots(roots) => builder.with_root_certificates(roots),
        ServerTrust::AcceptAny => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(DangerousVerifier)),
    };

    let config = match identity {
        Some(id) => builder
            .with_client_auth_cert(id.certs, id.key)
            .map_err(|e| Error::Tls(format!("Invalid client certificate: {e}")))?,
        None => builder.with_no_client_auth(),
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Open a plain TCP packet stream.
///
/// # Errors
///
/// Returns [`Error::Io`] when the connection fails.
pub async fn connect_plain(host: &str, port: u16) -> Result<PacketStream<TcpStream>> {
    debug!("Connecting to {}:{} without TLS", host, port);
    let tcp = TcpStream::connect((host, port)).await?;
    Ok(Framed::new(tcp, PacketCodec::new()))
}

/// Open a TLS packet stream, verifying the certificate against `host`.
///
/// # Errors
///
/// Returns [`Error::Io`] when the connection fails and [`Error::Tls`]
/// when the handshake does.
pub async fn connect_tls(
    connector: &TlsConnector,
    host: &str,
    port: u16,
) -> Result<PacketStream<TlsStream<TcpStream>>> {
    debug!("Connecting to {}:{}", host, port);
    let tcp = TcpStream::connect((host, port)).await?;

    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| Error::Tls(format!("Invalid server name: {e}")))?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Tls(e.to_string()))?;

    Ok(Framed::new(tls, PacketCodec::new()))
}

/// Write `packet` and wait for the single packet that answers it.
///
/// # Errors
///
/// Codec and I/O errors, or [`Error::Io`] with `UnexpectedEof` when the
/// server closes the stream before answering.
pub async fn exchange<S>(stream: &mut PacketStream<S>, packet: Packet) -> Result<Packet>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.send(packet).await?;
    match stream.next().await {
        Some(response) => response,
        None => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before a response arrived",
        ))),
    }
}

/// Interpret a response packet that should have type `expected`.
///
/// An `ERROR_RESPONSE` becomes [`Error::PeerRejected`] carrying the
/// server's code and message.
///
/// # Errors
///
/// [`Error::ProtocolMismatch`] for a foreign protocol or an unexpected
/// type, [`Error::PeerRejected`] for an error response, and
/// [`Error::InvalidPayload`] when the payload does not decode.
pub fn decode_response<T: DeserializeOwned>(
    peer: &str,
    response: &Packet,
    expected: &PacketType,
) -> Result<T> {
    response.check_protocol()?;
    if &response.kind == expected {
        return response.payload_as();
    }
    if response.kind == PacketType::ErrorResponse {
        let err: ErrorResponsePayload = response.payload_as()?;
        return Err(Error::PeerRejected {
            peer: peer.to_string(),
            code: err.code,
            message: err.message,
        });
    }
    Err(Error::ProtocolMismatch(format!(
        "expected {expected} from {peer}, got {}",
        response.kind
    )))
}

/// Certificate verifier that accepts all certificates
/// (for self-signed development peers).
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        crate::tls::provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
