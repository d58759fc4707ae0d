//! PEM loading and rustls configuration
//!
//! Configs are built against the ring provider explicitly so the library
//! never depends on a process-wide default provider being installed.

use crate::connection::ServerTrust;
use crate::error::{Error, Result};
use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::WebPkiClientVerifier;
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, SignatureScheme};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

pub(crate) fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Config(format!("Cannot open {}: {e}", path.display())))
}

/// Read every certificate from a PEM file.
///
/// # Errors
///
/// Returns [`Error::Config`] when the file cannot be read or holds no
/// certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("Bad certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "No certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
///
/// # Errors
///
/// Returns [`Error::Config`] when the file cannot be read or holds no
/// key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| Error::Config(format!("Bad private key in {}: {e}", path.display())))?
        .ok_or_else(|| Error::Config(format!("No private key found in {}", path.display())))
}

/// Build a root store from a PEM bundle.
///
/// # Errors
///
/// Returns [`Error::Config`] when the bundle is unreadable or a
/// certificate is rejected.
pub fn load_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| Error::Config(format!("Bad CA certificate in {}: {e}", path.display())))?;
    }
    Ok(roots)
}

/// Server-side TLS configuration for the listener.
///
/// Connecting peer servers are asked for a client certificate, checked
/// against `peers`. The certificate is optional so end-user clients can
/// still connect without one.
///
/// # Errors
///
/// Returns [`Error::Tls`] when rustls rejects the certificate, the key or
/// the peer roots.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    peers: &ServerTrust,
) -> Result<Arc<rustls::ServerConfig>> {
    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::Tls(e.to_string()))?
        .with_client_cert_verifier(client_verifier(peers)?)
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("Invalid server certificate: {e}")))?;
    Ok(Arc::new(config))
}

fn client_verifier(peers: &ServerTrust) -> Result<Arc<dyn ClientCertVerifier>> {
    match peers {
        ServerTrust::Roots(roots) => {
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots.clone()), provider())
                .allow_unauthenticated()
                .build()
                .map_err(|e| Error::Tls(format!("Invalid peer roots: {e}")))
        }
        ServerTrust::AcceptAny => Ok(Arc::new(AnyClientCertificate)),
    }
}

/// Accepts any client certificate chain, but still checks the handshake
/// signature so the client holds the certificate's key. Development only.
#[derive(Debug)]
struct AnyClientCertificate;

impl ClientCertVerifier for AnyClientCertificate {
    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "quill-tls-{}-{name}",
            uuid::Uuid::new_v4()
        ));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn loads_generated_cert_and_key() {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let cert_path = write_temp("cert.pem", &generated.cert.pem());
        let key_path = write_temp("key.pem", &generated.key_pair.serialize_pem());

        let certs = load_certs(&cert_path).unwrap();
        assert_eq!(certs.len(), 1);
        let key = load_private_key(&key_path).unwrap();
        assert!(server_config(certs.clone(), key.clone_key(), &ServerTrust::AcceptAny).is_ok());

        let roots = load_roots(&cert_path).unwrap();
        assert_eq!(roots.len(), 1);
        assert!(server_config(certs, key, &ServerTrust::Roots(roots)).is_ok());
    }

    #[test]
    fn empty_file_has_no_certificate() {
        let path = write_temp("empty.pem", "");
        assert!(matches!(load_certs(&path), Err(Error::Config(_))));
        assert!(matches!(load_private_key(&path), Err(Error::Config(_))));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load_certs(Path::new("/nonexistent/quill.pem")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
