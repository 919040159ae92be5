//! rustls configuration for both roles.
//!
//! - **Daemon**: a [`TlsAcceptor`] built from a PEM key and certificate
//!   chain.  Client certificates are not requested.
//! - **Client**: a `rustls::ClientConfig` chosen by [`TlsMode`]:
//!   - `Strict` verifies the daemon against the web PKI roots plus an
//!     optional CA file;
//!   - `Relaxed` accepts any certificate (self-signed deployments) but still
//!     checks handshake signatures;
//!   - `Off` needs no config at all.
//!
//! Every config is built on the `ring` provider explicitly, so nothing
//! depends on which process-wide default happens to be installed.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use usbws_core::TlsMode;

use crate::domain::TlsFiles;
use crate::error::BridgeError;

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

// ── PEM loading ───────────────────────────────────────────────────────────────

fn open(path: &Path) -> Result<BufReader<File>, BridgeError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| BridgeError::Tls(format!("cannot open {}: {e}", path.display())))
}

/// Reads every certificate in a PEM file.
///
/// # Errors
///
/// Fails if the file cannot be read or holds no certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, BridgeError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BridgeError::Tls(format!("bad certificate in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(BridgeError::Tls(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Reads the first private key (PKCS#1, PKCS#8 or SEC1) in a PEM file.
pub fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, BridgeError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| BridgeError::Tls(format!("bad key in {}: {e}", path.display())))?
        .ok_or_else(|| BridgeError::Tls(format!("no private key found in {}", path.display())))
}

// ── Daemon ────────────────────────────────────────────────────────────────────

/// Builds the daemon's TLS acceptor.
pub fn server_acceptor(files: &TlsFiles) -> Result<TlsAcceptor, BridgeError> {
    let certs = load_certs(&files.cert)?;
    let key = load_key(&files.key)?;

    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(BridgeError::tls)?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(BridgeError::tls)?;

    debug!(cert = %files.cert.display(), "TLS acceptor ready");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Builds the client TLS configuration for `mode`, or `None` for plain `ws`.
pub fn client_config(
    mode: TlsMode,
    ca_file: Option<&Path>,
    client_auth: Option<&TlsFiles>,
) -> Result<Option<Arc<rustls::ClientConfig>>, BridgeError> {
    let provider = provider();
    let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(BridgeError::tls)?;

    let builder = match mode {
        TlsMode::Off => return Ok(None),
        TlsMode::Strict => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            if let Some(ca) = ca_file {
                for cert in load_certs(ca)? {
                    roots.add(cert).map_err(BridgeError::tls)?;
                }
            }
            builder.with_root_certificates(roots)
        }
        TlsMode::Relaxed => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert {
                algorithms: provider.signature_verification_algorithms,
            })),
    };

    let config = match client_auth {
        Some(files) => builder
            .with_client_auth_cert(load_certs(&files.cert)?, load_key(&files.key)?)
            .map_err(BridgeError::tls)?,
        None => builder.with_no_client_auth(),
    };
    Ok(Some(Arc::new(config)))
}

/// Certificate verifier for relaxed mode: any chain is accepted, handshake
/// signatures are still checked.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_plain_mode_needs_no_config() {
        assert!(client_config(TlsMode::Off, None, None).unwrap().is_none());
    }

    #[test]
    fn test_relaxed_mode_builds_without_files() {
        let config = client_config(TlsMode::Relaxed, None, None).unwrap();
        assert!(config.is_some());
    }

    #[test]
    fn test_strict_mode_builds_with_webpki_roots() {
        let config = client_config(TlsMode::Strict, None, None).unwrap();
        assert!(config.is_some());
    }

    #[test]
    fn test_missing_ca_file_is_tls_error() {
        let result = client_config(
            TlsMode::Strict,
            Some(Path::new("/nonexistent/ca.pem")),
            None,
        );
        assert!(matches!(result, Err(BridgeError::Tls(_))));
    }

    #[test]
    fn test_server_acceptor_reports_missing_files() {
        let files = TlsFiles {
            key: "/nonexistent/server.key".into(),
            cert: "/nonexistent/server.crt".into(),
        };
        assert!(matches!(server_acceptor(&files), Err(BridgeError::Tls(_))));
    }

    #[test]
    fn test_pem_without_certificate_is_rejected() {
        // Arrange: a PEM file with no CERTIFICATE block
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not a pem file").unwrap();

        // Act
        let result = load_certs(file.path());

        // Assert
        assert!(matches!(result, Err(BridgeError::Tls(_))));
    }

    #[test]
    fn test_pem_without_key_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "-----BEGIN NOTHING-----\n-----END NOTHING-----").unwrap();

        assert!(matches!(load_key(file.path()), Err(BridgeError::Tls(_))));
    }
}
