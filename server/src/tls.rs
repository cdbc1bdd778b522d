//! TLS identity loading for the session host.
//!
//! The server consumes an already-provisioned PEM certificate/key pair (how
//! it was generated is the deployment's concern) and turns it into a
//! `TlsAcceptor`. Per-connection handshakes are driven by the accept
//! pipeline in `network`: a connection moves from accepting through
//! handshaking to connected, and an error at any stage discards that
//! connection only.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

/// Builds a TLS acceptor from PEM files on disk.
///
/// The certificate file may hold a whole chain; the key file must hold one
/// PKCS#8, RSA or SEC1 private key.
pub fn load_identity(
    cert_path: &Path,
    key_path: &Path,
) -> Result<TlsAcceptor, Box<dyn std::error::Error>> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut cert_reader).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(format!("no certificates found in {}", cert_path.display()).into());
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| format!("no private key found in {}", key_path.display()))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
