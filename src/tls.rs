//! TLS setup (C2): mutual-TLS contexts for both roles, built from a
//! private key, a certificate chain, and an optional CA pool.

use crate::error::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

pub fn install_default_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn load_cert_chain(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| Error::Io(e))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::tls(format!("bad cert {}: {}", path, e)))
}

fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(Error::Io)?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::tls(format!("bad cert {}: {}", path, e)))?
        .ok_or_else(|| Error::tls(format!("no private key found in {}", path)))
}

fn load_ca_pool(path: &str) -> Result<RootCertStore> {
    let file = File::open(path).map_err(Error::Io)?;
    let mut reader = BufReader::new(file);
    let mut store = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| Error::tls(format!("bad ca {}: {}", path, e)))?;
        store
            .add(cert)
            .map_err(|e| Error::tls(format!("bad ca {}: {}", path, e)))?;
    }
    Ok(store)
}

/// Builds the relay's server-side TLS context: client certificates are
/// required, verified against `ca_file` if present or else the chain's
/// own issuer (self-signed deployments supply a CA explicitly).
pub fn server_tls_config(
    crt_file: &str,
    key_file: &str,
    ca_file: Option<&str>,
) -> Result<Arc<ServerConfig>> {
    install_default_crypto_provider();
    let chain = load_cert_chain(crt_file)?;
    let key = load_private_key(key_file)?;

    let client_verifier = match ca_file {
        Some(ca) => {
            let store = Arc::new(load_ca_pool(ca)?);
            rustls::server::WebPkiClientVerifier::builder(store)
                .build()
                .map_err(|e| Error::tls(format!("client verifier: {}", e)))?
        }
        None => {
            let mut store = RootCertStore::empty();
            for cert in &chain {
                store
                    .add(cert.clone())
                    .map_err(|e| Error::tls(format!("self-cert as ca: {}", e)))?;
            }
            rustls::server::WebPkiClientVerifier::builder(Arc::new(store))
                .build()
                .map_err(|e| Error::tls(format!("client verifier: {}", e)))?
        }
    };

    let config = ServerConfig::builder()
        .with_client_cert_verifier(client_verifier)
        .with_single_cert(chain, key)
        .map_err(|e| Error::tls(e.to_string()))?;
    Ok(Arc::new(config))
}

/// Builds the client pool's dialer-side TLS context: presents its own
/// client certificate, verifies the relay's certificate against
/// `ca_file` if present (else the chain's own issuer), or skips
/// verification entirely when `insecure` (development only).
pub fn client_tls_config(
    crt_file: &str,
    key_file: &str,
    ca_file: Option<&str>,
    insecure: bool,
) -> Result<Arc<ClientConfig>> {
    install_default_crypto_provider();
    let chain = load_cert_chain(crt_file)?;
    let key = load_private_key(key_file)?;

    let builder = if insecure {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoServerVerification))
    } else {
        let mut store = match ca_file {
            Some(ca) => load_ca_pool(ca)?,
            None => RootCertStore::empty(),
        };
        if ca_file.is_none() {
            for cert in &chain {
                store
                    .add(cert.clone())
                    .map_err(|e| Error::tls(format!("self-cert as ca: {}", e)))?;
            }
        }
        ClientConfig::builder().with_root_certificates(store)
    };

    let config = builder
        .with_client_auth_cert(chain, key)
        .map_err(|e| Error::tls(e.to_string()))?;
    Ok(Arc::new(config))
}

/// Skips server-name and chain verification. Gated behind `insecure` in
/// the config for self-signed development deployments only.
#[derive(Debug)]
struct NoServerVerification;

impl rustls::client::danger::ServerCertVerifier for NoServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
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
        rustls::crypto::aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
