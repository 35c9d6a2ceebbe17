use anyhow::{anyhow, Context, Result};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Loads a certificate/key pair from disk, or generates a self-signed
/// `localhost` certificate when neither path is given. Grounded on
/// `Duocast-TSOD/server/gateway/src/tls.rs`; this is TCP+`tokio_rustls`
/// rather than QUIC, so the result feeds a `ServerConfig` for a
/// `TlsAcceptor` instead of `quinn`'s `QuicServerConfig`.
pub fn load_or_generate(
    cert_pem: Option<&str>,
    key_pem: Option<&str>,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    match (cert_pem, key_pem) {
        (Some(cert_path), Some(key_path)) => {
            let cert_bytes = std::fs::read(cert_path).context("read cert PEM")?;
            let key_bytes = std::fs::read(key_path).context("read key PEM")?;

            let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_bytes[..])
                .collect::<Result<Vec<_>, _>>()
                .context("parse cert PEM")?;

            let key = rustls_pemfile::private_key(&mut &key_bytes[..])
                .context("parse key PEM")?
                .ok_or_else(|| anyhow!("no private key found in PEM"))?;

            Ok((certs, key))
        }
        (None, None) => {
            let cert = generate_simple_self_signed(vec!["localhost".into()])
                .context("failed generating self-signed certificate")?;
            let cert_der: CertificateDer<'static> = cert.cert.der().clone();
            let key_der = PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into());
            Ok((vec![cert_der], key_der))
        }
        _ => Err(anyhow!(
            "must set both --tls-cert-pem and --tls-key-pem, or neither"
        )),
    }
}

pub fn build_acceptor(cert_pem: Option<&str>, key_pem: Option<&str>) -> Result<TlsAcceptor> {
    let (certs, key) = load_or_generate(cert_pem, key_pem)?;
    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building rustls ServerConfig")?;
    Ok(TlsAcceptor::from(Arc::new(server_config)))
}
