use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls_pemfile::{certs, pkcs8_private_keys};

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("no PKCS#8 private key found in {0}")]
    MissingKey(String),
    #[error("invalid certificate/key pair: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Build a rustls server config from PEM encoded certificate chain and PKCS#8 key.
pub fn load_rustls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, TlsError> {
    let cert_chain: Vec<CertificateDer<'static>> = certs(&mut open(cert_path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| io_error(cert_path, source))?;

    let key = pkcs8_private_keys(&mut open(key_path)?)
        .next()
        .ok_or_else(|| TlsError::MissingKey(key_path.display().to_string()))?
        .map_err(|source| io_error(key_path, source))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, PrivateKeyDer::Pkcs8(key))?;
    Ok(config)
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| io_error(path, source))
}

fn io_error(path: &Path, source: std::io::Error) -> TlsError {
    TlsError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_certificate_is_reported() {
        let err = load_rustls_config(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"))
            .unwrap_err();
        assert!(matches!(err, TlsError::Io { ref path, .. } if path.ends_with("cert.pem")));
    }
}
