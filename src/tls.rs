use std::fs::File;
use std::io::{self, BufReader, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;

/// TLS acceptor from a PEM certificate chain and private key. Both paths or
/// neither; neither means plaintext.
pub fn load_tls_acceptor(cert_path: Option<&Path>, key_path: Option<&Path>) -> io::Result<Option<TlsAcceptor>> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (c, k),
        _ => {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "both RESERVD_TLS_CERT and RESERVD_TLS_KEY must be set, or neither",
            ));
        }
    };

    let certs: Vec<_> =
        rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?)).collect::<Result<_, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::new(
            ErrorKind::InvalidInput,
            format!("no certificates found in {}", cert_path.display()),
        ));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?.ok_or_else(|| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("no private key found in {}", key_path.display()),
        )
    })?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| io::Error::new(ErrorKind::InvalidInput, e))?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_paths_means_plaintext() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
    }

    #[test]
    fn half_configured_tls_is_rejected() {
        match load_tls_acceptor(Some(Path::new("cert.pem")), None) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidInput),
            Ok(_) => panic!("expected an error for a certificate without a key"),
        }
    }

    #[test]
    fn missing_files_surface_io_errors() {
        let dir = std::env::temp_dir().join("reservd_test_tls");
        let err = load_tls_acceptor(Some(&dir.join("nope.pem")), Some(&dir.join("nope.key"))).err();
        assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotFound));
    }
}
