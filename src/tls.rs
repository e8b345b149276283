use anyhow::{anyhow, Context, Result};
use log::debug;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Build a STARTTLS configuration from PEM encoded certificate and key files.
///
/// The key file may hold a PKCS#1, PKCS#8 or SEC1 key, the first one found is used.
pub fn load_tls_config<P: AsRef<Path>>(cert_path: P, key_path: P) -> Result<Arc<ServerConfig>> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let cert_file = File::open(cert_path)
        .with_context(|| format!("open certificate {}", cert_path.display()))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!("invalid certificate {}: {}", cert_path.display(), e))?;
    if certs.is_empty() {
        return Err(anyhow!("no certificate found in {}", cert_path.display()));
    }

    let key_file =
        File::open(key_path).with_context(|| format!("open key {}", key_path.display()))?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
        .map_err(|e| anyhow!("invalid key {}: {}", key_path.display(), e))?
        .ok_or_else(|| anyhow!("no private key found in {}", key_path.display()))?;

    debug!("loaded {} certificate(s) from {}", certs.len(), cert_path.display());
    build_config(certs, key)
}

pub(crate) fn build_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| anyhow!("tls config: {}", e))?;
    Ok(Arc::new(config))
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name));
        File::create(&path).unwrap().write_all(contents).unwrap();
        path
    }

    #[test]
    fn load_pem_files() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = temp_file("cert.pem", certified.cert.pem().as_bytes());
        let key = temp_file("key.pem", certified.signing_key.serialize_pem().as_bytes());
        assert!(load_tls_config(&cert, &key).is_ok());
        let _ = std::fs::remove_file(cert);
        let _ = std::fs::remove_file(key);
    }

    #[test]
    fn missing_key_is_an_error() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = temp_file("cert.pem", certified.cert.pem().as_bytes());
        let key = temp_file("empty.pem", b"");
        let err = load_tls_config(&cert, &key).unwrap_err();
        assert!(err.to_string().contains("no private key"));
        let _ = std::fs::remove_file(cert);
        let _ = std::fs::remove_file(key);
    }

    #[test]
    fn missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("smtpserve-does-not-exist.pem");
        assert!(load_tls_config(&missing, &missing).is_err());
    }
}
