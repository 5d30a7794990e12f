//! TLS configuration and certificate loading.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

fn require(path: &Path, what: &str) -> io::Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} file not found: {}", what, path.display()),
        ))
    }
}

/// Load a PEM certificate chain and private key for a TLS listener.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<RustlsConfig> {
    require(cert_path, "Certificate")?;
    require(key_path, "Private key")?;
    RustlsConfig::from_pem_file(cert_path, key_path).await
}
