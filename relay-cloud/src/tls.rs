use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};

use crate::error::CloudError;

/// Build a TLS client configuration that trusts the system roots and
/// authenticates with the device certificate.
pub(crate) fn client_config(certificate: &str, private_key: &str) -> Result<ClientConfig, CloudError> {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs()
        .map_err(|e| CloudError::Tls(format!("cannot load system roots: {e}")))?;
    let (added, ignored) = roots.add_parsable_certificates(native);
    if ignored > 0 {
        warn!("ignored {ignored} unparsable system root certificates");
    }
    debug!("loaded {added} system root certificates");

    let mut reader = certificate.as_bytes();
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()
        .map_err(|e| CloudError::Tls(format!("invalid certificate: {e}")))?;
    if chain.is_empty() {
        return Err(CloudError::Tls("no certificate found".to_string()));
    }

    let mut reader = private_key.as_bytes();
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut reader)
        .map_err(|e| CloudError::Tls(format!("invalid private key: {e}")))?
        .ok_or_else(|| CloudError::Tls("no private key found".to_string()))?;

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| CloudError::Tls(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_rejects_a_missing_certificate() {
        let err = client_config("", "").unwrap_err();
        assert!(matches!(err, CloudError::Tls(_)));
    }
}
