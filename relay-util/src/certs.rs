//! Device certificate handling.
//!
//! The fleet manager cannot store multi-line values in device variables, so
//! the device certificate and key are stored as the body of the PEM block
//! with every line break replaced by a single space. This module puts the
//! PEM blocks back together.
//!
//! No validation happens here. A malformed fragment yields a malformed PEM
//! block that is rejected by the TLS layer when the identity is first used.

use pkcs8::EncryptedPrivateKeyInfo;
use pkcs8::der::pem::{self, LineEnding};
use thiserror::Error;

use crate::types::Uuid;

pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";
pub const ENCRYPTED_PRIVATE_KEY_LABEL: &str = "ENCRYPTED PRIVATE KEY";
pub const PRIVATE_KEY_LABEL: &str = "PRIVATE KEY";

/// Default passphrase used by the fleet tooling to encrypt device keys
pub const DEFAULT_KEY_PASSPHRASE: &str = "123123";

#[derive(Debug, Error)]
pub enum CertError {
    #[error("Failed to decode private key: {0}")]
    Decode(String),

    #[error("Failed to decrypt private key: {0}")]
    Decrypt(String),
}

/// Re-wrap space separated PEM body fragments with the boundary markers for `label`.
///
/// Fragments are split on every single space and joined with newlines, in
/// order. Consecutive spaces produce empty lines, so the output is an exact
/// function of the input.
pub fn pem_from_fragments(label: &str, fragments: &str) -> String {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");

    std::iter::once(begin.as_str())
        .chain(fragments.split(' '))
        .chain(std::iter::once(end.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// An X.509 certificate and private key pair, PEM encoded
#[derive(Clone)]
pub struct X509Credential {
    pub certificate: String,
    pub private_key: String,
    pub passphrase: Option<String>,
}

impl X509Credential {
    /// Rebuild the device credential from the fragmented certificate and
    /// encrypted key stored in the environment.
    pub fn from_fragments(certificate: &str, private_key: &str, passphrase: &str) -> Self {
        Self {
            certificate: pem_from_fragments(CERTIFICATE_LABEL, certificate),
            private_key: pem_from_fragments(ENCRYPTED_PRIVATE_KEY_LABEL, private_key),
            passphrase: Some(passphrase.to_owned()),
        }
    }

    /// Return the private key as an unencrypted PKCS#8 PEM block.
    ///
    /// Keys that are not encrypted are returned unchanged. Encrypted keys
    /// must use PBES2 (the `openssl pkcs8 -topk8` default). The legacy
    /// PKCS#12 schemes (`-v1 PBE-SHA1-3DES`) fail with [`CertError::Decode`].
    pub fn unlocked_key(&self) -> Result<String, CertError> {
        let encrypted_marker = format!("-----BEGIN {ENCRYPTED_PRIVATE_KEY_LABEL}-----");
        if !self.private_key.contains(&encrypted_marker) {
            return Ok(self.private_key.clone());
        }

        let (_, der) = pem::decode_vec(self.private_key.as_bytes())
            .map_err(|e| CertError::Decode(e.to_string()))?;

        let info = EncryptedPrivateKeyInfo::try_from(der.as_slice())
            .map_err(|e| CertError::Decode(e.to_string()))?;
        let passphrase = self.passphrase.as_deref().unwrap_or_default();
        let document = info
            .decrypt(passphrase)
            .map_err(|e| CertError::Decrypt(e.to_string()))?;
        let unlocked = document
            .to_pem(PRIVATE_KEY_LABEL, LineEnding::LF)
            .map_err(|e| CertError::Decode(e.to_string()))?;

        Ok(unlocked.to_string())
    }
}

// Keep key material out of the debug logs
impl std::fmt::Debug for X509Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X509Credential").finish_non_exhaustive()
    }
}

/// The identity a device registers with
#[derive(Clone, Debug)]
pub struct DeviceIdentity {
    pub registration_id: Uuid,
    pub x509: Option<X509Credential>,
}

impl DeviceIdentity {
    pub fn new(registration_id: Uuid) -> Self {
        Self {
            registration_id,
            x509: None,
        }
    }

    pub fn with_x509(self, x509: X509Credential) -> Self {
        Self {
            x509: Some(x509),
            ..self
        }
    }
}
