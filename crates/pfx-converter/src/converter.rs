//! PFX to PEM conversion.

use crate::error::{ConvertError, DecodeFailure};
use openssl::error::ErrorStack;
use openssl::pkcs12::Pkcs12;
use openssl::provider::Provider;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// PEM encoded output of a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemBundle {
    /// Leaf certificate, one `CERTIFICATE` block
    pub certificate: Vec<u8>,
    /// Private key, one PKCS#8 `PRIVATE KEY` block
    pub private_key: Vec<u8>,
    /// Chain certificates in bundle order, `None` when the bundle has no chain
    pub ca_chain: Option<Vec<u8>>,
}

/// Converts a binary certificate bundle into PEM.
///
/// Implemented by [`PfxConverter`]; the trait exists so callers can substitute
/// the conversion step in tests.
pub trait CertificateConverter: Send + Sync {
    /// Decode `bundle` with `password` and re-encode it as PEM.
    ///
    /// An empty `password` is attempted as-is.
    fn convert(&self, bundle: &[u8], password: &str) -> Result<PemBundle, ConvertError>;
}

/// PKCS#12 (PFX) converter backed by OpenSSL.
///
/// OpenSSL 3 only ships modern PBE ciphers in its default provider. Bundles
/// exported by Windows, older `keytool` releases or `openssl pkcs12 -legacy`
/// use RC2/3DES and need the `legacy` provider, see
/// [`PfxConverter::with_legacy_algorithms`].
#[derive(Clone, Default)]
pub struct PfxConverter {
    // Unloaded when the last converter clone is dropped
    legacy: Option<Arc<Provider>>,
}

impl fmt::Debug for PfxConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PfxConverter")
            .field("legacy_algorithms", &self.legacy.is_some())
            .finish()
    }
}

impl PfxConverter {
    /// Creates a new PFX converter using only OpenSSL's default algorithms
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a converter that can also decode bundles sealed with legacy
    /// ciphers (`pbeWithSHA1And40BitRC2-CBC`, `pbeWithSHA1And3-KeyTripleDES-CBC`).
    ///
    /// Loads OpenSSL's `legacy` provider into the default library context
    /// while keeping the default provider available.
    pub fn with_legacy_algorithms() -> Result<Self, ErrorStack> {
        let provider = Provider::try_load(None, "legacy", true)?;
        info!("Loaded OpenSSL legacy provider for PKCS#12 decoding");
        Ok(Self {
            legacy: Some(Arc::new(provider)),
        })
    }

    /// Whether the legacy provider is loaded.
    pub fn supports_legacy_algorithms(&self) -> bool {
        self.legacy.is_some()
    }
}

impl CertificateConverter for PfxConverter {
    fn convert(&self, bundle: &[u8], password: &str) -> Result<PemBundle, ConvertError> {
        // OpenSSL takes a C string; an interior NUL would truncate or abort
        if password.contains('\0') {
            return Err(DecodeFailure::PasswordContainsNul.into());
        }

        let parsed = Pkcs12::from_der(bundle)
            .and_then(|pkcs12| pkcs12.parse2(password))
            .map_err(DecodeFailure::Parse)?;

        let private_key = parsed.pkey.ok_or(DecodeFailure::MissingPrivateKey)?;
        let certificate = parsed.cert.ok_or(DecodeFailure::MissingCertificate)?;

        // PEM of the DER as stored in the bundle
        let certificate_pem = certificate
            .to_pem()
            .map_err(ConvertError::encode("certificate"))?;

        let key_pem = private_key
            .private_key_to_pem_pkcs8()
            .map_err(ConvertError::encode("private key"))?;

        let mut chain_pem = Vec::new();
        let mut chain_len = 0usize;
        if let Some(chain) = parsed.ca.as_ref() {
            for ca in chain {
                chain_pem.extend_from_slice(
                    &ca.to_pem().map_err(ConvertError::encode("CA certificate"))?,
                );
                chain_len += 1;
            }
        }
        debug!(chain_len, "Decoded PFX bundle");

        Ok(PemBundle {
            certificate: certificate_pem,
            private_key: key_pem,
            ca_chain: (!chain_pem.is_empty()).then_some(chain_pem),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_is_rejected() {
        let result = PfxConverter::new().convert(b"", "");
        assert!(matches!(result, Err(ConvertError::Decode(_))));
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = PfxConverter::new()
            .convert(b"definitely not a pkcs12 container", "changeit")
            .expect_err("garbage must not decode");
        assert!(matches!(err, ConvertError::Decode(DecodeFailure::Parse(_))));
        assert!(err.to_string().starts_with("failed to decode PFX"));
    }

    #[test]
    fn test_password_with_nul_is_decode_error() {
        for password in ["changeit\0", "\0", "chan\0geit"] {
            let err = PfxConverter::new()
                .convert(b"definitely not a pkcs12 container", password)
                .expect_err("NUL in password must be rejected");
            assert!(matches!(
                err,
                ConvertError::Decode(DecodeFailure::PasswordContainsNul)
            ));
        }
    }
}
