//! Converter errors

use openssl::error::ErrorStack;
use thiserror::Error;

/// Why a PKCS#12 bundle could not be decoded.
///
/// Wrong passwords and corrupt containers are indistinguishable at this level;
/// both surface as [`DecodeFailure::Parse`].
#[derive(Debug, Error)]
pub enum DecodeFailure {
    /// The DER structure or the MAC/password check failed
    #[error("invalid PKCS#12 data or wrong password")]
    Parse(#[source] ErrorStack),

    /// The password contains a NUL byte and cannot be passed to OpenSSL
    #[error("password contains a NUL byte")]
    PasswordContainsNul,

    /// The bundle decoded but holds no private key
    #[error("bundle contains no private key")]
    MissingPrivateKey,

    /// The bundle decoded but holds no leaf certificate
    #[error("bundle contains no certificate")]
    MissingCertificate,
}

/// Errors that can occur while converting a PFX bundle to PEM
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The binary bundle could not be decoded
    #[error("failed to decode PFX")]
    Decode(#[from] DecodeFailure),

    /// A decoded object could not be re-encoded as PEM
    #[error("failed to encode {what} as PEM")]
    Encode {
        /// Which object failed to encode
        what: &'static str,
        /// Underlying OpenSSL error
        #[source]
        source: ErrorStack,
    },
}

impl ConvertError {
    pub(crate) fn encode(what: &'static str) -> impl FnOnce(ErrorStack) -> Self {
        move |source| Self::Encode { what, source }
    }
}
