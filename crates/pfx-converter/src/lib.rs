//! PFX Converter
//!
//! Turns a password-protected PKCS#12 (PFX) bundle into the three PEM
//! documents a `kubernetes.io/tls` Secret carries: leaf certificate,
//! PKCS#8 private key and, when present, the CA chain.
//!
//! # Example
//!
//! ```no_run
//! use pfx_converter::{CertificateConverter, PfxConverter};
//!
//! # fn example(pfx: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let pem = PfxConverter::new().convert(pfx, "changeit")?;
//! assert!(pem.certificate.starts_with(b"-----BEGIN CERTIFICATE-----"));
//! # Ok(())
//! # }
//! ```

pub mod converter;
pub mod error;
#[cfg(feature = "test-util")]
pub mod fixtures;

pub use converter::{CertificateConverter, PemBundle, PfxConverter};
pub use error::{ConvertError, DecodeFailure};
