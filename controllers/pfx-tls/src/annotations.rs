//! Typed view of the `pfx-tls.kubernetes.io/*` annotations.
//!
//! Annotations are parsed once per reconciliation into
//! [`ConversionAnnotations`]. Keys that look like a typo of a recognized key
//! are collected so the reconciler can warn about them instead of silently
//! ignoring them.

use std::collections::BTreeMap;

/// Prefix shared by every annotation this controller reads or writes.
pub const ANNOTATION_PREFIX: &str = "pfx-tls.kubernetes.io/";

/// Trigger PFX to PEM conversion; must be exactly `"true"`
pub const ANNOTATION_CONVERT: &str = "pfx-tls.kubernetes.io/convert";
/// Inline PFX password
pub const ANNOTATION_PASSWORD: &str = "pfx-tls.kubernetes.io/password";
/// Name of a Secret (same namespace) holding the PFX password
pub const ANNOTATION_PASSWORD_SECRET_NAME: &str = "pfx-tls.kubernetes.io/password-secret-name";
/// Data key within the password Secret
pub const ANNOTATION_PASSWORD_SECRET_KEY: &str = "pfx-tls.kubernetes.io/password-secret-key";
/// Data key holding the PFX bundle
pub const ANNOTATION_PFX_DATA_KEY: &str = "pfx-tls.kubernetes.io/pfx-key";
/// Set to `"true"` once the Secret has been converted
pub const ANNOTATION_CONVERTED: &str = "pfx-tls.kubernetes.io/converted";

/// Data key used when no `pfx-key` annotation is set
pub const DEFAULT_PFX_DATA_KEY: &str = "pfx";

/// Output data key for the leaf certificate
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Output data key for the private key
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
/// Output data key for the CA chain
pub const CA_CERT_KEY: &str = "ca.crt";
/// Secret type written after conversion
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

const RECOGNIZED_SUFFIXES: [&str; 6] = [
    "convert",
    "password",
    "password-secret-name",
    "password-secret-key",
    "pfx-key",
    "converted",
];

/// Where the PFX password comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordSource {
    /// Inline annotation value, used verbatim even when empty
    Inline(String),
    /// Data key of another Secret in the same namespace
    SecretRef {
        /// Secret name
        name: String,
        /// Data key within the Secret
        key: String,
    },
    /// No password configured; the empty password is tried
    Empty,
}

/// Parsed conversion annotations of one Secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionAnnotations {
    /// `convert` annotation equals `"true"`
    pub convert: bool,
    /// `converted` annotation equals `"true"`
    pub converted: bool,
    /// Data key holding the bundle
    pub pfx_key: String,
    /// Password resolution tier
    pub password: PasswordSource,
    /// Keys that resemble recognized annotations but are not one
    pub suspicious_keys: Vec<String>,
}

impl ConversionAnnotations {
    /// Parse the annotations of a Secret; `None` behaves like an empty map.
    pub fn parse(annotations: Option<&BTreeMap<String, String>>) -> Self {
        let empty = BTreeMap::new();
        let annotations = annotations.unwrap_or(&empty);
        let get = |key: &str| annotations.get(key).map(String::as_str);

        let pfx_key = match get(ANNOTATION_PFX_DATA_KEY) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => DEFAULT_PFX_DATA_KEY.to_string(),
        };

        // Presence of the inline annotation wins, even when blank
        let password = if let Some(inline) = get(ANNOTATION_PASSWORD) {
            PasswordSource::Inline(inline.to_string())
        } else {
            match (
                get(ANNOTATION_PASSWORD_SECRET_NAME),
                get(ANNOTATION_PASSWORD_SECRET_KEY),
            ) {
                (Some(name), Some(key)) if !name.is_empty() && !key.is_empty() => {
                    PasswordSource::SecretRef {
                        name: name.to_string(),
                        key: key.to_string(),
                    }
                }
                _ => PasswordSource::Empty,
            }
        };

        Self {
            convert: get(ANNOTATION_CONVERT) == Some("true"),
            converted: get(ANNOTATION_CONVERTED) == Some("true"),
            pfx_key,
            password,
            suspicious_keys: annotations
                .keys()
                .filter(|key| is_suspicious(key))
                .cloned()
                .collect(),
        }
    }

    /// Whether the Secret asked for conversion and has not been converted yet.
    pub fn is_eligible(&self) -> bool {
        self.convert && !self.converted
    }
}

fn is_suspicious(key: &str) -> bool {
    if let Some(suffix) = key.strip_prefix(ANNOTATION_PREFIX) {
        return !RECOGNIZED_SUFFIXES.contains(&suffix);
    }
    // e.g. `pfx-tls.kubernetes.com/convert` or a bare `convert`
    let (prefix, last_segment) = key.rsplit_once('/').unwrap_or(("", key));
    RECOGNIZED_SUFFIXES.contains(&last_segment) && (prefix.is_empty() || prefix.contains("pfx"))
}
