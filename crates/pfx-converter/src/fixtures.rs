//! Test fixtures: freshly minted PKCS#12 bundles.
//!
//! Builds a self-signed root, `chain_len - 1` intermediates and a leaf
//! signed by the last CA, then packs leaf + key + chain into a PFX.

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::{X509, X509Name, X509NameBuilder, X509NameRef};

/// A generated bundle together with the objects it was built from.
#[derive(Debug)]
pub struct BundleFixture {
    /// DER encoded PKCS#12 container
    pub pfx: Vec<u8>,
    /// Password the container was sealed with
    pub password: String,
    /// Leaf private key
    pub private_key: PKey<Private>,
    /// Leaf certificate
    pub certificate: X509,
    /// Chain certificates in the order they were placed in the bundle
    pub chain: Vec<X509>,
}

fn generate_key() -> Result<PKey<Private>, ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    PKey::from_ec_key(EcKey::generate(&group)?)
}

fn name(common_name: &str) -> Result<X509Name, ErrorStack> {
    let mut builder = X509NameBuilder::new()?;
    builder.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    Ok(builder.build())
}

fn certificate(
    serial: u32,
    subject: &str,
    issuer: &X509NameRef,
    public_key: &PKey<Private>,
    signing_key: &PKey<Private>,
) -> Result<X509, ErrorStack> {
    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let serial = BigNum::from_u32(serial)?.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    let subject_name = name(subject)?;
    builder.set_subject_name(&subject_name)?;
    builder.set_issuer_name(issuer)?;
    builder.set_pubkey(public_key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(30)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.sign(signing_key, MessageDigest::sha256())?;
    Ok(builder.build())
}

/// Build a PFX holding a leaf key, a leaf certificate and `chain_len` CA certificates.
///
/// The chain is ordered leaf-issuer first, root last.
pub fn build_bundle(
    common_name: &str,
    chain_len: usize,
    password: &str,
) -> Result<BundleFixture, ErrorStack> {
    build(common_name, chain_len, password, false)
}

/// Like [`build_bundle`], but sealed the way `openssl pkcs12 -export -legacy`
/// and Windows exports do: RC2-40 for certificates, 3DES for the key, SHA-1 MAC.
///
/// OpenSSL's `legacy` provider must be loaded, e.g. by holding a
/// [`PfxConverter::with_legacy_algorithms`](crate::PfxConverter::with_legacy_algorithms).
pub fn build_legacy_bundle(
    common_name: &str,
    chain_len: usize,
    password: &str,
) -> Result<BundleFixture, ErrorStack> {
    build(common_name, chain_len, password, true)
}

fn build(
    common_name: &str,
    chain_len: usize,
    password: &str,
    legacy: bool,
) -> Result<BundleFixture, ErrorStack> {
    let mut serial = 1u32;
    let mut cas: Vec<(X509, PKey<Private>)> = Vec::with_capacity(chain_len);

    for depth in 0..chain_len {
        let key = generate_key()?;
        let subject = format!("{common_name} CA {depth}");
        let cert = match cas.last() {
            Some((parent, parent_key)) => {
                certificate(serial, &subject, parent.subject_name(), &key, parent_key)?
            }
            None => {
                let self_signed = name(&subject)?;
                certificate(serial, &subject, &self_signed, &key, &key)?
            }
        };
        serial += 1;
        cas.push((cert, key));
    }

    let private_key = generate_key()?;
    let leaf = match cas.last() {
        Some((issuer, issuer_key)) => {
            certificate(serial, common_name, issuer.subject_name(), &private_key, issuer_key)?
        }
        None => {
            let subject = name(common_name)?;
            certificate(serial, common_name, &subject, &private_key, &private_key)?
        }
    };

    // Root was minted first; bundles conventionally list the issuer first
    let chain: Vec<X509> = cas.into_iter().rev().map(|(cert, _)| cert).collect();

    let mut builder = Pkcs12::builder();
    builder.name(common_name).pkey(&private_key).cert(&leaf);
    if legacy {
        builder
            .cert_algorithm(Nid::PBE_WITHSHA1AND40BITRC2_CBC)
            .key_algorithm(Nid::PBE_WITHSHA1AND3_KEY_TRIPLEDES_CBC)
            .mac_md(MessageDigest::sha1());
    }
    if !chain.is_empty() {
        let mut stack: Stack<X509> = Stack::new()?;
        for cert in &chain {
            stack.push(cert.clone())?;
        }
        builder.ca(stack);
    }
    let pfx = builder.build2(password)?.to_der()?;

    Ok(BundleFixture {
        pfx,
        password: password.to_string(),
        private_key,
        certificate: leaf,
        chain,
    })
}
