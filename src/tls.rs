//! # TLS Material
//!
//! Private key and CSR handling for the registry unit.
//!
//! The unit generates its own key pair locally; only the CSR ever crosses
//! the certificates relation. A signed certificate is applied only when it
//! matches the CSR currently on record. Removing the certificates relation
//! tears all material down and reverts the unit to a non-TLS configuration.

use base64::{engine::general_purpose::STANDARD, Engine};
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair, SanType};

use crate::errors::LifecycleError;

/// TLS material held for a unit, tied to the issuing certificates relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// Unit private key in PEM format (never leaves the unit)
    pub private_key: String,
    /// Certificate signing request emitted on the certificates relation
    pub certificate_signing_request: String,
    /// Signed certificate, present once the provider has responded
    pub signed_certificate: Option<String>,
    /// CA certificate supplied alongside the signed certificate
    pub ca_certificate: Option<String>,
    /// Relation id of the issuing certificates relation
    pub issuer_relation_id: String,
}

impl TlsMaterial {
    /// Whether a signed certificate has been applied.
    #[must_use]
    pub fn is_signed(&self) -> bool {
        self.signed_certificate.is_some()
    }
}

/// Generate a fresh private key in PEM format.
pub fn generate_private_key() -> Result<String, LifecycleError> {
    let key_pair = KeyPair::generate()
        .map_err(|e| LifecycleError::InvalidKeyMaterial(format!("key generation failed: {e}")))?;
    Ok(key_pair.serialize_pem())
}

/// Generate a CSR from an existing private key.
///
/// `subject` becomes the common name; `sans` are added as DNS subject
/// alternative names.
pub fn generate_csr(
    private_key_pem: &str,
    subject: &str,
    sans: &[String],
) -> Result<String, LifecycleError> {
    let key_pair = KeyPair::from_pem(private_key_pem)
        .map_err(|e| LifecycleError::InvalidKeyMaterial(format!("unusable private key: {e}")))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, DnValue::Utf8String(subject.to_string()));
    params.distinguished_name = dn;
    for san in sans {
        let name = san.clone().try_into().map_err(|e| {
            LifecycleError::InvalidKeyMaterial(format!("invalid SAN '{san}': {e}"))
        })?;
        params.subject_alt_names.push(SanType::DnsName(name));
    }

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| LifecycleError::InvalidKeyMaterial(format!("failed to create CSR: {e}")))?;
    csr.pem()
        .map_err(|e| LifecycleError::InvalidKeyMaterial(format!("failed to serialize CSR: {e}")))
}

/// Validate that a PEM string holds a structurally correct private key.
pub fn validate_private_key(key_pem: &str) -> Result<(), LifecycleError> {
    pem::parse(key_pem.as_bytes())
        .map_err(|e| LifecycleError::InvalidKeyMaterial(format!("not valid PEM: {e}")))?;
    KeyPair::from_pem(key_pem)
        .map_err(|e| LifecycleError::InvalidKeyMaterial(format!("not a usable key pair: {e}")))?;
    Ok(())
}

/// Normalize caller-supplied key material.
///
/// Accepts raw PEM or base64-wrapped PEM, matching what operators tend to
/// paste into an action parameter. The result is validated before use.
pub fn normalize_private_key(input: &str) -> Result<String, LifecycleError> {
    let trimmed = input.trim();
    let key = if trimmed.starts_with("-----BEGIN") {
        trimmed.to_string()
    } else {
        let decoded = STANDARD
            .decode(trimmed)
            .map_err(|e| LifecycleError::InvalidKeyMaterial(format!("not PEM or base64: {e}")))?;
        String::from_utf8(decoded)
            .map_err(|e| LifecycleError::InvalidKeyMaterial(format!("not UTF-8 PEM: {e}")))?
    };

    validate_private_key(&key)?;
    Ok(key)
}
