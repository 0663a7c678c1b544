//! IdP signing certificates and the pinning registry.
//!
//! Trust is established by exact match against the certificates published in
//! IdP metadata, not by PKI chain validation. Certificates are keyed by their
//! canonical base64 form (all whitespace removed).

use std::{collections::HashSet, fmt, hash};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use openssl::{
    asn1::{Asn1Time, Asn1TimeRef},
    x509::X509,
};

#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    #[error("certificate is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("certificate is not a valid X.509 DER structure: {0}")]
    Parse(#[from] openssl::error::ErrorStack),

    #[error("certificate validity period is out of range")]
    Validity,
}

/// Strip whitespace (space, tab, CR, LF) from base64 certificate text.
pub fn canonicalize_base64(encoded: &str) -> String {
    encoded
        .chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\r' | '\n'))
        .collect()
}

/// Strip PEM headers/footers, leaving the base64 body.
pub fn strip_pem_headers(pem: &str) -> String {
    pem.lines()
        .filter(|line| !line.starts_with("-----"))
        .collect::<Vec<_>>()
        .join("")
}

/// A parsed X.509 certificate with its canonical base64 form.
#[derive(Clone)]
pub struct Certificate {
    canonical: String,
    x509: X509,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl Certificate {
    /// Parse base64-encoded DER, as found in `ds:X509Certificate` elements.
    pub fn from_base64(encoded: &str) -> Result<Self, CertificateError> {
        let canonical = canonicalize_base64(encoded);
        let der = STANDARD.decode(&canonical)?;
        let x509 = X509::from_der(&der)?;
        let not_before = asn1_to_utc(x509.not_before())?;
        let not_after = asn1_to_utc(x509.not_after())?;
        Ok(Self {
            canonical,
            x509,
            not_before,
            not_after,
        })
    }

    /// Parse a PEM certificate.
    pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
        Self::from_base64(&strip_pem_headers(pem))
    }

    pub fn canonical_base64(&self) -> &str {
        &self.canonical
    }

    pub fn der(&self) -> Result<Vec<u8>, CertificateError> {
        Ok(self.x509.to_der()?)
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Whether `now` falls within `[not_before, not_after]`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now && now <= self.not_after
    }

    /// Subject common name, for logging.
    pub fn subject_name(&self) -> String {
        self.x509
            .subject_name()
            .entries()
            .map(|e| String::from_utf8_lossy(e.data().as_slice()).into_owned())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn asn1_to_utc(time: &Asn1TimeRef) -> Result<DateTime<Utc>, CertificateError> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0).ok_or(CertificateError::Validity)
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Certificate {}

impl hash::Hash for Certificate {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject_name())
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

/// Set of certificates trusted to sign assertions for one IdP.
///
/// Order and duplicates are preserved as published; lookups go through a
/// canonical-form index. Every registered certificate verifies signatures,
/// which is what makes key rotation work.
#[derive(Debug, Clone, Default)]
pub struct CertificateRegistry {
    certificates: Vec<Certificate>,
    index: HashSet<String>,
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, certificate: Certificate) {
        self.index.insert(certificate.canonical.clone());
        self.certificates.push(certificate);
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter()
    }

    /// Whether the (possibly whitespace-formatted) base64 certificate is pinned.
    pub fn contains(&self, encoded: &str) -> bool {
        self.index.contains(&canonicalize_base64(encoded))
    }

    /// The pinned certificate matching `encoded`, if any.
    pub fn get(&self, encoded: &str) -> Option<&Certificate> {
        let canonical = canonicalize_base64(encoded);
        self.certificates.iter().find(|c| c.canonical == canonical)
    }

    /// First certificate whose validity window contains the current time.
    pub fn select_currently_signing(&self) -> Option<&Certificate> {
        self.select_signing_at(Utc::now())
    }

    /// First certificate whose validity window contains `now`.
    pub fn select_signing_at(&self, now: DateTime<Utc>) -> Option<&Certificate> {
        self.certificates.iter().find(|c| c.is_valid_at(now))
    }

    /// Latest `not_after` across all certificates.
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.certificates.iter().map(|c| c.not_after).max()
    }

    /// Order-independent comparison of the pinned certificate sets.
    pub fn same_certificates(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl FromIterator<Certificate> for CertificateRegistry {
    fn from_iter<I: IntoIterator<Item = Certificate>>(iter: I) -> Self {
        let mut registry = Self::new();
        for certificate in iter {
            registry.add(certificate);
        }
        registry
    }
}
