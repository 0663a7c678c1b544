//! IdP metadata (`md:EntityDescriptor`) parsing.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};

use super::{
    HTTP_REDIRECT_BINDING, NS_DSIG, NS_METADATA, SamlError,
    certificate::{Certificate, CertificateRegistry},
    xml,
};

/// What this service provider needs to know about one identity provider.
#[derive(Debug, Clone)]
pub struct IdpMetadata {
    entity_id: String,
    sso_redirect_url: String,
    slo_redirect_url: Option<String>,
    certificates: CertificateRegistry,
    name_id_formats: BTreeSet<String>,
}

impl IdpMetadata {
    /// Build metadata from parts.
    ///
    /// Fails if the SSO URL is empty or no signing certificate is given.
    pub fn new(
        entity_id: impl Into<String>,
        sso_redirect_url: impl Into<String>,
        slo_redirect_url: Option<String>,
        certificates: Vec<Certificate>,
        name_id_formats: impl IntoIterator<Item = String>,
    ) -> Result<Self, SamlError> {
        let sso_redirect_url = sso_redirect_url.into();
        if sso_redirect_url.trim().is_empty() {
            return Err(SamlError::MetadataFormat(
                "SingleSignOnService Location is empty".to_string(),
            ));
        }
        if certificates.is_empty() {
            return Err(SamlError::MetadataFormat(
                "no signing certificate found".to_string(),
            ));
        }
        Ok(Self {
            entity_id: entity_id.into(),
            sso_redirect_url,
            slo_redirect_url,
            certificates: certificates.into_iter().collect(),
            name_id_formats: name_id_formats.into_iter().collect(),
        })
    }

    /// Parse an `EntityDescriptor` document.
    ///
    /// An `EntitiesDescriptor` root is accepted when it contains an entity
    /// with an `IDPSSODescriptor`.
    pub fn parse(metadata_xml: &str) -> Result<Self, SamlError> {
        let doc = Document::parse(metadata_xml)
            .map_err(|e| SamlError::MetadataFormat(format!("XML parse error: {e}")))?;

        let root = doc.root_element();
        let entity = if xml::is_element(root, NS_METADATA, "EntityDescriptor") {
            root
        } else if xml::is_element(root, NS_METADATA, "EntitiesDescriptor") {
            xml::descendants(root, NS_METADATA, "EntityDescriptor")
                .find(|e| xml::child(*e, NS_METADATA, "IDPSSODescriptor").is_some())
                .ok_or_else(|| {
                    SamlError::MetadataFormat("no EntityDescriptor with an IDPSSODescriptor".into())
                })?
        } else {
            return Err(SamlError::MetadataFormat(format!(
                "expected EntityDescriptor root, found '{}'",
                root.tag_name().name()
            )));
        };

        let entity_id = entity
            .attribute("entityID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| SamlError::MetadataFormat("EntityDescriptor has no entityID".into()))?
            .to_string();

        let idp = xml::child(entity, NS_METADATA, "IDPSSODescriptor")
            .ok_or_else(|| SamlError::MetadataFormat("IDPSSODescriptor is missing".into()))?;

        let sso_redirect_url = redirect_location(idp, "SingleSignOnService").ok_or_else(|| {
            SamlError::MetadataFormat(
                "no SingleSignOnService with the HTTP-Redirect binding".to_string(),
            )
        })?;
        let slo_redirect_url = redirect_location(idp, "SingleLogoutService");

        let mut certificates = Vec::new();
        for key in xml::children(idp, NS_METADATA, "KeyDescriptor") {
            if key.attribute("use") != Some("signing") {
                continue;
            }
            for cert in xml::descendants(key, NS_DSIG, "X509Certificate") {
                let Some(text) = xml::text_of(cert) else {
                    continue;
                };
                let certificate = Certificate::from_base64(&text).map_err(|e| {
                    SamlError::MetadataFormat(format!("invalid signing certificate: {e}"))
                })?;
                certificates.push(certificate);
            }
        }

        let name_id_formats = xml::children(idp, NS_METADATA, "NameIDFormat")
            .filter_map(xml::text_of)
            .collect::<Vec<_>>();

        let metadata = Self::new(
            entity_id,
            sso_redirect_url,
            slo_redirect_url,
            certificates,
            name_id_formats,
        )?;

        tracing::debug!(
            entity_id = %metadata.entity_id,
            sso_url = %metadata.sso_redirect_url,
            certificates = metadata.certificates.len(),
            "Parsed IdP metadata"
        );

        Ok(metadata)
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn sso_redirect_url(&self) -> &str {
        &self.sso_redirect_url
    }

    pub fn slo_redirect_url(&self) -> Option<&str> {
        self.slo_redirect_url.as_deref()
    }

    pub fn certificates(&self) -> &CertificateRegistry {
        &self.certificates
    }

    pub fn name_id_formats(&self) -> &BTreeSet<String> {
        &self.name_id_formats
    }

    /// Latest expiry across the signing certificates.
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.certificates.valid_until()
    }
}

impl PartialEq for IdpMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.sso_redirect_url == other.sso_redirect_url
            && self.slo_redirect_url == other.slo_redirect_url
            && self.certificates.same_certificates(&other.certificates)
            && self.name_id_formats == other.name_id_formats
    }
}

/// Location of the first `service` element using the HTTP-Redirect binding.
fn redirect_location(idp: Node<'_, '_>, service: &str) -> Option<String> {
    xml::children(idp, NS_METADATA, service)
        .find(|s| {
            s.attribute("Binding")
                .is_some_and(|b| b.trim().eq_ignore_ascii_case(HTTP_REDIRECT_BINDING))
        })
        .and_then(|s| s.attribute("Location"))
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}
