//! Service-provider descriptor and its published metadata document.

use serde::Deserialize;

use super::{NAMEID_FORMAT_UNSPECIFIED, xml::{escape_attr, escape_text}};

/// Organization published in SP metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Organization {
    pub name: String,
    pub display_name: String,
    pub url: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    Technical,
    Support,
    Administrative,
    Billing,
    Other,
}

impl ContactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactType::Technical => "technical",
            ContactType::Support => "support",
            ContactType::Administrative => "administrative",
            ContactType::Billing => "billing",
            ContactType::Other => "other",
        }
    }
}

/// Contact person published in SP metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContactPerson {
    pub contact_type: ContactType,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Description of this service provider.
///
/// Used to build AuthnRequests, to check inbound audience restrictions, and to
/// render the metadata document served to IdPs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpMetadata {
    entity_id: String,
    assertion_consumer_url: String,
    name_id_format: String,
    organization: Option<Organization>,
    contacts: Vec<ContactPerson>,
}

impl SpMetadata {
    pub fn new(entity_id: impl Into<String>, assertion_consumer_url: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            assertion_consumer_url: assertion_consumer_url.into(),
            name_id_format: NAMEID_FORMAT_UNSPECIFIED.to_string(),
            organization: None,
            contacts: Vec::new(),
        }
    }

    pub fn with_name_id_format(mut self, format: impl Into<String>) -> Self {
        self.name_id_format = format.into();
        self
    }

    pub fn with_organization(mut self, organization: Organization) -> Self {
        self.organization = Some(organization);
        self
    }

    pub fn with_contact(mut self, contact: ContactPerson) -> Self {
        self.contacts.push(contact);
        self
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn assertion_consumer_url(&self) -> &str {
        &self.assertion_consumer_url
    }

    pub fn name_id_format(&self) -> &str {
        &self.name_id_format
    }

    pub fn organization(&self) -> Option<&Organization> {
        self.organization.as_ref()
    }

    pub fn contacts(&self) -> &[ContactPerson] {
        &self.contacts
    }

    /// Whether an `Audience` value names this SP.
    ///
    /// A leading `spn:` is ignored and the comparison is case-insensitive.
    pub fn matches_audience(&self, audience: &str) -> bool {
        let audience = audience.trim();
        let audience = match audience.get(..4) {
            Some(prefix) if prefix.eq_ignore_ascii_case("spn:") => &audience[4..],
            _ => audience,
        };
        audience.eq_ignore_ascii_case(&self.entity_id)
    }

    /// Render the `md:EntityDescriptor` document for this SP.
    pub fn to_xml(&self) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{}">
  <md:SPSSODescriptor AuthnRequestsSigned="false" WantAssertionsSigned="true" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">"#,
            escape_attr(&self.entity_id)
        );

        xml.push_str(&format!(
            r#"
    <md:NameIDFormat>{}</md:NameIDFormat>"#,
            escape_text(&self.name_id_format)
        ));

        xml.push_str(&format!(
            r#"
    <md:AssertionConsumerService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{}" index="0" isDefault="true"/>
  </md:SPSSODescriptor>"#,
            escape_attr(&self.assertion_consumer_url)
        ));

        // Organization and ContactPerson follow the role descriptor
        if let Some(org) = &self.organization {
            let lang = escape_attr(&org.language);
            xml.push_str(&format!(
                r#"
  <md:Organization>
    <md:OrganizationName xml:lang="{lang}">{}</md:OrganizationName>
    <md:OrganizationDisplayName xml:lang="{lang}">{}</md:OrganizationDisplayName>
    <md:OrganizationURL xml:lang="{lang}">{}</md:OrganizationURL>
  </md:Organization>"#,
                escape_text(&org.name),
                escape_text(&org.display_name),
                escape_text(&org.url),
            ));
        }

        for contact in &self.contacts {
            xml.push_str(&format!(
                r#"
  <md:ContactPerson contactType="{}">"#,
                contact.contact_type.as_str()
            ));
            let fields = [
                ("Company", &contact.company),
                ("GivenName", &contact.given_name),
                ("SurName", &contact.surname),
            ];
            for (element, value) in fields {
                if let Some(value) = value {
                    xml.push_str(&format!(
                        "\n    <md:{element}>{}</md:{element}>",
                        escape_text(value)
                    ));
                }
            }
            if let Some(email) = &contact.email {
                xml.push_str(&format!(
                    "\n    <md:EmailAddress>mailto:{}</md:EmailAddress>",
                    escape_text(email.trim_start_matches("mailto:"))
                ));
            }
            xml.push_str("\n  </md:ContactPerson>");
        }

        xml.push_str("\n</md:EntityDescriptor>");
        xml
    }
}

/// Derive the assertion consumer URL from an SP entity ID that is a URL,
/// placing `callback_path` at its origin.
///
/// `https://sp.example.com/app` with `/saml` becomes
/// `https://sp.example.com/saml`. Returns `None` when the entity ID is not an
/// absolute URL with a host.
pub fn derive_acs_url_from_entity_id(sp_entity_id: &str, callback_path: &str) -> Option<String> {
    let url = url::Url::parse(sp_entity_id).ok()?;

    let scheme = url.scheme();
    let host = url.host_str()?;
    let path = callback_path.trim_start_matches('/');

    let acs_url = if let Some(port) = url.port() {
        format!("{}://{}:{}/{}", scheme, host, port, path)
    } else {
        format!("{}://{}/{}", scheme, host, path)
    };

    Some(acs_url)
}
