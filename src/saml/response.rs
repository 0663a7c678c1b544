//! SAML `Response` model.
//!
//! A [`SamlResponse`] is produced either by
//! [`ResponseValidator`](super::validator::ResponseValidator), in which case
//! every check has passed, or by direct field assignment for outbound
//! generation with [`SamlResponse::to_xml`].

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use uuid::Uuid;

use super::xml::{escape_attr, escape_text};

/// Ordered multi-valued attribute map.
///
/// Repeated attribute names merge into one entry; the first value is the
/// primary value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    entries: Vec<(String, Vec<String>)>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, merging with an existing attribute of the same name.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((name, vec![value])),
        }
    }

    /// All values for `name`.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Primary (first) value for `name`.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(n, values)| (n.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut attributes = Self::new();
        for (name, value) in iter {
            attributes.push(name, value);
        }
        attributes
    }
}

/// Identity data carried by a SAML response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SamlResponse {
    pub name_id: String,
    pub attributes: Attributes,
    pub authn_instant: Option<DateTime<Utc>>,
    pub in_response_to: Option<String>,
    pub idp_entity_id: String,
    pub sp_entity_id: String,
    pub destination: Option<String>,
    /// Relay state received alongside the response.
    pub relay_state: Vec<u8>,
}

impl SamlResponse {
    /// Render an unsigned `samlp:Response` with one assertion.
    ///
    /// The assertion is issued at `issue_instant` and its conditions end at
    /// `issue_instant + validity`. `sp_entity_id` becomes the sole audience.
    pub fn to_xml(&self, issue_instant: DateTime<Utc>, validity: Duration) -> String {
        let instant = issue_instant.to_rfc3339_opts(SecondsFormat::Secs, true);
        let not_on_or_after = (issue_instant + validity).to_rfc3339_opts(SecondsFormat::Secs, true);
        let response_id = format!("_{}", Uuid::new_v4());
        let assertion_id = format!("_{}", Uuid::new_v4());

        let mut response_attrs = format!(
            r#"ID="{response_id}" Version="2.0" IssueInstant="{instant}""#
        );
        if let Some(destination) = &self.destination {
            response_attrs.push_str(&format!(r#" Destination="{}""#, escape_attr(destination)));
        }
        if let Some(in_response_to) = &self.in_response_to {
            response_attrs.push_str(&format!(
                r#" InResponseTo="{}""#,
                escape_attr(in_response_to)
            ));
        }

        let issuer = escape_text(&self.idp_entity_id);
        let audience = escape_text(&self.sp_entity_id);

        let mut confirmation = format!(r#"NotOnOrAfter="{not_on_or_after}""#);
        if let Some(destination) = &self.destination {
            confirmation.push_str(&format!(r#" Recipient="{}""#, escape_attr(destination)));
        }
        if let Some(in_response_to) = &self.in_response_to {
            confirmation.push_str(&format!(r#" InResponseTo="{}""#, escape_attr(in_response_to)));
        }

        let mut xml = format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" {response_attrs}><saml:Issuer>{issuer}</saml:Issuer><samlp:Status><samlp:StatusCode Value="urn:oasis:names:tc:SAML:2.0:status:Success"/></samlp:Status>"#
        );
        xml.push_str(&format!(
            r#"<saml:Assertion xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" ID="{assertion_id}" Version="2.0" IssueInstant="{instant}"><saml:Issuer>{issuer}</saml:Issuer>"#
        ));
        xml.push_str(&format!(
            r#"<saml:Subject><saml:NameID>{}</saml:NameID><saml:SubjectConfirmation Method="urn:oasis:names:tc:SAML:2.0:cm:bearer"><saml:SubjectConfirmationData {confirmation}/></saml:SubjectConfirmation></saml:Subject>"#,
            escape_text(&self.name_id)
        ));
        xml.push_str(&format!(
            r#"<saml:Conditions NotBefore="{instant}" NotOnOrAfter="{not_on_or_after}"><saml:AudienceRestriction><saml:Audience>{audience}</saml:Audience></saml:AudienceRestriction></saml:Conditions>"#
        ));

        let authn_instant = self
            .authn_instant
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_else(|| instant.clone());
        xml.push_str(&format!(
            r#"<saml:AuthnStatement AuthnInstant="{authn_instant}"><saml:AuthnContext><saml:AuthnContextClassRef>urn:oasis:names:tc:SAML:2.0:ac:classes:PasswordProtectedTransport</saml:AuthnContextClassRef></saml:AuthnContext></saml:AuthnStatement>"#
        ));

        if !self.attributes.is_empty() {
            xml.push_str("<saml:AttributeStatement>");
            for (name, values) in self.attributes.iter() {
                xml.push_str(&format!(r#"<saml:Attribute Name="{}">"#, escape_attr(name)));
                for value in values {
                    xml.push_str(&format!(
                        r#"<saml:AttributeValue xsi:type="xs:string">{}</saml:AttributeValue>"#,
                        escape_text(value)
                    ));
                }
                xml.push_str("</saml:Attribute>");
            }
            xml.push_str("</saml:AttributeStatement>");
        }

        xml.push_str("</saml:Assertion></samlp:Response>");
        xml
    }
}
