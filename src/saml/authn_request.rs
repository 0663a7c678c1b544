//! HTTP-Redirect `AuthnRequest` construction.

use chrono::{DateTime, SecondsFormat, Utc};
use url::Url;
use uuid::Uuid;

use super::{
    HTTP_POST_BINDING, SamlError, binding,
    idp_metadata::IdpMetadata,
    sp_metadata::SpMetadata,
    xml::{escape_attr, escape_text},
};

/// A built redirect to the IdP.
#[derive(Debug, Clone)]
pub struct AuthnRequest {
    /// Request ID; echoed by the IdP as `InResponseTo`.
    pub id: String,
    /// IdP SSO URL carrying `SAMLRequest` and `RelayState`.
    pub redirect_url: Url,
}

/// Builds one unsigned HTTP-Redirect AuthnRequest.
pub struct AuthnRequestBuilder<'a> {
    idp: &'a IdpMetadata,
    sp: &'a SpMetadata,
    relay_state: &'a str,
    force_authn: bool,
}

impl<'a> AuthnRequestBuilder<'a> {
    pub fn new(idp: &'a IdpMetadata, sp: &'a SpMetadata, relay_state: &'a str) -> Self {
        Self {
            idp,
            sp,
            relay_state,
            force_authn: false,
        }
    }

    /// Ask the IdP to re-authenticate the user even with an existing session.
    pub fn force_authn(mut self, force: bool) -> Self {
        self.force_authn = force;
        self
    }

    pub fn build(&self) -> Result<AuthnRequest, SamlError> {
        self.build_at(Utc::now())
    }

    pub fn build_at(&self, now: DateTime<Utc>) -> Result<AuthnRequest, SamlError> {
        let id = format!("_{}", Uuid::new_v4());
        let xml = self.to_xml(&id, now);

        let encoded = binding::encode_redirect(&xml)
            .map_err(|e| SamlError::Encoding(format!("deflate failed: {e}")))?;

        let mut redirect_url = Url::parse(self.idp.sso_redirect_url()).map_err(|e| {
            SamlError::MetadataFormat(format!(
                "invalid SSO URL '{}': {e}",
                self.idp.sso_redirect_url()
            ))
        })?;
        {
            let mut query = redirect_url.query_pairs_mut();
            query.append_pair("SAMLRequest", &encoded);
            if !self.relay_state.is_empty() {
                query.append_pair("RelayState", self.relay_state);
            }
        }

        tracing::debug!(
            request_id = %id,
            idp = %self.idp.entity_id(),
            "Built SAML AuthnRequest"
        );

        Ok(AuthnRequest { id, redirect_url })
    }

    fn to_xml(&self, id: &str, now: DateTime<Utc>) -> String {
        let force_authn = if self.force_authn {
            r#" ForceAuthn="true""#
        } else {
            ""
        };
        format!(
            r#"<samlp:AuthnRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="{id}" Version="2.0" IssueInstant="{instant}" Destination="{destination}" AssertionConsumerServiceURL="{acs}" ProtocolBinding="{binding}"{force_authn}><saml:Issuer>{issuer}</saml:Issuer><samlp:NameIDPolicy Format="{format}" AllowCreate="true"/></samlp:AuthnRequest>"#,
            id = id,
            instant = now.to_rfc3339_opts(SecondsFormat::Secs, true),
            destination = escape_attr(self.idp.sso_redirect_url()),
            acs = escape_attr(self.sp.assertion_consumer_url()),
            binding = HTTP_POST_BINDING,
            force_authn = force_authn,
            issuer = escape_text(self.sp.entity_id()),
            format = escape_attr(self.sp.name_id_format()),
        )
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::saml::{
        NS_ASSERTION, NS_PROTOCOL,
        certificate::test_support::generate_certificate,
        idp_metadata::test_support::idp_metadata_xml,
        xml,
    };

    fn idp() -> IdpMetadata {
        let cert = generate_certificate("idp.example");
        IdpMetadata::parse(&idp_metadata_xml(
            "https://idp.example",
            "https://idp.example/sso?tenant=1",
            &[cert.base64()],
        ))
        .unwrap()
    }

    fn decode_request(url: &Url) -> (String, Option<String>) {
        let params: std::collections::HashMap<String, String> =
            url.query_pairs().into_owned().collect();
        let xml = binding::decode_redirect(&params["SAMLRequest"]).unwrap();
        (xml, params.get("RelayState").cloned())
    }

    #[test]
    fn test_redirect_url_targets_idp() {
        let idp = idp();
        let sp = SpMetadata::new("https://sp.example", "https://sp.example/saml");
        let request = AuthnRequestBuilder::new(&idp, &sp, "opaque-token")
            .build()
            .unwrap();

        assert_eq!(request.redirect_url.host_str(), Some("idp.example"));
        assert_eq!(request.redirect_url.path(), "/sso");
        // Existing query parameters survive
        assert!(
            request
                .redirect_url
                .query_pairs()
                .any(|(k, v)| k == "tenant" && v == "1")
        );
        assert!(request.id.starts_with('_'));
    }

    #[test]
    fn test_request_contents() {
        let idp = idp();
        let sp = SpMetadata::new("https://sp.example", "https://sp.example/saml");
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let request = AuthnRequestBuilder::new(&idp, &sp, "opaque-token")
            .build_at(now)
            .unwrap();

        let (request_xml, relay_state) = decode_request(&request.redirect_url);
        assert_eq!(relay_state.as_deref(), Some("opaque-token"));

        let doc = roxmltree::Document::parse(&request_xml).unwrap();
        let root = doc.root_element();
        assert!(xml::is_element(root, NS_PROTOCOL, "AuthnRequest"));
        assert_eq!(root.attribute("ID"), Some(request.id.as_str()));
        assert_eq!(root.attribute("Version"), Some("2.0"));
        assert_eq!(root.attribute("IssueInstant"), Some("2024-05-01T12:00:00Z"));
        assert_eq!(
            root.attribute("AssertionConsumerServiceURL"),
            Some("https://sp.example/saml")
        );
        assert_eq!(root.attribute("ProtocolBinding"), Some(HTTP_POST_BINDING));
        assert_eq!(
            root.attribute("Destination"),
            Some("https://idp.example/sso?tenant=1")
        );
        assert!(root.attribute("ForceAuthn").is_none());

        let issuer = xml::child(root, NS_ASSERTION, "Issuer").unwrap();
        assert_eq!(xml::text_of(issuer).as_deref(), Some("https://sp.example"));

        let policy = xml::child(root, NS_PROTOCOL, "NameIDPolicy").unwrap();
        assert_eq!(policy.attribute("Format"), Some(sp.name_id_format()));
    }

    #[test]
    fn test_fresh_id_per_request() {
        let idp = idp();
        let sp = SpMetadata::new("https://sp.example", "https://sp.example/saml");
        let builder = AuthnRequestBuilder::new(&idp, &sp, "");
        let a = builder.build().unwrap();
        let b = builder.build().unwrap();
        assert_ne!(a.id, b.id);
        assert!(decode_request(&a.redirect_url).1.is_none());
    }

    #[test]
    fn test_force_authn() {
        let idp = idp();
        let sp = SpMetadata::new("https://sp.example", "https://sp.example/saml");
        let request = AuthnRequestBuilder::new(&idp, &sp, "x")
            .force_authn(true)
            .build()
            .unwrap();
        let (request_xml, _) = decode_request(&request.redirect_url);
        assert!(request_xml.contains(r#"ForceAuthn="true""#));
    }
}
