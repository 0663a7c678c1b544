//! Inbound `Response` validation.
//!
//! Validation is a linear chain of stages. Each stage either advances or
//! aborts with a distinct [`SamlError`]; no partially validated response is
//! ever returned.
//!
//! ```text
//! Received -> Decoded -> Parsed -> AudienceChecked -> TemporallyValid
//!          -> SignatureVerified -> Accepted
//! ```

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use roxmltree::{Document, Node};

use super::{
    NS_ASSERTION, NS_PROTOCOL, NS_XSI, SamlError, binding,
    idp_metadata::IdpMetadata,
    response::{Attributes, SamlResponse},
    signature,
    sp_metadata::SpMetadata,
    xml,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationStage {
    Received,
    Decoded,
    Parsed,
    AudienceChecked,
    TemporallyValid,
    SignatureVerified,
    Accepted,
}

/// Validates POSTed responses issued by one IdP for one SP.
pub struct ResponseValidator<'a> {
    idp: &'a IdpMetadata,
    sp: &'a SpMetadata,
}

impl<'a> ResponseValidator<'a> {
    pub fn new(idp: &'a IdpMetadata, sp: &'a SpMetadata) -> Self {
        Self { idp, sp }
    }

    /// Validate the base64 `SAMLResponse` form value.
    pub fn validate(&self, encoded: Option<&str>) -> Result<SamlResponse, SamlError> {
        self.validate_at(encoded, Utc::now())
    }

    /// Validate as if the current time were `now`.
    pub fn validate_at(
        &self,
        encoded: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SamlResponse, SamlError> {
        let document_xml = decode(encoded)?;
        trace_stage(ValidationStage::Decoded);

        let doc = Document::parse(&document_xml)
            .map_err(|e| SamlError::MalformedResponse(format!("XML parse error: {e}")))?;
        let parsed = ParsedResponse::from_document(&doc)?;
        trace_stage(ValidationStage::Parsed);

        check_audience(&parsed, self.sp)?;
        trace_stage(ValidationStage::AudienceChecked);

        check_conditions(&parsed, now)?;
        trace_stage(ValidationStage::TemporallyValid);

        signature::verify_enveloped(parsed.assertion, self.idp.certificates())?;
        trace_stage(ValidationStage::SignatureVerified);

        let response = parsed.into_response(self.idp, self.sp);
        trace_stage(ValidationStage::Accepted);
        Ok(response)
    }
}

fn trace_stage(stage: ValidationStage) {
    tracing::trace!(stage = ?stage, "SAML response advanced");
}

/// Base64-decode the POSTed value; inflate it if it is deflated.
fn decode(encoded: Option<&str>) -> Result<String, SamlError> {
    let encoded = encoded
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SamlError::MissingResponse)?;

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| SamlError::MalformedResponse(format!("invalid base64: {e}")))?;

    // The POST binding does not deflate, but some IdPs do anyway.
    let xml_bytes = if looks_like_xml(&bytes) {
        bytes
    } else {
        binding::inflate(&bytes)
            .map_err(|e| SamlError::MalformedResponse(format!("inflate failed: {e}")))?
    };
    String::from_utf8(xml_bytes)
        .map_err(|e| SamlError::MalformedResponse(format!("invalid UTF-8: {e}")))
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'<')
}

/// Data extracted from the document, before any checks.
struct ParsedResponse<'a, 'input> {
    assertion: Node<'a, 'input>,
    name_id: String,
    attributes: Attributes,
    audiences: Vec<String>,
    not_on_or_after: Vec<&'a str>,
    authn_instant: Option<DateTime<Utc>>,
    in_response_to: Option<String>,
    destination: Option<String>,
    issuer: Option<String>,
}

impl<'a, 'input> ParsedResponse<'a, 'input> {
    fn from_document(doc: &'a Document<'input>) -> Result<Self, SamlError> {
        let root = doc.root_element();

        let mut assertions = doc
            .descendants()
            .filter(|n| xml::is_element(*n, NS_ASSERTION, "Assertion"));
        let assertion = assertions
            .next()
            .ok_or_else(|| SamlError::MalformedResponse("no Assertion element".to_string()))?;
        if assertions.next().is_some() {
            return Err(SamlError::MalformedResponse(
                "multiple Assertion elements".to_string(),
            ));
        }

        let (in_response_to, destination) = if xml::is_element(root, NS_PROTOCOL, "Response") {
            (
                root.attribute("InResponseTo").map(str::to_string),
                root.attribute("Destination").map(str::to_string),
            )
        } else {
            (None, None)
        };

        let issuer = xml::child(assertion, NS_ASSERTION, "Issuer")
            .or_else(|| xml::child(root, NS_ASSERTION, "Issuer"))
            .and_then(xml::text_of);

        let name_id = xml::child(assertion, NS_ASSERTION, "Subject")
            .and_then(|s| xml::child(s, NS_ASSERTION, "NameID"))
            .and_then(xml::text_of)
            .ok_or(SamlError::MissingSubject)?;

        let mut attributes = Attributes::new();
        for statement in xml::children(assertion, NS_ASSERTION, "AttributeStatement") {
            for attribute in xml::children(statement, NS_ASSERTION, "Attribute") {
                let Some(name) = attribute.attribute("Name") else {
                    continue;
                };
                for value in xml::children(attribute, NS_ASSERTION, "AttributeValue") {
                    if !is_string_value(value) {
                        continue;
                    }
                    attributes.push(name, xml::text_of(value).unwrap_or_default());
                }
            }
        }

        let conditions: Vec<Node<'a, 'input>> =
            xml::children(assertion, NS_ASSERTION, "Conditions").collect();
        let audiences = conditions
            .iter()
            .flat_map(|c| xml::children(*c, NS_ASSERTION, "AudienceRestriction"))
            .flat_map(|r| xml::children(r, NS_ASSERTION, "Audience"))
            .filter_map(xml::text_of)
            .collect();
        let not_on_or_after = conditions
            .iter()
            .filter_map(|c| c.attribute("NotOnOrAfter"))
            .collect();

        let authn_instant = match xml::child(assertion, NS_ASSERTION, "AuthnStatement")
            .and_then(|s| s.attribute("AuthnInstant"))
        {
            Some(value) => Some(parse_instant(value).ok_or_else(|| {
                SamlError::MalformedResponse(format!("invalid AuthnInstant '{value}'"))
            })?),
            None => None,
        };

        Ok(Self {
            assertion,
            name_id,
            attributes,
            audiences,
            not_on_or_after,
            authn_instant,
            in_response_to,
            destination,
            issuer,
        })
    }

    fn into_response(self, idp: &IdpMetadata, sp: &SpMetadata) -> SamlResponse {
        SamlResponse {
            name_id: self.name_id,
            attributes: self.attributes,
            authn_instant: self.authn_instant,
            in_response_to: self.in_response_to,
            idp_entity_id: self
                .issuer
                .unwrap_or_else(|| idp.entity_id().to_string()),
            sp_entity_id: sp.entity_id().to_string(),
            destination: self.destination,
            relay_state: Vec::new(),
        }
    }
}

/// Untyped values are strings; typed values must be `xs:string`.
fn is_string_value(value: Node<'_, '_>) -> bool {
    let Some(declared) = value.attribute((NS_XSI, "type")) else {
        return true;
    };
    let local = declared
        .split_once(':')
        .map(|(_, local)| local)
        .unwrap_or(declared);
    local == "string"
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn check_audience(parsed: &ParsedResponse<'_, '_>, sp: &SpMetadata) -> Result<(), SamlError> {
    if parsed.audiences.iter().any(|a| sp.matches_audience(a)) {
        return Ok(());
    }
    Err(SamlError::WrongAudience {
        expected: sp.entity_id().to_string(),
        found: parsed.audiences.clone(),
    })
}

fn check_conditions(parsed: &ParsedResponse<'_, '_>, now: DateTime<Utc>) -> Result<(), SamlError> {
    for value in &parsed.not_on_or_after {
        let Some(not_on_or_after) = parse_instant(value) else {
            return Err(SamlError::ExpiredAssertion(format!(
                "unparseable NotOnOrAfter '{value}'"
            )));
        };
        if not_on_or_after <= now {
            return Err(SamlError::ExpiredAssertion(format!(
                "NotOnOrAfter {not_on_or_after} is not after {now}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        saml::certificate::test_support::{TestCertificate, generate_certificate},
        tests::fixtures::{encode_post, sign_assertion},
    };

    struct Fixture {
        idp_cert: TestCertificate,
        idp: IdpMetadata,
        sp: SpMetadata,
    }

    fn fixture() -> Fixture {
        let idp_cert = generate_certificate("idp.example");
        let idp = IdpMetadata::parse(&crate::saml::idp_metadata::test_support::idp_metadata_xml(
            "https://idp.example",
            "https://idp.example/sso",
            &[idp_cert.base64()],
        ))
        .unwrap();
        let sp = SpMetadata::new("my-sp", "https://sp.example/saml");
        Fixture { idp_cert, idp, sp }
    }

    fn response(audience: &str) -> SamlResponse {
        SamlResponse {
            name_id: "alice@example.com".to_string(),
            attributes: [("email", "alice@example.com"), ("role", "admin"), ("role", "user")]
                .into_iter()
                .collect(),
            in_response_to: Some("_req".to_string()),
            idp_entity_id: "https://idp.example".to_string(),
            sp_entity_id: audience.to_string(),
            destination: Some("https://sp.example/saml".to_string()),
            ..Default::default()
        }
    }

    fn signed(f: &Fixture, audience: &str, issued: DateTime<Utc>, validity: Duration) -> String {
        let xml = response(audience).to_xml(issued, validity);
        encode_post(&sign_assertion(&xml, &f.idp_cert))
    }

    #[test]
    fn test_accepts_valid_response() {
        let f = fixture();
        let encoded = signed(&f, "spn:my-sp", Utc::now(), Duration::hours(1));

        let result = ResponseValidator::new(&f.idp, &f.sp)
            .validate(Some(&encoded))
            .unwrap();
        assert_eq!(result.name_id, "alice@example.com");
        assert_eq!(result.attributes.get("role").unwrap(), ["admin", "user"]);
        assert_eq!(result.in_response_to.as_deref(), Some("_req"));
        assert_eq!(result.idp_entity_id, "https://idp.example");
        assert_eq!(result.sp_entity_id, "my-sp");
        assert_eq!(result.destination.as_deref(), Some("https://sp.example/saml"));
        assert!(result.authn_instant.is_some());
    }

    #[test]
    fn test_missing_response() {
        let f = fixture();
        let validator = ResponseValidator::new(&f.idp, &f.sp);
        assert!(matches!(validator.validate(None), Err(SamlError::MissingResponse)));
        assert!(matches!(
            validator.validate(Some("  ")),
            Err(SamlError::MissingResponse)
        ));
    }

    #[test]
    fn test_malformed_payloads() {
        let f = fixture();
        let validator = ResponseValidator::new(&f.idp, &f.sp);
        for payload in [
            "!!!not base64!!!".to_string(),
            STANDARD.encode([0xffu8, 0xfe, 0x00, 0x12]),
            STANDARD.encode("<samlp:Response"),
            STANDARD.encode(r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"/>"#),
        ] {
            assert!(
                matches!(
                    validator.validate(Some(&payload)),
                    Err(SamlError::MalformedResponse(_))
                ),
                "payload {payload} was not rejected as malformed"
            );
        }
    }

    #[test]
    fn test_deflated_payload_is_accepted() {
        let f = fixture();
        let xml = response("my-sp").to_xml(Utc::now(), Duration::hours(1));
        let signed = sign_assertion(&xml, &f.idp_cert);
        let encoded = binding::encode_redirect(&signed).unwrap();

        let result = ResponseValidator::new(&f.idp, &f.sp)
            .validate(Some(&encoded))
            .unwrap();
        assert_eq!(result.name_id, "alice@example.com");
    }

    #[test]
    fn test_missing_subject() {
        let f = fixture();
        let xml = response("my-sp")
            .to_xml(Utc::now(), Duration::hours(1))
            .replace("<saml:NameID>alice@example.com</saml:NameID>", "");
        let result = ResponseValidator::new(&f.idp, &f.sp).validate(Some(&encode_post(&xml)));
        assert!(matches!(result, Err(SamlError::MissingSubject)));
    }

    #[test]
    fn test_audience_enforcement() {
        let f = fixture();
        let validator = ResponseValidator::new(&f.idp, &f.sp);

        let other = signed(&f, "spn:other-sp", Utc::now(), Duration::hours(1));
        match validator.validate(Some(&other)) {
            Err(SamlError::WrongAudience { expected, found }) => {
                assert_eq!(expected, "my-sp");
                assert_eq!(found, ["spn:other-sp"]);
            }
            other => panic!("expected WrongAudience, got {other:?}"),
        }

        let ours = signed(&f, "spn:my-sp", Utc::now(), Duration::hours(1));
        assert!(validator.validate(Some(&ours)).is_ok());

        let upper = signed(&f, "MY-SP", Utc::now(), Duration::hours(1));
        assert!(validator.validate(Some(&upper)).is_ok());
    }

    #[test]
    fn test_audience_checked_before_signature() {
        let f = fixture();
        // Unsigned and wrong audience: the audience error wins
        let xml = response("other-sp").to_xml(Utc::now(), Duration::hours(1));
        let result = ResponseValidator::new(&f.idp, &f.sp).validate(Some(&encode_post(&xml)));
        assert!(matches!(result, Err(SamlError::WrongAudience { .. })));
    }

    #[test]
    fn test_expiry_boundaries() {
        let f = fixture();
        let validator = ResponseValidator::new(&f.idp, &f.sp);
        let now = Utc::now();

        // NotOnOrAfter one second in the past
        let expired = signed(&f, "my-sp", now - Duration::minutes(5), Duration::seconds(299));
        assert!(matches!(
            validator.validate_at(Some(&expired), now),
            Err(SamlError::ExpiredAssertion(_))
        ));

        // NotOnOrAfter exactly now
        let issued = now - Duration::minutes(5);
        let boundary = signed(&f, "my-sp", issued, Duration::minutes(5));
        let exact = DateTime::parse_from_rfc3339(
            &(issued + Duration::minutes(5)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        )
        .unwrap()
        .with_timezone(&Utc);
        assert!(matches!(
            validator.validate_at(Some(&boundary), exact),
            Err(SamlError::ExpiredAssertion(_))
        ));

        // One hour ahead
        let fresh = signed(&f, "my-sp", now, Duration::hours(1));
        assert!(validator.validate_at(Some(&fresh), now).is_ok());
    }

    #[test]
    fn test_unparseable_not_on_or_after_is_expired() {
        let f = fixture();
        let xml = response("my-sp").to_xml(Utc::now(), Duration::hours(1));
        let start = xml.find("<saml:Conditions").unwrap();
        let attr = xml[start..].find("NotOnOrAfter=\"").unwrap() + start + "NotOnOrAfter=\"".len();
        let end = xml[attr..].find('"').unwrap() + attr;
        let broken = format!("{}yesterday{}", &xml[..attr], &xml[end..]);

        let result = ResponseValidator::new(&f.idp, &f.sp).validate(Some(&encode_post(&broken)));
        assert!(matches!(result, Err(SamlError::ExpiredAssertion(_))));
    }

    #[test]
    fn test_unsigned_assertion_is_rejected() {
        let f = fixture();
        let xml = response("my-sp").to_xml(Utc::now(), Duration::hours(1));
        let result = ResponseValidator::new(&f.idp, &f.sp).validate(Some(&encode_post(&xml)));
        assert!(matches!(result, Err(SamlError::MissingSignature)));
    }

    #[test]
    fn test_unregistered_signer_is_untrusted() {
        let f = fixture();
        let rogue = generate_certificate("rogue.example");
        let xml = response("my-sp").to_xml(Utc::now(), Duration::hours(1));
        let encoded = encode_post(&sign_assertion(&xml, &rogue));

        let result = ResponseValidator::new(&f.idp, &f.sp).validate(Some(&encoded));
        assert!(matches!(result, Err(SamlError::UntrustedSigner)));
    }

    #[test]
    fn test_tampered_assertion_is_invalid() {
        let f = fixture();
        let xml = response("my-sp").to_xml(Utc::now(), Duration::hours(1));
        let tampered = sign_assertion(&xml, &f.idp_cert).replace(
            r#"<saml:AttributeValue xsi:type="xs:string">admin</saml:AttributeValue>"#,
            r#"<saml:AttributeValue xsi:type="xs:string">superuser</saml:AttributeValue>"#,
        );
        let result = ResponseValidator::new(&f.idp, &f.sp).validate(Some(&encode_post(&tampered)));
        assert!(matches!(result, Err(SamlError::InvalidSignature(_))));
    }

    #[test]
    fn test_non_string_attribute_values_are_dropped() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" xmlns:xs="http://www.w3.org/2001/XMLSchema" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <saml:Assertion ID="_a">
    <saml:Subject><saml:NameID>bob</saml:NameID></saml:Subject>
    <saml:AttributeStatement>
      <saml:Attribute Name="age"><saml:AttributeValue xsi:type="xs:integer">42</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="email"><saml:AttributeValue xsi:type="xs:string">bob@example.com</saml:AttributeValue></saml:Attribute>
      <saml:Attribute Name="dept"><saml:AttributeValue>eng</saml:AttributeValue><saml:AttributeValue xsi:type="xs:boolean">true</saml:AttributeValue></saml:Attribute>
    </saml:AttributeStatement>
  </saml:Assertion>
</samlp:Response>"#;
        let doc = Document::parse(xml).unwrap();
        let parsed = ParsedResponse::from_document(&doc).unwrap();

        assert_eq!(parsed.name_id, "bob");
        assert!(parsed.attributes.get("age").is_none());
        assert_eq!(parsed.attributes.first("email"), Some("bob@example.com"));
        assert_eq!(parsed.attributes.get("dept").unwrap(), ["eng"]);
        assert!(parsed.audiences.is_empty());
    }

    #[test]
    fn test_multiple_assertions_rejected() {
        let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion"><saml:Assertion ID="_a"/><saml:Assertion ID="_b"/></samlp:Response>"#;
        let doc = Document::parse(xml).unwrap();
        assert!(matches!(
            ParsedResponse::from_document(&doc),
            Err(SamlError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_looks_like_xml() {
        assert!(looks_like_xml(b"  <samlp:Response/>"));
        assert!(looks_like_xml(b"\xEF\xBB\xBF<x/>"));
        assert!(!looks_like_xml(b"garbage"));
    }
}
