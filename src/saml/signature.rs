//! Enveloped XML-DSig verification for SAML assertions.
//!
//! Only the profile SAML actually uses is accepted: a `ds:Signature` child of
//! the signed element, one `Reference` to that element's `ID`, the
//! enveloped-signature and exclusive-c14n transforms, and RSA or ECDSA
//! signature methods. Those structural checks run on the `roxmltree` view;
//! canonicalization, digest and signature value are checked by xmlsec.

use libxml::{parser::Parser as XmlParser, tree::Node as XmlNode, xpath::Context};
use roxmltree::Node;
use xmlsec::{XmlSecDocumentExt as _, XmlSecKey, XmlSecKeyFormat, XmlSecSignatureContext};

use super::{
    NS_DSIG, SamlError,
    certificate::{Certificate, CertificateRegistry},
    xml,
};

pub const ALG_EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const ALG_ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";

pub const ALG_RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const ALG_RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const ALG_RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const ALG_RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";
pub const ALG_ECDSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha256";
pub const ALG_ECDSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha384";
pub const ALG_ECDSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#ecdsa-sha512";

pub const ALG_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ALG_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const ALG_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const ALG_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

const SIGNATURE_METHODS: &[&str] = &[
    ALG_RSA_SHA1,
    ALG_RSA_SHA256,
    ALG_RSA_SHA384,
    ALG_RSA_SHA512,
    ALG_ECDSA_SHA256,
    ALG_ECDSA_SHA384,
    ALG_ECDSA_SHA512,
];

const DIGEST_METHODS: &[&str] = &[ALG_SHA1, ALG_SHA256, ALG_SHA384, ALG_SHA512];

fn invalid(message: impl Into<String>) -> SamlError {
    SamlError::InvalidSignature(message.into())
}

/// The `ds:Signature` element directly under `element`.
pub fn find_signature<'a, 'input>(element: Node<'a, 'input>) -> Option<Node<'a, 'input>> {
    xml::child(element, NS_DSIG, "Signature")
}

/// Base64 text of the first `KeyInfo/X509Data/X509Certificate`.
pub fn embedded_certificate(signature: Node<'_, '_>) -> Option<String> {
    let key_info = xml::child(signature, NS_DSIG, "KeyInfo")?;
    xml::descendants(key_info, NS_DSIG, "X509Certificate")
        .next()
        .and_then(xml::text_of)
}

/// Verify the enveloped signature on `element` against pinned certificates.
///
/// The signer check happens before any cryptography: a signature whose
/// embedded certificate is not pinned fails with
/// [`SamlError::UntrustedSigner`] regardless of whether it would verify.
pub fn verify_enveloped(
    element: Node<'_, '_>,
    trusted: &CertificateRegistry,
) -> Result<(), SamlError> {
    let signature = find_signature(element).ok_or(SamlError::MissingSignature)?;

    let embedded = embedded_certificate(signature).ok_or(SamlError::UntrustedSigner)?;
    let certificate = trusted.get(&embedded).ok_or(SamlError::UntrustedSigner)?;

    verify_with_certificate(element, signature, certificate)
}

fn verify_with_certificate(
    element: Node<'_, '_>,
    signature: Node<'_, '_>,
    certificate: &Certificate,
) -> Result<(), SamlError> {
    let signed_info = xml::child(signature, NS_DSIG, "SignedInfo")
        .ok_or_else(|| invalid("SignedInfo is missing"))?;

    let c14n_method = xml::child(signed_info, NS_DSIG, "CanonicalizationMethod")
        .and_then(|m| m.attribute("Algorithm"));
    if c14n_method != Some(ALG_EXC_C14N) {
        return Err(invalid(format!(
            "unsupported canonicalization method {c14n_method:?}"
        )));
    }

    let signature_method = xml::child(signed_info, NS_DSIG, "SignatureMethod")
        .and_then(|m| m.attribute("Algorithm"))
        .ok_or_else(|| invalid("SignatureMethod is missing"))?;
    if !SIGNATURE_METHODS.contains(&signature_method) {
        return Err(invalid(format!(
            "unsupported signature method '{signature_method}'"
        )));
    }

    let mut references = xml::children(signed_info, NS_DSIG, "Reference");
    let reference = references
        .next()
        .ok_or_else(|| invalid("Reference is missing"))?;
    if references.next().is_some() {
        return Err(invalid("multiple References are not supported"));
    }

    // The reference must point at the element carrying the signature, and
    // that ID must be unique in the document.
    let id = element
        .attribute("ID")
        .ok_or_else(|| invalid("signed element has no ID"))?;
    let uri = reference.attribute("URI").unwrap_or("");
    if uri.strip_prefix('#') != Some(id) {
        return Err(invalid(format!(
            "Reference URI '{uri}' does not point at the signed element"
        )));
    }
    let same_id = element
        .document()
        .descendants()
        .filter(|n| n.is_element() && n.attribute("ID") == Some(id))
        .count();
    if same_id != 1 {
        return Err(invalid(format!("ID '{id}' is not unique")));
    }

    let mut enveloped = false;
    if let Some(transforms) = xml::child(reference, NS_DSIG, "Transforms") {
        for transform in xml::children(transforms, NS_DSIG, "Transform") {
            match transform.attribute("Algorithm") {
                Some(ALG_ENVELOPED_SIGNATURE) => enveloped = true,
                Some(ALG_EXC_C14N) => {}
                other => {
                    return Err(invalid(format!("unsupported transform {other:?}")));
                }
            }
        }
    }
    if !enveloped {
        return Err(invalid("enveloped-signature transform is missing"));
    }

    let digest_method = xml::child(reference, NS_DSIG, "DigestMethod")
        .and_then(|m| m.attribute("Algorithm"))
        .ok_or_else(|| invalid("DigestMethod is missing"))?;
    if !DIGEST_METHODS.contains(&digest_method) {
        return Err(invalid(format!("unsupported digest method '{digest_method}'")));
    }

    let der = certificate
        .der()
        .map_err(|e| invalid(format!("unusable certificate: {e}")))?;
    verify_signature_value(element.document().input_text(), id, &der)
}

/// Check digest and signature value of the signature under the element
/// carrying `id`, using only the key from `certificate_der`.
///
/// `input` has already been parsed by `roxmltree`, so it carries no DTD.
fn verify_signature_value(input: &str, id: &str, certificate_der: &[u8]) -> Result<(), SamlError> {
    let document = XmlParser::default()
        .parse_string(input)
        .map_err(|e| invalid(format!("libxml2 rejected the document: {e:?}")))?;

    // xmlsec verifies the first ds:Signature in document order. Signatures
    // outside the signed element cannot affect its digest, so drop them.
    let context = Context::new(&document).map_err(|_| invalid("XPath context unavailable"))?;
    context
        .register_namespace("ds", NS_DSIG)
        .map_err(|_| invalid("XPath namespace registration failed"))?;
    let signatures = context
        .findnodes("//ds:Signature", None)
        .map_err(|_| invalid("XPath lookup failed"))?;
    for mut other in signatures.into_iter().filter(|sig| !is_within(sig, id)) {
        other.unlink_node();
    }

    document
        .specify_idattr("//*[@ID]", "ID", None)
        .map_err(|e| invalid(format!("cannot register ID attributes: {e}")))?;

    let key = XmlSecKey::from_memory(certificate_der, XmlSecKeyFormat::CertDer, None)
        .map_err(|e| invalid(format!("unusable certificate key: {e}")))?;
    let mut signature_context = XmlSecSignatureContext::new();
    signature_context.insert_key(key);

    match signature_context.verify_document(&document) {
        Ok(true) => Ok(()),
        Ok(false) => Err(invalid("signature value does not verify")),
        Err(e) => Err(invalid(format!("signature value does not verify: {e}"))),
    }
}

fn is_within(node: &XmlNode, id: &str) -> bool {
    let mut current = node.get_parent();
    while let Some(parent) = current {
        if parent.get_attribute("ID").as_deref() == Some(id) {
            return true;
        }
        current = parent.get_parent();
    }
    false
}
