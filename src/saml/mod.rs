//! SAML 2.0 service-provider engine.
//!
//! Implements the Web Browser SSO profile for a service provider:
//! - HTTP-Redirect `AuthnRequest` generation ([`authn_request`])
//! - HTTP-POST `Response` validation ([`validator`], [`signature`])
//! - IdP metadata parsing and caching ([`idp_metadata`], [`metadata_cache`])
//! - Encrypted relay state ([`relay_state`])
//! - Attribute to claim routing ([`claims`])
//!
//! [`handler::SamlHandler`] ties the pieces together for the HTTP layer.

pub mod authn_request;
pub mod binding;
pub mod certificate;
pub mod claims;
pub mod error;
pub mod handler;
pub mod idp_metadata;
pub mod metadata_cache;
pub mod relay_state;
pub mod response;
pub mod signature;
pub mod sp_metadata;
pub mod validator;
pub mod xml;

pub use claims::Claim;
pub use error::SamlError;
pub use handler::{CompletedLogin, ProtocolAction, SamlHandler, SamlOptions};
pub use metadata_cache::{MetadataCache, MetadataProvider};
pub use relay_state::{AuthenticationProperties, RelayStateProtector};
pub use sp_metadata::{ContactPerson, Organization, SpMetadata};

/// SAML 2.0 assertion namespace.
pub const NS_ASSERTION: &str = "urn:oasis:names:tc:SAML:2.0:assertion";
/// SAML 2.0 protocol namespace.
pub const NS_PROTOCOL: &str = "urn:oasis:names:tc:SAML:2.0:protocol";
/// SAML 2.0 metadata namespace.
pub const NS_METADATA: &str = "urn:oasis:names:tc:SAML:2.0:metadata";
/// XML Digital Signature namespace.
pub const NS_DSIG: &str = "http://www.w3.org/2000/09/xmldsig#";
/// XML Schema instance namespace (for `xsi:type`).
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

/// HTTP-Redirect binding URI.
pub const HTTP_REDIRECT_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect";
/// HTTP-POST binding URI.
pub const HTTP_POST_BINDING: &str = "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST";

/// Default NameID format requested from the IdP.
pub const NAMEID_FORMAT_UNSPECIFIED: &str =
    "urn:oasis:names:tc:SAML:1.1:nameid-format:unspecified";
