//! SAML protocol handler.
//!
//! Orchestrates the login round-trip for the HTTP layer:
//! - challenge: fetch IdP metadata, seal the return-state, build the redirect
//! - callback POST: validate the response, open the relay state, route claims
//! - callback GET: serve the SP metadata document

use std::sync::Arc;

use http::Method;

use super::{
    SamlError,
    authn_request::AuthnRequestBuilder,
    claims::ClaimSet,
    metadata_cache::MetadataProvider,
    relay_state::{AuthenticationProperties, RelayStateProtector},
    response::SamlResponse,
    sp_metadata::SpMetadata,
    validator::ResponseValidator,
};

/// Default callback path: GET serves metadata, POST is the ACS.
pub const DEFAULT_CALLBACK_PATH: &str = "/saml";

/// What the handler does with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolAction {
    ServeMetadata,
    ProcessResponse,
}

impl ProtocolAction {
    /// Map a request to an action. Requests off the callback path, or with
    /// other methods, are not handled.
    pub fn classify(method: &Method, path: &str, callback_path: &str) -> Option<Self> {
        let path = path.trim_end_matches('/');
        let callback_path = callback_path.trim_end_matches('/');
        if !path.eq_ignore_ascii_case(callback_path) {
            return None;
        }
        match *method {
            Method::GET => Some(ProtocolAction::ServeMetadata),
            Method::POST => Some(ProtocolAction::ProcessResponse),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SamlOptions {
    pub sp: SpMetadata,
    /// IdP metadata location: URL, `file://` URL, or path.
    pub idp_metadata_location: String,
    pub callback_path: String,
    pub force_authn: bool,
}

impl SamlOptions {
    pub fn new(sp: SpMetadata, idp_metadata_location: impl Into<String>) -> Self {
        Self {
            sp,
            idp_metadata_location: idp_metadata_location.into(),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            force_authn: false,
        }
    }
}

/// Redirect that starts a login.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub redirect_url: String,
    pub request_id: String,
}

/// A successful login, ready for local sign-in.
#[derive(Debug, Clone)]
pub struct CompletedLogin {
    pub response: SamlResponse,
    pub claims: ClaimSet,
    pub properties: AuthenticationProperties,
}

pub struct SamlHandler {
    options: SamlOptions,
    metadata: Arc<dyn MetadataProvider>,
    relay_state: RelayStateProtector,
}

impl SamlHandler {
    pub fn new(
        options: SamlOptions,
        metadata: Arc<dyn MetadataProvider>,
        relay_state: RelayStateProtector,
    ) -> Self {
        Self {
            options,
            metadata,
            relay_state,
        }
    }

    pub fn sp_metadata(&self) -> &SpMetadata {
        &self.options.sp
    }

    pub fn callback_path(&self) -> &str {
        &self.options.callback_path
    }

    pub fn classify(&self, method: &Method, path: &str) -> Option<ProtocolAction> {
        ProtocolAction::classify(method, path, &self.options.callback_path)
    }

    /// The SP metadata document served on GET to the callback path.
    pub fn metadata_document(&self) -> String {
        self.options.sp.to_xml()
    }

    /// Start a login. Metadata errors abort before any redirect is built.
    pub async fn challenge(
        &self,
        properties: &AuthenticationProperties,
    ) -> Result<Challenge, SamlError> {
        let idp = self
            .metadata
            .get(&self.options.idp_metadata_location)
            .await?;
        let relay_state = self.relay_state.protect(properties)?;

        let request = AuthnRequestBuilder::new(&idp, &self.options.sp, &relay_state)
            .force_authn(self.options.force_authn)
            .build()?;

        tracing::info!(
            request_id = %request.id,
            idp = %idp.entity_id(),
            "Redirecting to SAML IdP"
        );

        Ok(Challenge {
            redirect_url: request.redirect_url.to_string(),
            request_id: request.id,
        })
    }

    /// Process a POSTed `SAMLResponse` and `RelayState`.
    pub async fn handle_response(
        &self,
        saml_response: Option<&str>,
        relay_state: Option<&str>,
    ) -> Result<CompletedLogin, SamlError> {
        let idp = self
            .metadata
            .get(&self.options.idp_metadata_location)
            .await?;

        let mut response = ResponseValidator::new(&idp, &self.options.sp)
            .validate(saml_response)
            .inspect_err(|e| {
                tracing::warn!(
                    kind = e.kind(),
                    stage = ?e.failed_stage(),
                    error = %e,
                    "SAML response rejected"
                );
            })?;

        let token = relay_state
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SamlError::RelayState("RelayState is missing".to_string()))?;
        let properties: AuthenticationProperties =
            self.relay_state.unprotect(token).inspect_err(|e| {
                tracing::warn!(error = %e, "SAML relay state rejected");
            })?;
        response.relay_state = token.as_bytes().to_vec();

        let claims = ClaimSet::project(&response);

        tracing::info!(
            subject = %response.name_id,
            idp = %response.idp_entity_id,
            attributes = response.attributes.len(),
            "SAML login accepted"
        );

        Ok(CompletedLogin {
            response,
            claims,
            properties,
        })
    }
}
