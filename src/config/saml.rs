use std::time::Duration;

use serde::Deserialize;

use crate::saml::{
    ContactPerson, Organization, RelayStateProtector, SamlError, SpMetadata,
    relay_state::{LOGIN_PURPOSE, MIN_SECRET_LENGTH},
    sp_metadata::derive_acs_url_from_entity_id,
};

/// SAML service-provider configuration.
///
/// ```toml
/// [saml]
/// sp_entity_id = "https://sp.example.com"
/// idp_metadata = "https://idp.example.com/metadata"
/// relay_state_secret = "${SAML_RELAY_STATE_SECRET}"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamlConfig {
    /// Entity ID of this SP. Also the expected audience of assertions.
    pub sp_entity_id: String,

    /// Assertion consumer URL. Derived from `sp_entity_id` when omitted
    /// (`{scheme}://{host}[:{port}]/saml`).
    #[serde(default)]
    pub acs_url: Option<String>,

    /// NameID format requested from the IdP.
    #[serde(default)]
    pub name_id_format: Option<String>,

    /// IdP metadata location: HTTPS URL, `file://` URL, or local path.
    pub idp_metadata: String,

    /// Reject plain-HTTP metadata URLs.
    #[serde(default = "default_true")]
    pub require_https_metadata: bool,

    /// Base64 secret (at least 32 bytes) protecting the relay state.
    /// If not provided, a random secret is generated on startup
    /// (logins in flight won't survive restarts).
    #[serde(default)]
    pub relay_state_secret: Option<String>,

    /// How long a login round-trip may take, in seconds.
    #[serde(default = "default_relay_state_lifetime")]
    pub relay_state_lifetime_secs: u64,

    /// Path that serves metadata (GET) and consumes responses (POST).
    #[serde(default = "default_callback_path")]
    pub callback_path: String,

    /// Ask the IdP to re-authenticate on every login.
    #[serde(default)]
    pub force_authn: bool,

    /// Organization published in SP metadata.
    #[serde(default)]
    pub organization: Option<Organization>,

    /// Contacts published in SP metadata.
    #[serde(default)]
    pub contacts: Vec<ContactPerson>,
}

fn default_true() -> bool {
    true
}

/// Upper bound for `relay_state_lifetime_secs`.
const MAX_RELAY_STATE_LIFETIME_SECS: u64 = 24 * 60 * 60;

fn default_relay_state_lifetime() -> u64 {
    15 * 60
}

fn default_callback_path() -> String {
    crate::saml::handler::DEFAULT_CALLBACK_PATH.to_string()
}

impl SamlConfig {
    /// Configured or derived assertion consumer URL.
    pub fn acs_url(&self) -> Option<String> {
        self.acs_url
            .clone()
            .or_else(|| derive_acs_url_from_entity_id(&self.sp_entity_id, &self.callback_path))
    }

    pub fn sp_metadata(&self) -> Result<SpMetadata, SamlError> {
        let acs_url = self.acs_url().ok_or_else(|| {
            SamlError::MetadataFormat(
                "acs_url is required when sp_entity_id is not a URL".to_string(),
            )
        })?;

        let mut sp = SpMetadata::new(&self.sp_entity_id, acs_url);
        if let Some(format) = &self.name_id_format {
            sp = sp.with_name_id_format(format);
        }
        if let Some(organization) = &self.organization {
            sp = sp.with_organization(organization.clone());
        }
        for contact in &self.contacts {
            sp = sp.with_contact(contact.clone());
        }
        Ok(sp)
    }

    pub fn relay_state_protector(&self) -> Result<RelayStateProtector, SamlError> {
        let protector = match &self.relay_state_secret {
            Some(secret) => RelayStateProtector::from_base64(secret, LOGIN_PURPOSE)?,
            None => {
                tracing::warn!(
                    "No SAML relay_state_secret configured; using a random secret. \
                     Logins in flight will fail after a restart or on another instance."
                );
                RelayStateProtector::ephemeral(LOGIN_PURPOSE)?
            }
        };
        Ok(protector.with_lifetime(Duration::from_secs(self.relay_state_lifetime_secs)))
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.sp_entity_id.trim().is_empty() {
            return Err("saml.sp_entity_id must not be empty".into());
        }
        if self.idp_metadata.trim().is_empty() {
            return Err("saml.idp_metadata must not be empty".into());
        }
        if self.acs_url().is_none() {
            return Err(
                "saml.acs_url is required when saml.sp_entity_id is not a URL".into(),
            );
        }
        if !self.callback_path.starts_with('/') {
            return Err("saml.callback_path must start with '/'".into());
        }
        if self.relay_state_lifetime_secs == 0 {
            return Err("saml.relay_state_lifetime_secs must be greater than 0".into());
        }
        if self.relay_state_lifetime_secs > MAX_RELAY_STATE_LIFETIME_SECS {
            return Err(format!(
                "saml.relay_state_lifetime_secs must be at most {MAX_RELAY_STATE_LIFETIME_SECS}"
            ));
        }
        if let Some(secret) = &self.relay_state_secret {
            use base64::{Engine as _, engine::general_purpose::STANDARD};
            let decoded = STANDARD
                .decode(secret.trim())
                .map_err(|e| format!("saml.relay_state_secret is not valid base64: {e}"))?;
            if decoded.len() < MIN_SECRET_LENGTH {
                return Err(format!(
                    "saml.relay_state_secret must decode to at least {MIN_SECRET_LENGTH} bytes"
                ));
            }
        }
        Ok(())
    }
}
