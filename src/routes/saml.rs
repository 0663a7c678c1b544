//! SAML HTTP endpoints.
//!
//! - `GET {callback}/login?return_to=/path` starts SP-initiated SSO
//! - `GET {callback}` serves SP metadata, `POST {callback}` is the ACS
//! - `GET {callback}/me` and `POST {callback}/logout` manage the local session

use axum::{
    Form, Json,
    extract::{FromRequest, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite as CookieSameSite, time::Duration as CookieDuration},
};
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AuthError, LocalSession},
    config::{SameSite, SessionConfig},
    saml::{AuthenticationProperties, Claim, ProtocolAction},
    validation::url::safe_redirect_target,
};

const SAML_METADATA_CONTENT_TYPE: &str = "application/samlmetadata+xml";

/// Query parameters for the login endpoint.
#[derive(Debug, Deserialize)]
pub struct SamlLoginQuery {
    /// Relative path to return to after login
    #[serde(default)]
    pub return_to: Option<String>,
}

/// Form data from the IdP (HTTP-POST binding).
///
/// Both fields are optional so that a missing response is reported by the
/// validator rather than as a form rejection.
#[derive(Debug, Deserialize)]
pub struct SamlAcsForm {
    #[serde(rename = "SAMLResponse", default)]
    pub saml_response: Option<String>,
    #[serde(rename = "RelayState", default)]
    pub relay_state: Option<String>,
}

/// Response for the `/me` endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct MeResponse {
    pub subject: String,
    pub idp_entity_id: String,
    pub claims: Vec<MeClaim>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MeClaim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl From<&Claim> for MeClaim {
    fn from(claim: &Claim) -> Self {
        Self {
            claim_type: claim.claim_type.clone(),
            value: claim.value.clone(),
        }
    }
}

impl From<LocalSession> for MeResponse {
    fn from(session: LocalSession) -> Self {
        Self {
            claims: session.claims.iter().map(MeClaim::from).collect(),
            subject: session.subject,
            idp_entity_id: session.idp_entity_id,
            expires_at: session.expires_at,
        }
    }
}

fn cookie_same_site(same_site: SameSite) -> CookieSameSite {
    match same_site {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    }
}

fn build_session_cookie(session_config: &SessionConfig, session_id: Uuid) -> Cookie<'static> {
    Cookie::build((session_config.cookie_name.clone(), session_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(session_config.secure)
        .same_site(cookie_same_site(session_config.same_site))
        .max_age(CookieDuration::seconds(session_config.duration_secs as i64))
        .build()
}

/// Build a session removal cookie with the same security attributes as the login cookie.
fn build_removal_cookie(session_config: &SessionConfig) -> Cookie<'static> {
    Cookie::build(session_config.cookie_name.clone())
        .path("/")
        .http_only(true)
        .secure(session_config.secure)
        .same_site(cookie_same_site(session_config.same_site))
        .max_age(CookieDuration::ZERO)
        .build()
}

fn session_id_from_cookies(cookies: &Cookies, session_config: &SessionConfig) -> Option<Uuid> {
    cookies
        .get(&session_config.cookie_name)
        .and_then(|cookie| cookie.value().parse::<Uuid>().ok())
}

/// Start SP-initiated SSO: `302 Found` to the IdP with the AuthnRequest.
///
/// Metadata problems fail here, before any redirect is issued.
#[tracing::instrument(name = "saml.login", skip(state))]
pub async fn saml_login(
    State(state): State<AppState>,
    Query(query): Query<SamlLoginQuery>,
) -> Result<Response, AuthError> {
    let return_to = safe_redirect_target(query.return_to.as_deref());
    let properties = AuthenticationProperties::with_redirect_uri(return_to);

    let challenge = state.saml.challenge(&properties).await?;

    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, challenge.redirect_url)],
    )
        .into_response())
}

/// The callback path: metadata on GET, assertion consumer on POST.
#[tracing::instrument(
    name = "saml.callback",
    skip(state, cookies, request),
    fields(method = %request.method(), path = %request.uri().path())
)]
pub async fn saml_callback(
    State(state): State<AppState>,
    cookies: Cookies,
    request: Request,
) -> Result<Response, AuthError> {
    match state.saml.classify(request.method(), request.uri().path()) {
        Some(ProtocolAction::ServeMetadata) => Ok(saml_metadata(&state)),
        Some(ProtocolAction::ProcessResponse) => {
            let form = match Form::<SamlAcsForm>::from_request(request, &state).await {
                Ok(Form(form)) => form,
                Err(rejection) => return Ok(rejection.into_response()),
            };
            saml_acs(&state, &cookies, form).await
        }
        None => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}

fn saml_metadata(state: &AppState) -> Response {
    tracing::debug!(entity_id = %state.saml.sp_metadata().entity_id(), "Serving SAML SP metadata");
    (
        [(header::CONTENT_TYPE, SAML_METADATA_CONTENT_TYPE)],
        state.saml.metadata_document(),
    )
        .into_response()
}

async fn saml_acs(
    state: &AppState,
    cookies: &Cookies,
    form: SamlAcsForm,
) -> Result<Response, AuthError> {
    let login = state
        .saml
        .handle_response(form.saml_response.as_deref(), form.relay_state.as_deref())
        .await?;

    let session = state.sessions.sign_in(&login).await?;
    cookies.add(build_session_cookie(&state.config.session, session.id));

    let redirect_to = safe_redirect_target(login.properties.redirect_uri.as_deref());

    tracing::info!(
        session_id = %session.id,
        subject = %session.subject,
        redirect_to = %redirect_to,
        "SAML session created"
    );

    Ok(Redirect::to(redirect_to).into_response())
}

/// Current session.
#[tracing::instrument(name = "saml.me", skip(state, cookies))]
pub async fn me(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Json<MeResponse>, AuthError> {
    let session_id = session_id_from_cookies(&cookies, &state.config.session)
        .ok_or(AuthError::SessionNotFound)?;
    let session = state.sessions.get_session(session_id).await?;
    Ok(Json(MeResponse::from(session)))
}

/// End the local session. Does not perform IdP single logout.
#[tracing::instrument(name = "saml.logout", skip(state, cookies))]
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
) -> Result<Response, AuthError> {
    if let Some(session_id) = session_id_from_cookies(&cookies, &state.config.session) {
        state.sessions.sign_out(session_id).await?;
        tracing::info!(session_id = %session_id, "SAML session ended");
    }

    cookies.remove(build_removal_cookie(&state.config.session));
    Ok(Redirect::to("/").into_response())
}
