//! Router-level login round-trips against a mock IdP metadata endpoint.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use super::fixtures::{encode_post, sign_assertion};
use crate::{
    AppState, build_app,
    auth::error::ErrorResponse,
    config::SpConfig,
    routes::{health::HealthStatus, saml::MeResponse},
    saml::{
        certificate::test_support::{TestCertificate, generate_certificate},
        idp_metadata::test_support::idp_metadata_xml,
        relay_state::generate_secret,
        response::SamlResponse,
    },
};

const SP_ENTITY_ID: &str = "https://sp.example";
const IDP_ENTITY_ID: &str = "https://idp.example";

struct TestIdp {
    server: MockServer,
    cert: TestCertificate,
}

impl TestIdp {
    async fn start() -> Self {
        let cert = generate_certificate("idp.example");
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/metadata"))
            .respond_with(ResponseTemplate::new(200).set_body_string(idp_metadata_xml(
                IDP_ENTITY_ID,
                "https://idp.example/sso",
                &[cert.base64()],
            )))
            .mount(&server)
            .await;
        Self { server, cert }
    }

    fn metadata_url(&self) -> String {
        format!("{}/metadata", self.server.uri())
    }

    fn response(&self, audience: &str, validity: Duration) -> String {
        let xml = SamlResponse {
            name_id: "alice@example.com".to_string(),
            attributes: [
                ("email", "alice@example.com"),
                ("role", "admin"),
                ("AspNet.Identity.SecurityStamp", "stamp"),
            ]
            .into_iter()
            .collect(),
            idp_entity_id: IDP_ENTITY_ID.to_string(),
            sp_entity_id: audience.to_string(),
            ..Default::default()
        }
        .to_xml(Utc::now(), validity);
        sign_assertion(&xml, &self.cert)
    }

    fn signed_response(&self) -> String {
        encode_post(&self.response(SP_ENTITY_ID, Duration::hours(1)))
    }
}

fn test_config(metadata_url: &str) -> SpConfig {
    SpConfig::from_str(&format!(
        r#"
        [saml]
        sp_entity_id = "{SP_ENTITY_ID}"
        idp_metadata = "{metadata_url}"
        require_https_metadata = false
        relay_state_secret = "{secret}"
        "#,
        secret = generate_secret(),
    ))
    .unwrap()
}

fn test_app(metadata_url: &str) -> Router {
    let config = test_config(metadata_url);
    let state = AppState::from_config(config.clone()).unwrap();
    build_app(&config, state)
}

fn form_body(saml_response: &str, relay_state: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("SAMLResponse", saml_response)
        .append_pair("RelayState", relay_state)
        .finish()
}

fn acs_request(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/saml")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn location(response: &axum::response::Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

async fn json_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Start a login and return the relay state the IdP would echo back.
async fn begin_login(app: &Router, return_to: &str) -> String {
    let response = app
        .clone()
        .oneshot(get(&format!("/saml/login?return_to={return_to}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let redirect = url::Url::parse(&location(&response)).unwrap();
    redirect
        .query_pairs()
        .find(|(k, _)| k == "RelayState")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn test_login_redirects_to_idp() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    let response = app.oneshot(get("/saml/login?return_to=/reports")).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = url::Url::parse(&location(&response)).unwrap();
    assert_eq!(redirect.host_str(), Some("idp.example"));
    assert_eq!(redirect.path(), "/sso");
    let params: Vec<String> = redirect.query_pairs().map(|(k, _)| k.into_owned()).collect();
    assert!(params.contains(&"SAMLRequest".to_string()));
    assert!(params.contains(&"RelayState".to_string()));
}

#[tokio::test]
async fn test_full_login_round_trip() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    let relay_state = begin_login(&app, "/reports").await;

    let response = app
        .clone()
        .oneshot(acs_request(form_body(&idp.signed_response(), &relay_state)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/reports");

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with("__samlsp_session="));
    assert!(set_cookie.contains("HttpOnly"));
    let session_cookie = set_cookie.split(';').next().unwrap().to_string();

    let me = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/saml/me")
                .header(header::COOKIE, &session_cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me.status(), StatusCode::OK);

    let me: MeResponse = json_body(me).await;
    assert_eq!(me.subject, "alice@example.com");
    assert_eq!(me.idp_entity_id, IDP_ENTITY_ID);
    let claim_types: Vec<&str> = me.claims.iter().map(|c| c.claim_type.as_str()).collect();
    assert!(claim_types.contains(&"sub"));
    assert!(claim_types.contains(&"email"));
    assert!(claim_types.contains(&"role"));
    assert!(!claim_types.contains(&"AspNet.Identity.SecurityStamp"));

    let logout = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/saml/logout")
                .header(header::COOKIE, &session_cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(logout.status(), StatusCode::SEE_OTHER);

    let me_again = app
        .oneshot(
            Request::builder()
                .uri("/saml/me")
                .header(header::COOKIE, &session_cookie)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(me_again.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_external_return_to_falls_back_to_root() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    let relay_state = begin_login(&app, "https://evil.example/").await;
    let response = app
        .oneshot(acs_request(form_body(&idp.signed_response(), &relay_state)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/");
}

#[tokio::test]
async fn test_wrong_audience_is_rejected() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    let relay_state = begin_login(&app, "/").await;
    let foreign = encode_post(&idp.response("https://other-sp.example", Duration::hours(1)));
    let response = app
        .oneshot(acs_request(form_body(&foreign, &relay_state)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    let body: ErrorResponse = json_body(response).await;
    assert_eq!(body.error.code.as_deref(), Some("saml_login_failed"));
    assert!(!body.error.message.contains("other-sp"));
}

#[tokio::test]
async fn test_untrusted_signer_is_rejected() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());
    let impostor = generate_certificate("impostor.example");

    let relay_state = begin_login(&app, "/").await;
    let xml = SamlResponse {
        name_id: "alice@example.com".to_string(),
        idp_entity_id: IDP_ENTITY_ID.to_string(),
        sp_entity_id: SP_ENTITY_ID.to_string(),
        ..Default::default()
    }
    .to_xml(Utc::now(), Duration::hours(1));
    let forged = encode_post(&sign_assertion(&xml, &impostor));

    let response = app
        .oneshot(acs_request(form_body(&forged, &relay_state)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_missing_or_forged_relay_state_is_rejected() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    for relay_state in ["", "not-a-token"] {
        let response = app
            .clone()
            .oneshot(acs_request(form_body(&idp.signed_response(), relay_state)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_missing_saml_response_is_rejected() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    let response = app.oneshot(acs_request(String::new())).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_serves_sp_metadata() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    let response = app.oneshot(get("/saml")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/samlmetadata+xml"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let xml = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(xml.contains(r#"entityID="https://sp.example""#));
    assert!(xml.contains(r#"Location="https://sp.example/saml""#));
}

#[tokio::test]
async fn test_other_methods_on_callback_not_allowed() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/saml")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_metadata_failure_aborts_login_with_502() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let app = test_app(&format!("{}/metadata", server.uri()));

    let response = app.oneshot(get("/saml/login")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert!(response.headers().get(header::LOCATION).is_none());
}

#[tokio::test]
async fn test_metadata_fetched_once_across_logins() {
    let cert = generate_certificate("idp.example");
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_string(idp_metadata_xml(
            IDP_ENTITY_ID,
            "https://idp.example/sso",
            &[cert.base64()],
        )))
        .expect(1)
        .mount(&server)
        .await;
    let app = test_app(&format!("{}/metadata", server.uri()));

    begin_login(&app, "/").await;
    begin_login(&app, "/").await;
}

#[tokio::test]
async fn test_health_reports_idp_metadata() {
    let idp = TestIdp::start().await;
    let app = test_app(&idp.metadata_url());

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthStatus = json_body(response).await;
    assert_eq!(health.status, "healthy");
    assert!(health.subsystems.idp_metadata.healthy);

    let live = app.oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);
}
