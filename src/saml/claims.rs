//! Attribute to claim routing.
//!
//! Every attribute of an accepted response is routed to zero, one, or both
//! destinations: the local session, and the bearer-visible identity token
//! that downstream services may see.

use serde::Serialize;

use super::response::SamlResponse;

/// Claim type carrying the subject (NameID).
pub const SUBJECT_CLAIM: &str = "sub";

/// Security stamp claim; never leaves the engine.
pub const SECURITY_STAMP_CLAIM: &str = "AspNet.Identity.SecurityStamp";

const SESSION_ONLY_CLAIMS: &[&str] = &[
    "name",
    "given_name",
    "family_name",
    "email",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress",
];

const ROLE_CLAIMS: &[&str] = &[
    "role",
    "http://schemas.microsoft.com/ws/2008/06/identity/claims/role",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimDestination {
    /// Local session only.
    Session,
    /// Externally visible identity token.
    Bearer,
}

/// Destinations for a claim named `name`.
pub fn destinations(name: &str) -> &'static [ClaimDestination] {
    const NONE: &[ClaimDestination] = &[];
    const SESSION: &[ClaimDestination] = &[ClaimDestination::Session];
    const BOTH: &[ClaimDestination] = &[ClaimDestination::Session, ClaimDestination::Bearer];

    if name == SECURITY_STAMP_CLAIM {
        return NONE;
    }
    if name == SUBJECT_CLAIM || ROLE_CLAIMS.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return BOTH;
    }
    if SESSION_ONLY_CLAIMS.iter().any(|c| c.eq_ignore_ascii_case(name)) {
        return SESSION;
    }
    if name.len() >= 2
        && name
            .get(name.len() - 2..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case("id"))
    {
        return BOTH;
    }
    SESSION
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Claim {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// Claims of one accepted response, split by destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClaimSet {
    pub session: Vec<Claim>,
    pub bearer: Vec<Claim>,
}

impl ClaimSet {
    /// Route the subject and every attribute value of `response`.
    ///
    /// The subject comes only from the NameID; an attribute named like the
    /// subject claim is dropped.
    pub fn project(response: &SamlResponse) -> Self {
        let mut set = Self::default();
        set.add(Claim::new(SUBJECT_CLAIM, &response.name_id));
        for (name, values) in response.attributes.iter() {
            if name == SUBJECT_CLAIM {
                tracing::debug!("Ignoring SAML attribute that shadows the subject claim");
                continue;
            }
            for value in values {
                set.add(Claim::new(name, value));
            }
        }
        set
    }

    fn add(&mut self, claim: Claim) {
        for destination in destinations(&claim.claim_type) {
            match destination {
                ClaimDestination::Session => self.session.push(claim.clone()),
                ClaimDestination::Bearer => self.bearer.push(claim.clone()),
            }
        }
    }

    /// First value of `claim_type` routed to `destination`.
    pub fn find(&self, destination: ClaimDestination, claim_type: &str) -> Option<&str> {
        let claims = match destination {
            ClaimDestination::Session => &self.session,
            ClaimDestination::Bearer => &self.bearer,
        };
        claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.find(ClaimDestination::Session, SUBJECT_CLAIM)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("name", &[ClaimDestination::Session])]
    #[case("given_name", &[ClaimDestination::Session])]
    #[case("family_name", &[ClaimDestination::Session])]
    #[case("email", &[ClaimDestination::Session])]
    #[case("EMAIL", &[ClaimDestination::Session])]
    #[case(
        "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress",
        &[ClaimDestination::Session]
    )]
    #[case("role", &[ClaimDestination::Session, ClaimDestination::Bearer])]
    #[case(
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/role",
        &[ClaimDestination::Session, ClaimDestination::Bearer]
    )]
    #[case("tenantId", &[ClaimDestination::Session, ClaimDestination::Bearer])]
    #[case("employee_ID", &[ClaimDestination::Session, ClaimDestination::Bearer])]
    #[case("sub", &[ClaimDestination::Session, ClaimDestination::Bearer])]
    #[case("AspNet.Identity.SecurityStamp", &[])]
    #[case("department", &[ClaimDestination::Session])]
    #[case("i", &[ClaimDestination::Session])]
    fn test_destinations(#[case] name: &str, #[case] expected: &[ClaimDestination]) {
        assert_eq!(destinations(name), expected);
    }

    #[test]
    fn test_project_routes_attributes() {
        let response = SamlResponse {
            name_id: "alice@example.com".to_string(),
            attributes: [
                ("role", "admin"),
                ("role", "user"),
                ("email", "alice@example.com"),
                ("AspNet.Identity.SecurityStamp", "stamp"),
                ("objectid", "42"),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };

        let claims = ClaimSet::project(&response);

        assert_eq!(claims.subject(), Some("alice@example.com"));
        assert_eq!(
            claims.find(ClaimDestination::Bearer, "sub"),
            Some("alice@example.com")
        );

        let bearer_roles: Vec<&str> = claims
            .bearer
            .iter()
            .filter(|c| c.claim_type == "role")
            .map(|c| c.value.as_str())
            .collect();
        assert_eq!(bearer_roles, ["admin", "user"]);
        assert_eq!(claims.find(ClaimDestination::Session, "role"), Some("admin"));

        assert_eq!(
            claims.find(ClaimDestination::Session, "email"),
            Some("alice@example.com")
        );
        assert_eq!(claims.find(ClaimDestination::Bearer, "email"), None);

        assert_eq!(claims.find(ClaimDestination::Bearer, "objectid"), Some("42"));

        assert!(
            claims
                .session
                .iter()
                .chain(&claims.bearer)
                .all(|c| c.claim_type != SECURITY_STAMP_CLAIM)
        );
    }

    #[test]
    fn test_attribute_cannot_shadow_subject() {
        let response = SamlResponse {
            name_id: "alice@example.com".to_string(),
            attributes: [("sub", "admin@example.com"), ("role", "user")]
                .into_iter()
                .collect(),
            ..Default::default()
        };

        let claims = ClaimSet::project(&response);

        for claims in [&claims.session, &claims.bearer] {
            let subjects: Vec<&str> = claims
                .iter()
                .filter(|c| c.claim_type == SUBJECT_CLAIM)
                .map(|c| c.value.as_str())
                .collect();
            assert_eq!(subjects, ["alice@example.com"]);
        }
        assert_eq!(claims.find(ClaimDestination::Bearer, "role"), Some("user"));
    }
}
