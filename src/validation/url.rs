//! URL checks for metadata locations and post-login redirects.

/// Errors from URL validation.
#[derive(Debug, thiserror::Error)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("URL scheme must be https")]
    InvalidScheme,

    #[error("URL must include a hostname")]
    MissingHost,

    #[error("Redirect target must be a relative path")]
    ExternalRedirect,
}

/// Validate that a URL uses HTTPS scheme and names a host.
pub fn require_https(url: &str) -> Result<(), UrlValidationError> {
    let parsed = url::Url::parse(url).map_err(|e| UrlValidationError::InvalidUrl(e.to_string()))?;
    if parsed.scheme() != "https" {
        return Err(UrlValidationError::InvalidScheme);
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }
    Ok(())
}

/// Accept only same-origin relative paths as a post-login redirect.
///
/// Rejects absolute URLs, protocol-relative `//host` forms and backslash
/// variants that browsers normalize to `//`.
pub fn validate_redirect_target(target: &str) -> Result<(), UrlValidationError> {
    let is_relative_path = target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control);
    if is_relative_path {
        Ok(())
    } else {
        Err(UrlValidationError::ExternalRedirect)
    }
}

/// The redirect target to use after login, falling back to `/`.
pub fn safe_redirect_target(target: Option<&str>) -> &str {
    match target {
        Some(target) if validate_redirect_target(target).is_ok() => target,
        Some(target) => {
            tracing::warn!(target = %target, "Ignoring non-relative post-login redirect");
            "/"
        }
        None => "/",
    }
}
