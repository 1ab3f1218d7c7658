//! Endpoint URL validation.
//!
//! The session endpoint and the realtime base URL are both user supplied. This
//! module checks that they:
//! - Parse as absolute URLs
//! - Use HTTP or HTTPS
//! - Have a host
//! - Carry no query string (the realtime URL gets `?model=` appended)

use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation
#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be http or https, got: {0}")]
    UnsupportedScheme(String),

    #[error("URL must have a host")]
    MissingHost,

    #[error("URL must not carry a query string")]
    UnexpectedQuery,
}

/// Validate an HTTP(S) endpoint URL.
pub fn validate_endpoint_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(UrlValidationError::UnsupportedScheme(other.to_string())),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(UrlValidationError::MissingHost);
    }

    Ok(url)
}

/// Validate a base URL that will receive a `?model=` query.
pub fn validate_base_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = validate_endpoint_url(raw)?;
    if url.query().is_some() {
        return Err(UrlValidationError::UnexpectedQuery);
    }
    Ok(url)
}
