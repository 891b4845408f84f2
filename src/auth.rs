//! Credential extraction from the `Authorization` header.
//!
//! Only the basic scheme (`Basic base64(username:secret)`) is accepted; the
//! decoded pair is forwarded to the backend as-is.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

const BASIC_SCHEME: &str = "basic";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("unsupported authorization scheme: {0}")]
    UnsupportedScheme(String),
    #[error("malformed basic credentials")]
    Malformed,
}

/// Caller identity and secret taken from a basic-auth header.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Parse the raw value of an `Authorization` header.
    pub fn from_authorization(header: Option<&str>) -> Result<Self, AuthError> {
        let header = header.map(str::trim).filter(|h| !h.is_empty());
        let header = header.ok_or(AuthError::Missing)?;
        let (scheme, encoded) = header.split_once(' ').ok_or(AuthError::Malformed)?;
        if !scheme.eq_ignore_ascii_case(BASIC_SCHEME) {
            return Err(AuthError::UnsupportedScheme(scheme.to_string()));
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AuthError::Malformed)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Malformed)?;
        let (username, secret) = decoded.split_once(':').ok_or(AuthError::Malformed)?;
        if username.is_empty() {
            return Err(AuthError::Malformed);
        }
        Ok(Self::new(username, secret))
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Render as an `Authorization` header value.
    pub fn to_authorization(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.secret));
        format!("Basic {encoded}")
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}
