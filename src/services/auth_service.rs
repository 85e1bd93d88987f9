//! Basic-auth check guarding uploads.
//!
//! A single username/password pair is configured for the whole service.
//! Every failure reason collapses to 401 at the HTTP layer; the variants
//! below exist only for logging.

use axum::http::HeaderValue;
use base64::{Engine as _, engine::general_purpose};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("authorization header is missing")]
    MissingHeader,
    #[error("invalid authorization type")]
    InvalidScheme,
    #[error("failed to decode basic auth info")]
    InvalidEncoding,
    #[error("basic auth info is not `user:password`")]
    MalformedCredentials,
    #[error("invalid credentials")]
    InvalidCredentials,
}

/// The configured credential pair.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Validate a raw `Authorization` header value.
    ///
    /// Accepts only `Basic <base64(user:password)>`. The password may itself
    /// contain `:`; the split happens at the first one.
    pub fn verify(&self, header: Option<&HeaderValue>) -> Result<(), AuthError> {
        let header = header.ok_or(AuthError::MissingHeader)?;
        if header.is_empty() {
            return Err(AuthError::MissingHeader);
        }

        let raw = header.as_bytes();
        let space = raw
            .iter()
            .position(|b| *b == b' ')
            .ok_or(AuthError::InvalidScheme)?;
        let (scheme, info) = (&raw[..space], &raw[space + 1..]);
        if scheme != b"Basic" {
            return Err(AuthError::InvalidScheme);
        }

        let decoded = general_purpose::STANDARD
            .decode(info)
            .map_err(|_| AuthError::InvalidEncoding)?;
        let colon = decoded
            .iter()
            .position(|b| *b == b':')
            .ok_or(AuthError::MalformedCredentials)?;
        let (username, password) = (&decoded[..colon], &decoded[colon + 1..]);

        // Evaluate both comparisons so the timing doesn't reveal which field failed.
        let user_ok = constant_time_eq(username, self.username.as_bytes());
        let pass_ok = constant_time_eq(password, self.password.as_bytes());
        if user_ok & pass_ok {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
