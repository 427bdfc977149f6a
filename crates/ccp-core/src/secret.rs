//! Secret value wrapper with automatic zeroing on drop.
//!
//! `SecretString` wraps a retrieved password in a `Zeroizing<String>` that is
//! cleared from memory when dropped. Debug and Display implementations always
//! show `[REDACTED]`.

use std::fmt;

use serde_json::{Map, Value};
use zeroize::Zeroizing;

/// Placeholder printed instead of secret material.
pub const REDACTED: &str = "[REDACTED]";

/// Field of a GetPassword response that carries the secret.
pub const CONTENT_FIELD: &str = "Content";

/// A secret string that is zeroed from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(value: String) -> Self {
        Self(Zeroizing::new(value))
    }

    /// Access the plaintext.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

// ---------------------------------------------------------------------------
// SecretResult
// ---------------------------------------------------------------------------

/// Why a response object could not be turned into a [`SecretResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    #[error("response has no 'Content' field")]
    Missing,

    #[error("response field 'Content' is not a string")]
    NotAString,
}

/// A retrieved secret together with the full GetPassword response.
///
/// `secret` always equals `detail["Content"]`.
#[derive(Clone, PartialEq)]
pub struct SecretResult {
    secret: SecretString,
    detail: Map<String, Value>,
}

impl SecretResult {
    /// Extract the secret from a response object.
    pub fn from_detail(detail: Map<String, Value>) -> Result<Self, ContentError> {
        let secret = match detail.get(CONTENT_FIELD) {
            Some(Value::String(s)) => SecretString::new(s.clone()),
            Some(_) => return Err(ContentError::NotAString),
            None => return Err(ContentError::Missing),
        };
        Ok(Self { secret, detail })
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// The complete response object, `Content` included.
    pub fn detail(&self) -> &Map<String, Value> {
        &self.detail
    }

    pub fn into_parts(self) -> (SecretString, Map<String, Value>) {
        (self.secret, self.detail)
    }
}

impl fmt::Debug for SecretResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut detail = self.detail.clone();
        detail.insert(CONTENT_FIELD.into(), Value::String(REDACTED.into()));
        f.debug_struct("SecretResult")
            .field("secret", &self.secret)
            .field("detail", &detail)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
