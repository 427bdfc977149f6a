//! Errors reported by the Central Credential Provider, or attributed to it.

use std::fmt;

/// Vault error code meaning "no account matches the search criteria".
pub const ACCOUNT_NOT_FOUND_CODE: &str = "APPAP004E";

/// Wire string for a 200 response without a usable `Content` field.
pub const INVALID_JSON_CODE: &str = "INVALID_JSON";

/// Wire string for HTTP failures that carry no vault error code.
pub const HTTP_ERROR_CODE: &str = "HTTP_ERR_CODE";

/// Where an [`ApiError`]'s code came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    /// Code reported by the vault in the `ErrorCode` field.
    Vault(String),
    /// Client-side: HTTP 200 whose body holds no password.
    InvalidJson,
    /// Client-side: HTTP error status without a vault error payload.
    HttpStatus,
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Vault(code) => code,
            Self::InvalidJson => INVALID_JSON_CODE,
            Self::HttpStatus => HTTP_ERROR_CODE,
        }
    }

    /// `true` when the vault itself produced this code.
    pub fn is_vault_reported(&self) -> bool {
        matches!(self, Self::Vault(_))
    }

    pub fn is_account_not_found(&self) -> bool {
        matches!(self, Self::Vault(code) if code == ACCOUNT_NOT_FOUND_CODE)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vault-reported or HTTP-level failure of a GetPassword request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("HTTP {status} [{code}] {message} || details: {details}")]
pub struct ApiError {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
    /// Vault `Details` when present, otherwise the redacted request.
    pub details: String,
}

impl ApiError {
    pub fn new(
        status: u16,
        code: ErrorCode,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: details.into(),
        }
    }
}
