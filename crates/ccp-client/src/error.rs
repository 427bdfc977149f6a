use ccp_core::{ApiError, ConfigError, ParamError};

/// Failure of a credential request.
///
/// Every variant is terminal: the client never retries.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("invalid search criteria: {0}")]
    Validation(#[from] ParamError),

    /// The vault reported that no account matches the criteria.
    #[error("account not found: {0}")]
    NotFound(ApiError),

    #[error("vault API error: {0}")]
    Api(ApiError),

    /// Connection, TLS, timeout or body-read failure.
    #[error("HTTP error: {source} || Additional Details : {request}")]
    Transport {
        request: String,
        #[source]
        source: reqwest::Error,
    },

    /// The response could not be interpreted (wrong content type, unexpected
    /// field types). `body` holds the raw payload for diagnostics.
    #[error("HTTP error {status}: {reason} || Additional Details : {request}")]
    UnexpectedResponse {
        status: u16,
        reason: String,
        body: String,
        request: String,
    },

    #[error("concurrency gate closed while waiting for a permit || Additional Details : {request}")]
    GateClosed { request: String },
}

impl ProviderError {
    /// Execution failures, as opposed to configuration, validation or
    /// vault-reported errors.
    pub fn is_runtime(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::UnexpectedResponse { .. } | Self::GateClosed { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// The vault/HTTP error payload, for `NotFound` and `Api`.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::NotFound(err) | Self::Api(err) => Some(err),
            _ => None,
        }
    }

    /// HTTP status of the response, when one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::NotFound(err) | Self::Api(err) => Some(err.status),
            Self::UnexpectedResponse { status, .. } => Some(*status),
            Self::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccp_core::ErrorCode;

    #[test]
    fn runtime_classification() {
        let unexpected = ProviderError::UnexpectedResponse {
            status: 200,
            reason: "x".into(),
            body: "y".into(),
            request: "z".into(),
        };
        assert!(unexpected.is_runtime());
        assert_eq!(unexpected.status(), Some(200));

        let api = ProviderError::Api(ApiError::new(500, ErrorCode::HttpStatus, "m", "d"));
        assert!(!api.is_runtime());
        assert_eq!(api.status(), Some(500));
        assert!(api.api_error().is_some());

        let config = ProviderError::from(ConfigError::MissingField("host"));
        assert!(!config.is_runtime());
        assert_eq!(config.status(), None);
    }

    #[test]
    fn not_found_is_distinct() {
        let err = ProviderError::NotFound(ApiError::new(
            404,
            ErrorCode::Vault("APPAP004E".into()),
            "Password object matching query [Safe=x] was not found",
            "d",
        ));
        assert!(err.is_not_found());
        assert!(err.to_string().starts_with("account not found: HTTP 404 [APPAP004E]"));
    }
}
