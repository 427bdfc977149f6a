//! Turns a GetPassword HTTP response into a secret or a typed failure.

use ccp_core::secret::ContentError;
use ccp_core::{ApiError, ErrorCode, SearchCriteria, SecretResult};
use reqwest::StatusCode;
use serde_json::Value;

/// Message used when a 200 response carries no password.
pub const MISSING_CONTENT_MESSAGE: &str = "Could not find the password ('Content') in the response";

/// The redacted description attached to every error for a request.
pub fn describe_request(url: &str, criteria: &SearchCriteria) -> String {
    format!("url: {url}, params: {}", criteria.redacted())
}

/// `true` for `application/json` and `application/*+json`, ignoring
/// parameters such as `charset`.
pub fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence == "application/json"
        || (essence.starts_with("application/") && essence.ends_with("+json"))
}

/// Classify a received response.
///
/// `request` is the redacted request description; it becomes the error
/// details whenever the vault does not supply its own.
pub fn classify(
    status: StatusCode,
    content_type: Option<&str>,
    body: &[u8],
    request: &str,
) -> Result<SecretResult, crate::ProviderError> {
    use crate::ProviderError;

    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    let code = status.as_u16();
    let reason = status.canonical_reason().unwrap_or("Unknown Status");

    // A body without a JSON content type is never decoded.
    if !trimmed.is_empty() && !content_type.is_some_and(is_json_content_type) {
        return Err(ProviderError::UnexpectedResponse {
            status: code,
            reason: format!(
                "unexpected content type '{}'",
                content_type.unwrap_or("<none>")
            ),
            body: text.into_owned(),
            request: request.to_owned(),
        });
    }

    let invalid_json = || {
        ProviderError::Api(ApiError::new(
            code,
            ErrorCode::InvalidJson,
            MISSING_CONTENT_MESSAGE,
            request,
        ))
    };
    let http_status = || ProviderError::Api(ApiError::new(code, ErrorCode::HttpStatus, reason, request));

    let parsed = if trimmed.is_empty() {
        None
    } else {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => Some(value),
            Err(_) => return Err(http_status()),
        }
    };

    if status == StatusCode::OK {
        let Some(Value::Object(detail)) = parsed else {
            return Err(invalid_json());
        };
        return SecretResult::from_detail(detail).map_err(|e| match e {
            ContentError::Missing => invalid_json(),
            ContentError::NotAString => ProviderError::UnexpectedResponse {
                status: code,
                reason: e.to_string(),
                body: text.into_owned(),
                request: request.to_owned(),
            },
        });
    }

    let Some(payload) = parsed else {
        return Err(http_status());
    };

    let details = match payload.get("Details") {
        Some(Value::String(details)) => details.clone(),
        None | Some(Value::Null) => request.to_owned(),
        Some(other) => other.to_string(),
    };

    match (payload.get("ErrorCode"), payload.get("ErrorMsg")) {
        (Some(Value::String(vault_code)), Some(Value::String(message))) => {
            let err = ApiError::new(code, ErrorCode::Vault(vault_code.clone()), message, details);
            if err.code.is_account_not_found() {
                Err(ProviderError::NotFound(err))
            } else {
                Err(ProviderError::Api(err))
            }
        }
        (Some(_), Some(_)) => Err(ProviderError::UnexpectedResponse {
            status: code,
            reason: "'ErrorCode' and 'ErrorMsg' must be strings".into(),
            body: text.into_owned(),
            request: request.to_owned(),
        }),
        _ => Err(http_status()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProviderError;
    use serde_json::json;

    const REQUEST: &str = "url: https://h/AIMWebService/api/Accounts, params: {safe: S, appid: <hidden>}";

    fn run(status: u16, content_type: Option<&str>, body: &str) -> Result<SecretResult, ProviderError> {
        classify(
            StatusCode::from_u16(status).unwrap(),
            content_type,
            body.as_bytes(),
            REQUEST,
        )
    }

    fn json_body(status: u16, body: Value) -> Result<SecretResult, ProviderError> {
        run(status, Some("application/json; charset=utf-8"), &body.to_string())
    }

    #[test]
    fn success_keeps_every_field() {
        let result = json_body(200, json!({"Content": "p@ss", "X": 1})).unwrap();
        assert_eq!(result.secret().expose(), "p@ss");
        assert_eq!(
            Value::Object(result.detail().clone()),
            json!({"Content": "p@ss", "X": 1})
        );
    }

    #[test]
    fn success_without_content_is_invalid_json() {
        for body in [json!({"UserName": "u"}), json!(["Content"]), json!("x")] {
            let err = json_body(200, body).unwrap_err();
            let api = err.api_error().unwrap();
            assert_eq!(api.code, ErrorCode::InvalidJson);
            assert_eq!(api.status, 200);
            assert_eq!(api.details, REQUEST);
        }

        let err = run(200, None, "").unwrap_err();
        assert_eq!(err.api_error().unwrap().code, ErrorCode::InvalidJson);
    }

    #[test]
    fn unparseable_body_uses_reason_phrase_for_any_status() {
        for (status, reason) in [(200, "OK"), (502, "Bad Gateway")] {
            let err = run(status, Some("application/json"), "{not json").unwrap_err();
            let api = err.api_error().unwrap();
            assert_eq!(api.code.as_str(), "HTTP_ERR_CODE");
            assert_eq!(api.message, reason);
            assert_eq!(api.status, status);
        }
    }

    #[test]
    fn body_without_content_type_is_unexpected() {
        let err = run(200, None, r#"{"Content": "p@ss"}"#).unwrap_err();
        assert!(err.is_runtime());
        let ProviderError::UnexpectedResponse { reason, .. } = err else {
            panic!("expected UnexpectedResponse");
        };
        assert!(reason.contains("<none>"));
    }

    #[test]
    fn non_string_content_is_unexpected() {
        let err = json_body(200, json!({"Content": 42})).unwrap_err();
        assert!(err.is_runtime());
        assert!(matches!(err, ProviderError::UnexpectedResponse { status: 200, .. }));
    }

    #[test]
    fn account_not_found_maps_to_not_found() {
        let err = json_body(
            404,
            json!({
                "ErrorCode": "APPAP004E",
                "ErrorMsg": "Password object matching query [Safe=S] was not found",
                "Details": null,
            }),
        )
        .unwrap_err();
        let ProviderError::NotFound(api) = err else {
            panic!("expected NotFound");
        };
        assert_eq!(api.status, 404);
        assert_eq!(api.message, "Password object matching query [Safe=S] was not found");
        assert_eq!(api.details, REQUEST);
    }

    #[test]
    fn other_vault_codes_are_preserved() {
        let err = json_body(
            500,
            json!({
                "ErrorCode": "APPAP282E",
                "ErrorMsg": "Provider is locked",
                "Details": "maintenance window",
            }),
        )
        .unwrap_err();
        let ProviderError::Api(api) = err else {
            panic!("expected Api");
        };
        assert_eq!(api.code, ErrorCode::Vault("APPAP282E".into()));
        assert_eq!(api.message, "Provider is locked");
        assert_eq!(api.details, "maintenance window");
    }

    #[test]
    fn non_string_error_fields_are_unexpected() {
        let err = json_body(400, json!({"ErrorCode": 7, "ErrorMsg": "m"})).unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedResponse { status: 400, .. }));
    }

    #[test]
    fn bare_http_errors_use_reason_phrase() {
        let err = json_body(500, json!({})).unwrap_err();
        let api = err.api_error().unwrap();
        assert_eq!(api.code, ErrorCode::HttpStatus);
        assert_eq!(api.message, "Internal Server Error");

        let err = run(502, Some("application/json"), "<oops").unwrap_err();
        assert_eq!(err.api_error().unwrap().message, "Bad Gateway");

        let err = run(503, None, "").unwrap_err();
        assert_eq!(err.api_error().unwrap().code, ErrorCode::HttpStatus);
    }

    #[test]
    fn foreign_content_type_keeps_body() {
        let err = run(200, Some("text/html"), "<html>login</html>").unwrap_err();
        let ProviderError::UnexpectedResponse { body, reason, .. } = err else {
            panic!("expected UnexpectedResponse");
        };
        assert_eq!(body, "<html>login</html>");
        assert!(reason.contains("text/html"));
    }

    #[test]
    fn json_content_type_detection() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("Application/JSON; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type(""));
    }

    #[test]
    fn request_description_hides_appid() {
        let criteria = SearchCriteria::new().with("safe", "S").with_appid("App1");
        let described = describe_request("https://h/AIMWebService/api/Accounts", &criteria);
        assert!(described.contains("<hidden>"));
        assert!(!described.contains("App1"));
    }
}
