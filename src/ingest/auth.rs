use axum::http::HeaderMap;
use tracing::warn;

use crate::shared::AppError;

/// Validates the bearer credential on an inbound webhook call.
///
/// A missing header, a missing configured secret, or a mismatch all reject
/// with `Unauthorized` before any other processing happens.
pub fn authorize(headers: &HeaderMap, configured_secret: Option<&str>) -> Result<(), AppError> {
    let secret = configured_secret.ok_or_else(|| {
        warn!("No webhook secret configured, rejecting ingest call");
        AppError::Unauthorized("Webhook ingest is not configured".to_string())
    })?;

    let auth_header = headers
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .ok_or_else(|| {
            warn!("Missing Authorization header in webhook request");
            AppError::Unauthorized("Missing authorization header".to_string())
        })?;

    let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        warn!("Invalid Authorization header format (expected Bearer token)");
        AppError::Unauthorized("Invalid authorization header format".to_string())
    })?;

    if !constant_time_eq(token.as_bytes(), secret.as_bytes()) {
        warn!("Webhook token mismatch");
        return Err(AppError::Unauthorized("Invalid token".to_string()));
    }

    Ok(())
}

/// Byte comparison that does not short-circuit on the first differing byte.
/// Sequences of different lengths are rejected up front.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_token(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Authorization",
            HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
        );
        headers
    }

    #[test]
    fn test_matching_token_is_accepted() {
        let headers = headers_with_token("s3cret");
        assert!(authorize(&headers, Some("s3cret")).is_ok());
    }

    #[test]
    fn test_missing_header_is_rejected() {
        let headers = HeaderMap::new();
        let err = authorize(&headers, Some("s3cret")).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_missing_configured_secret_is_rejected() {
        let headers = headers_with_token("s3cret");
        let err = authorize(&headers, None).unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn test_wrong_token_is_rejected() {
        let headers = headers_with_token("wrong");
        assert!(authorize(&headers, Some("s3cret")).is_err());
        // Same length, still rejected.
        let headers = headers_with_token("s3cre7");
        assert!(authorize(&headers, Some("s3cret")).is_err());
    }

    #[test]
    fn test_non_bearer_scheme_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Basic s3cret"));
        assert!(authorize(&headers, Some("s3cret")).is_err());
    }

    #[test]
    fn test_constant_time_eq_semantics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }
}
