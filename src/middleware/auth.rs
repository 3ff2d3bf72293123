//! Identity extractors.
//!
//! Authentication happens upstream. The caller's user id arrives in a trusted
//! header (`AUTH_USER_HEADER`), and administrator routes require the configured
//! `ADMIN_API_TOKEN` as a bearer token.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

/// The authenticated end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let header = state.config.auth_user_header.as_str();
        let value = parts
            .headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::Unauthorized(format!("missing {header} header")))?;

        Uuid::parse_str(value)
            .map(CurrentUser)
            .map_err(|_| AppError::Unauthorized(format!("{header} is not a valid user id")))
    }
}

/// Marker for a request carrying the administrator token.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser;

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let Some(expected) = state.config.admin_api_token.as_deref() else {
            return Err(AppError::Forbidden("admin API is disabled".to_string()));
        };

        match bearer_token(&parts.headers) {
            Some(token) if tokens_match(token, expected) => Ok(AdminUser),
            Some(_) => {
                tracing::warn!("Rejected admin request with an invalid token");
                Err(AppError::Unauthorized("invalid admin token".to_string()))
            }
            None => Err(AppError::Unauthorized("missing bearer token".to_string())),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

// Digests have a fixed length, so the comparison time does not depend on the token.
fn tokens_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert_eq!(bearer_token(&headers), Some("s3cret"));
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("s3cret", "s3cret"));
        assert!(!tokens_match("s3cret", "s3cret "));
        assert!(!tokens_match("", "s3cret"));
    }
}
