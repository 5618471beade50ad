use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::json;

use super::cookies::auth_token;
use super::guard::{check_access, Access};
use super::jwt::TokenIssuer;
use crate::models::UserRole;

/// Authenticate the request and apply the role guard
///
/// The token comes from the `auth_token` cookie, falling back to
/// `Authorization: Bearer`. Valid claims are inserted into the request
/// extensions for the handlers.
pub async fn require_auth(
    State(issuer): State<Arc<TokenIssuer>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = auth_token(&jar)
        .or_else(|| bearer_token(&req))
        .ok_or(AuthError::MissingToken)?;

    let claims = issuer.validate(&token).map_err(|e| {
        tracing::debug!("Rejected token on {}: {}", req.uri().path(), e);
        AuthError::InvalidToken
    })?;

    if check_access(req.uri().path(), Some(claims.role)) == Access::Forbidden {
        tracing::warn!(
            "{} ({}) denied access to {}",
            claims.email,
            claims.role,
            req.uri().path()
        );
        return Err(AuthError::Forbidden(claims.role));
    }

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
    Forbidden(UserRole),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingToken => {
                (StatusCode::UNAUTHORIZED, "authentication required".to_string())
            }
            AuthError::InvalidToken => {
                (StatusCode::UNAUTHORIZED, "invalid or expired token".to_string())
            }
            AuthError::Forbidden(role) => (
                StatusCode::FORBIDDEN,
                format!("role {} may not access this resource", role),
            ),
        };

        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_auth_error_responses() {
        assert_eq!(
            AuthError::MissingToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidToken.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Forbidden(UserRole::User).into_response().status(),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_bearer_token() {
        let req = Request::builder()
            .header(header::AUTHORIZATION, "Bearer abc.def.ghi")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&req), Some("abc.def.ghi".to_string()));

        let basic = Request::builder()
            .header(header::AUTHORIZATION, "Basic dXNlcjpwdw==")
            .body(Body::empty())
            .unwrap();
        assert_eq!(bearer_token(&basic), None);
    }
}
