//! JWT validation.
//!
//! Tokens are issued elsewhere; this server only verifies them. REST routes
//! carry the token as `Authorization: Bearer <jwt>`, websocket upgrades as a
//! `?token=` query parameter (headers are unavailable during a browser
//! upgrade handshake). HS256 with a shared secret throughout.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("jwt validation failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("subject is not a uuid")]
    BadSubject,
}

/// The claims this server cares about. Everything else in the token is
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Verify an HS256 token and return the user id from its `sub` claim.
pub fn verify_token(secret: &str, token: &str) -> Result<Uuid, AuthError> {
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Uuid::parse_str(&data.claims.sub).map_err(|_| AuthError::BadSubject)
}

/// Request extension carrying the authenticated user id, inserted by
/// [`require_jwt`].
#[derive(Debug, Clone, Copy)]
pub struct AuthedUser(pub Uuid);

/// Extension type carrying the shared secret, injected at router build time.
#[derive(Clone)]
pub struct JwtSecret(pub String);

/// Axum middleware that rejects requests without a valid bearer token and
/// stores the subject as an [`AuthedUser`] extension.
pub async fn require_jwt(mut request: Request, next: Next) -> Response {
    let Some(secret) = request.extensions().get::<JwtSecret>().map(|s| s.0.clone()) else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": "server configuration error"})),
        )
            .into_response();
    };

    let token = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let user_id = match token {
        Some(t) => match verify_token(&secret, t) {
            Ok(id) => id,
            Err(_) => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "invalid token"})),
                )
                    .into_response();
            }
        },
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing token"})),
            )
                .into_response();
        }
    };

    request.extensions_mut().insert(AuthedUser(user_id));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        exp: i64,
    }

    fn issue(secret: &str, sub: &str, exp_offset: i64) -> String {
        let claims = TestClaims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let user_id = Uuid::new_v4();
        let token = issue("secret", &user_id.to_string(), 3600);
        assert_eq!(verify_token("secret", &token).unwrap(), user_id);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = issue("secret", &Uuid::new_v4().to_string(), 3600);
        assert!(matches!(
            verify_token("other", &token),
            Err(AuthError::Jwt(_))
        ));
    }

    #[test]
    fn rejects_expired_token() {
        let token = issue("secret", &Uuid::new_v4().to_string(), -3600);
        assert!(verify_token("secret", &token).is_err());
    }

    #[test]
    fn rejects_non_uuid_subject() {
        let token = issue("secret", "not-a-uuid", 3600);
        assert!(matches!(
            verify_token("secret", &token),
            Err(AuthError::BadSubject)
        ));
    }

    #[test]
    fn rejects_empty_token() {
        assert!(matches!(
            verify_token("secret", ""),
            Err(AuthError::MissingToken)
        ));
    }
}
