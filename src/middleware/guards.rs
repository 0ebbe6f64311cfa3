//! Authentication guard: bearer-token validation and the extractor that
//! makes every chat endpoint require an authenticated identity.

use std::future::Future;
use std::pin::Pin;

use actix_web::{web, Error, FromRequest, HttpRequest};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::UserId;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Numeric user id, as issued by the external identity service.
    pub sub: String,
    /// Expiration, unix seconds.
    pub exp: i64,
}

/// Validate an HS256 token and extract the numeric user identity.
pub fn verify_token(secret: &str, token: &str) -> Result<UserId, AppError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized)?;

    data.claims
        .sub
        .parse::<UserId>()
        .map_err(|_| AppError::Unauthorized)
}

/// Issue a token for a user id. Used by tests and by deployments that run
/// without a separate identity service.
pub fn issue_token(secret: &str, user_id: UserId, ttl_secs: i64) -> Result<String, AppError> {
    let claims = Claims {
        sub: user_id.to_string(),
        exp: Utc::now().timestamp() + ttl_secs,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AppError::Internal)
}

fn bearer_token(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// An authenticated caller, extracted from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: UserId,
}

impl FromRequest for AuthedUser {
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        let token = bearer_token(req);
        let secret = req
            .app_data::<web::Data<AppState>>()
            .map(|state| state.config.jwt_secret.clone());

        Box::pin(async move {
            let secret = secret.ok_or(AppError::Internal)?;
            let token = token.ok_or(AppError::Unauthorized)?;
            let id = verify_token(&secret, &token)?;
            Ok(AuthedUser { id })
        })
    }
}

/// Token lookup for the WebSocket upgrade: browsers cannot set headers on
/// socket upgrades, so `?token=` is accepted as well.
pub fn ws_token(req: &HttpRequest, query_token: Option<&str>) -> Option<String> {
    query_token
        .map(|t| t.to_string())
        .or_else(|| bearer_token(req))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret-test-secret";

    #[test]
    fn token_round_trip() {
        let token = issue_token(SECRET, 42, 3600).unwrap();
        assert_eq!(verify_token(SECRET, &token).unwrap(), 42);
    }

    #[test]
    fn wrong_secret_is_unauthorized() {
        let token = issue_token(SECRET, 42, 3600).unwrap();
        assert!(matches!(
            verify_token("another-secret-entirely", &token),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let token = issue_token(SECRET, 42, -3600).unwrap();
        assert!(matches!(
            verify_token(SECRET, &token),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn garbage_token_is_unauthorized() {
        assert!(matches!(
            verify_token(SECRET, "not-a-jwt"),
            Err(AppError::Unauthorized)
        ));
    }
}
