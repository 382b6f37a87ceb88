//! Authorization context.
//!
//! Token issuance lives elsewhere; this side only decodes the Bearer
//! token, resolves the acting doctor and derives role facts. Every
//! failure on that path is a 401 — the request never reaches a handler
//! without an authenticated actor.

use std::sync::Arc;

use axum::{extract::FromRequestParts, http::header, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Doctor;
use crate::repository::Repository;
use crate::services::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
}

/// Mint a token for a doctor account. Used by the test suite and by
/// operational tooling; the login service proper is a separate system.
pub fn issue_token(
    doctor_id: Uuid,
    secret: &str,
) -> std::result::Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: doctor_id,
        exp: now + 3600,
        iat: now,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

fn decode_token(
    token: &str,
    secret: &str,
) -> std::result::Result<Claims, jsonwebtoken::errors::Error> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let data = decode::<Claims>(token, &key, &Validation::new(Algorithm::HS256))?;
    Ok(data.claims)
}

/// The authenticated doctor extracted from the Bearer token.
pub struct AuthDoctor(pub Doctor);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthDoctor {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(Error::Unauthenticated)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(Error::Unauthenticated)?;
        let claims =
            decode_token(token, &state.config.jwt_secret).map_err(|_| Error::Unauthenticated)?;
        let doctor = state
            .repo
            .doctor_by_id(claims.sub)
            .await?
            .ok_or(Error::Unauthenticated)?;
        Ok(AuthDoctor(doctor))
    }
}

/// Participant-only endpoints (a participant is a patient with a login).
pub fn require_participant(doctor: &Doctor) -> Result<()> {
    if doctor.is_participant() {
        Ok(())
    } else {
        Err(Error::Forbidden)
    }
}

/// Doctor-facing endpoints are closed to participant accounts.
pub fn require_doctor(doctor: &Doctor) -> Result<()> {
    if doctor.is_participant() {
        Err(Error::Forbidden)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips() {
        let id = Uuid::new_v4();
        let token = issue_token(id, "secret").unwrap();
        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, id);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(Uuid::new_v4(), "secret").unwrap();
        assert!(decode_token(&token, "other").is_err());
    }
}
