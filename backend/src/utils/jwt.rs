use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::credential::{TokenRequest, TokenResponse};
use crate::models::participant::ParticipantRole;
use crate::models::user::UserRole;

/// Claims of the access token issued by the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub name: String,
    pub role: UserRole,
    pub exp: i64,    // expiration time
    pub iat: i64,    // issued at
    pub jti: String, // JWT ID
}

impl Claims {
    pub fn new(user_id: String, name: String, role: UserRole, expiration_hours: u64) -> Self {
        let now = Utc::now();
        let exp = now + Duration::hours(expiration_hours as i64);

        Self {
            sub: user_id,
            name,
            role,
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }
}

pub fn create_access_token(
    user_id: String,
    name: String,
    role: UserRole,
    secret: &str,
    expiration_hours: u64,
) -> anyhow::Result<String> {
    let claims = Claims::new(user_id, name, role, expiration_hours);
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )?;

    Ok(token)
}

pub fn verify_access_token(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let validation = Validation::default();
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &validation,
    )?;

    Ok(token_data.claims)
}

/// Claims carried by a media channel token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelClaims {
    pub app: String,
    pub channel: String,
    pub uid: u32,
    pub role: ParticipantRole,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// Signs channel tokens with the media provider certificate.
#[derive(Clone)]
pub struct ChannelTokenSigner {
    app_id: String,
    certificate: String,
    ttl: Duration,
}

impl ChannelTokenSigner {
    pub fn new(app_id: impl Into<String>, certificate: impl Into<String>, ttl_seconds: u64) -> Self {
        Self {
            app_id: app_id.into(),
            certificate: certificate.into(),
            ttl: Duration::seconds(ttl_seconds as i64),
        }
    }

    pub fn sign(&self, request: &TokenRequest, now: DateTime<Utc>) -> anyhow::Result<TokenResponse> {
        let expires_at = now + self.ttl;
        let claims = ChannelClaims {
            app: self.app_id.clone(),
            channel: request.channel_name.clone(),
            uid: request.numeric_id,
            role: request.role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.certificate.as_ref()),
        )?;

        Ok(TokenResponse { token, expires_at })
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<ChannelClaims> {
        let token_data = decode::<ChannelClaims>(
            token,
            &DecodingKey::from_secret(self.certificate.as_ref()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}

impl std::fmt::Debug for ChannelTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTokenSigner")
            .field("app_id", &self.app_id)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
