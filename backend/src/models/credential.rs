//! Channel credentials and the token endpoint's wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

use crate::models::participant::ParticipantRole;

/// A short-lived secret authorizing one participant to join one channel.
///
/// Lives only in process memory. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub channel_name: String,
    pub numeric_id: u32,
    pub role: ParticipantRole,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("channel_name", &self.channel_name)
            .field("numeric_id", &self.numeric_id)
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
/// Request body of `POST /api/video/token`.
pub struct TokenRequest {
    #[validate(length(min = 1, max = 64))]
    pub channel_name: String,
    #[validate(range(min = 1))]
    pub numeric_id: u32,
    pub role: ParticipantRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
/// Response body of `POST /api/video/token`.
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenResponse {
    pub fn into_credential(self, request: &TokenRequest) -> Credential {
        Credential {
            token: self.token,
            channel_name: request.channel_name.clone(),
            numeric_id: request.numeric_id,
            role: request.role,
            expires_at: self.expires_at,
        }
    }
}
