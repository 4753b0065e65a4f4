//! Channel credential issuance.
//!
//! The orchestrator consumes [`TokenIssuer`]; [`HttpTokenIssuer`] is the
//! client for this backend's `POST /api/video/token` endpoint.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::config::SessionPolicy;
use crate::error::{ErrorResponse, SessionError};
use crate::models::credential::{Credential, TokenRequest, TokenResponse};
use crate::models::participant::ParticipantRole;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Issue a credential. Fails with [`SessionError::Auth`] when the caller
    /// may not join that channel with that role.
    async fn generate_token(&self, request: &TokenRequest) -> Result<Credential, SessionError>;

    /// Whether the credential last issued for this participant should be
    /// renewed now.
    async fn is_token_expiring_soon(
        &self,
        channel_name: &str,
        numeric_id: u32,
    ) -> Result<bool, SessionError>;

    async fn refresh_token(
        &self,
        channel_name: &str,
        numeric_id: u32,
        role: ParticipantRole,
    ) -> Result<Credential, SessionError>;

    /// Drop what is remembered about a participant's credential once the
    /// channel is left.
    fn forget_credential(&self, _channel_name: &str, _numeric_id: u32) {}
}

/// Expiry of the credentials issued so far, keyed by channel and participant.
#[derive(Debug, Default)]
pub struct ExpiryLedger {
    expiries: Mutex<HashMap<(String, u32), DateTime<Utc>>>,
}

impl ExpiryLedger {
    pub fn record(&self, credential: &Credential) {
        let mut expiries = self
            .expiries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        expiries.insert(
            (credential.channel_name.clone(), credential.numeric_id),
            credential.expires_at,
        );
    }

    pub fn expires_at(&self, channel_name: &str, numeric_id: u32) -> Option<DateTime<Utc>> {
        let expiries = self
            .expiries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        expiries
            .get(&(channel_name.to_string(), numeric_id))
            .copied()
    }

    /// A participant with no recorded credential counts as expiring.
    pub fn is_expiring(
        &self,
        channel_name: &str,
        numeric_id: u32,
        lead: chrono::Duration,
        now: DateTime<Utc>,
    ) -> bool {
        match self.expires_at(channel_name, numeric_id) {
            Some(expires_at) => expires_at - now <= lead,
            None => true,
        }
    }

    pub fn forget(&self, channel_name: &str, numeric_id: u32) {
        let mut expiries = self
            .expiries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        expiries.remove(&(channel_name.to_string(), numeric_id));
    }
}

/// Requests credentials from the backend token endpoint with the caller's
/// access token.
pub struct HttpTokenIssuer {
    client: reqwest::Client,
    endpoint: Url,
    access_token: String,
    refresh_lead: chrono::Duration,
    ledger: ExpiryLedger,
}

impl HttpTokenIssuer {
    /// Credentials within `policy.refresh_lead` of expiry are reported as
    /// expiring.
    pub fn new(
        base_url: &str,
        access_token: impl Into<String>,
        policy: &SessionPolicy,
    ) -> anyhow::Result<Self> {
        let endpoint = Url::parse(base_url)?.join("/api/video/token")?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            access_token: access_token.into(),
            refresh_lead: chrono::Duration::from_std(policy.refresh_lead)?,
            ledger: ExpiryLedger::default(),
        })
    }

    pub fn ledger(&self) -> &ExpiryLedger {
        &self.ledger
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    #[tracing::instrument(
        name = "token_issue",
        skip(self, request),
        fields(
            channel = %request.channel_name,
            numeric_id = request.numeric_id,
            role = request.role.as_str()
        ),
        err
    )]
    async fn generate_token(&self, request: &TokenRequest) -> Result<Credential, SessionError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .await
            .map_err(|e| SessionError::Connection(format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorResponse>()
                .await
                .map(|body| body.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SessionError::Auth(message),
                _ => SessionError::Connection(format!(
                    "token endpoint returned {}: {}",
                    status, message
                )),
            });
        }

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| SessionError::Connection(format!("malformed token response: {}", e)))?;
        let credential = body.into_credential(request);
        self.ledger.record(&credential);
        Ok(credential)
    }

    async fn is_token_expiring_soon(
        &self,
        channel_name: &str,
        numeric_id: u32,
    ) -> Result<bool, SessionError> {
        Ok(self
            .ledger
            .is_expiring(channel_name, numeric_id, self.refresh_lead, Utc::now()))
    }

    async fn refresh_token(
        &self,
        channel_name: &str,
        numeric_id: u32,
        role: ParticipantRole,
    ) -> Result<Credential, SessionError> {
        let request = TokenRequest {
            channel_name: channel_name.to_string(),
            numeric_id,
            role,
        };
        self.generate_token(&request).await
    }

    fn forget_credential(&self, channel_name: &str, numeric_id: u32) {
        self.ledger.forget(channel_name, numeric_id);
    }
}
