//! Periodic channel credential renewal while a session is joined.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::models::participant::ParticipantRole;
use crate::services::media_client::RealtimeMediaClient;
use crate::services::token_issuer::TokenIssuer;

/// Who the credential belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTarget {
    pub channel_name: String,
    pub numeric_id: u32,
    pub role: ParticipantRole,
}

/// Handle to a running refresh timer, owned by one orchestrator.
///
/// [`RefreshHandle::cancel`] consumes the handle so a timer can only be
/// cancelled once. Dropping the handle also stops the timer.
#[derive(Debug)]
pub struct RefreshHandle {
    task: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct CredentialRefresher;

impl CredentialRefresher {
    /// Start the timer. The first check happens one `period` after start.
    pub fn spawn(
        issuer: Arc<dyn TokenIssuer>,
        media: Arc<dyn RealtimeMediaClient>,
        target: RefreshTarget,
        period: Duration,
    ) -> RefreshHandle {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                refresh_once(issuer.as_ref(), media.as_ref(), &target).await;
            }
        });
        RefreshHandle { task }
    }
}

/// One tick: renew if the issuer says the credential is expiring. Failures
/// are logged and left for the next tick.
pub async fn refresh_once(
    issuer: &dyn TokenIssuer,
    media: &dyn RealtimeMediaClient,
    target: &RefreshTarget,
) -> bool {
    let expiring = match issuer
        .is_token_expiring_soon(&target.channel_name, target.numeric_id)
        .await
    {
        Ok(expiring) => expiring,
        Err(err) => {
            tracing::warn!(
                channel = %target.channel_name,
                numeric_id = target.numeric_id,
                error = %err,
                "credential expiry check failed"
            );
            return false;
        }
    };
    if !expiring {
        return false;
    }

    let credential = match issuer
        .refresh_token(&target.channel_name, target.numeric_id, target.role)
        .await
    {
        Ok(credential) => credential,
        Err(err) => {
            tracing::warn!(
                channel = %target.channel_name,
                numeric_id = target.numeric_id,
                error = %err,
                "credential refresh failed, retrying on next tick"
            );
            return false;
        }
    };

    match media.renew_token(&credential).await {
        Ok(()) => {
            tracing::debug!(
                channel = %target.channel_name,
                numeric_id = target.numeric_id,
                expires_at = %credential.expires_at,
                "channel credential renewed"
            );
            true
        }
        Err(err) => {
            tracing::warn!(
                channel = %target.channel_name,
                numeric_id = target.numeric_id,
                error = %err,
                "media client rejected renewed credential"
            );
            false
        }
    }
}
