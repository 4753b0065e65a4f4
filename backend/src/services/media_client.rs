//! Boundary to the managed real-time video SDK.
//!
//! Connection establishment, codecs and transport all live on the provider's
//! side. The orchestrator only needs the operations of
//! [`RealtimeMediaClient`] and a typed stream of [`MediaEvent`]s, which keeps
//! the presence bookkeeping independent of the SDK's own event objects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::SessionError;
use crate::models::credential::Credential;

/// Kind of media track a remote participant published or unpublished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Connection state reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Disconnecting,
    #[serde(other)]
    Other,
}

/// Lifecycle events emitted by the media client.
///
/// The serialized form uses the provider's event names (`user-joined`,
/// `connection-state-change`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum MediaEvent {
    UserJoined {
        uid: u32,
    },
    UserLeft {
        uid: u32,
    },
    UserPublished {
        uid: u32,
        #[serde(rename = "mediaType")]
        kind: MediaKind,
    },
    UserUnpublished {
        uid: u32,
        #[serde(rename = "mediaType")]
        kind: MediaKind,
    },
    ConnectionStateChange {
        #[serde(rename = "curState")]
        current: ConnectionState,
    },
}

impl MediaEvent {
    /// Provider event name.
    pub fn name(&self) -> &'static str {
        match self {
            MediaEvent::UserJoined { .. } => "user-joined",
            MediaEvent::UserLeft { .. } => "user-left",
            MediaEvent::UserPublished { .. } => "user-published",
            MediaEvent::UserUnpublished { .. } => "user-unpublished",
            MediaEvent::ConnectionStateChange { .. } => "connection-state-change",
        }
    }
}

/// A participant already present in the channel when we join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUser {
    pub numeric_id: u32,
    pub has_audio: bool,
    pub has_video: bool,
}

/// Operations the orchestrator relies on. Every call is asynchronous and may
/// fail on its own; failures surface as [`SessionError::Connection`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RealtimeMediaClient: Send + Sync {
    async fn initialize(&self) -> Result<(), SessionError>;

    async fn join_channel(
        &self,
        channel_name: &str,
        credential: &Credential,
        numeric_id: u32,
    ) -> Result<(), SessionError>;

    async fn leave_channel(&self) -> Result<(), SessionError>;

    async fn publish_local_video(&self, target_surface_id: &str) -> Result<(), SessionError>;

    async fn publish_local_audio(&self) -> Result<(), SessionError>;

    async fn mute_local_audio(&self) -> Result<(), SessionError>;

    async fn unmute_local_audio(&self) -> Result<(), SessionError>;

    async fn disable_local_video(&self) -> Result<(), SessionError>;

    async fn enable_local_video(&self) -> Result<(), SessionError>;

    async fn get_remote_users(&self) -> Result<Vec<RemoteUser>, SessionError>;

    async fn renew_token(&self, credential: &Credential) -> Result<(), SessionError>;

    /// Subscribe to the client's event stream.
    fn subscribe(&self) -> broadcast::Receiver<MediaEvent>;
}
