//! Session membership rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::types::{ParticipantId, UserId, VideoSessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
/// What a participant may do inside a media channel.
pub enum ParticipantRole {
    /// Sends audio and video (the teacher).
    Publisher,
    /// Only receives media (a student).
    Subscriber,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantRole::Publisher => "publisher",
            ParticipantRole::Subscriber => "subscriber",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
/// A user's membership in one session, open while `left_at` is empty.
pub struct SessionParticipant {
    pub id: ParticipantId,
    pub session_id: VideoSessionId,
    pub user_id: UserId,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl SessionParticipant {
    pub fn is_open(&self) -> bool {
        self.left_at.is_none()
    }
}
