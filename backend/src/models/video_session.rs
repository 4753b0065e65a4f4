//! Models for live class occurrences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::types::{ClassId, UserId, VideoSessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
/// Lifecycle status of a video session.
pub enum SessionStatus {
    Scheduled,
    Live,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Live => "live",
            SessionStatus::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
/// One live occurrence of a class being taught virtually.
pub struct VideoSession {
    /// Unique identifier for the session.
    pub id: VideoSessionId,
    /// Class this occurrence belongs to.
    pub class_id: ClassId,
    /// Teacher hosting the session.
    pub teacher_id: UserId,
    /// Media channel name, unique per occurrence.
    pub channel_name: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Members currently holding an open participant row.
    pub participant_count: i32,
    /// Timestamp when the session was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp when the host ended the session.
    pub ended_at: Option<DateTime<Utc>>,
    /// Whole seconds between creation and end, filled in on end.
    pub duration_seconds: Option<i64>,
}

impl VideoSession {
    pub fn is_live(&self) -> bool {
        self.status == SessionStatus::Live
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
/// Payload for creating a new live session.
pub struct NewVideoSession {
    pub class_id: ClassId,
    pub teacher_id: UserId,
    #[validate(length(min = 1, max = 64))]
    pub channel_name: String,
}

/// Builds a fresh channel name for a new occurrence of `class_id`.
///
/// Providers cap channel names at 64 bytes, so the name is the class id
/// without dashes plus a short random suffix.
pub fn channel_name_for(class_id: ClassId) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("class-{}-{}", class_id.as_uuid().simple(), &suffix[..8])
}
