//! Authenticated caller identity and role metadata.
//!
//! Accounts are owned by the external auth provider; this crate only sees the
//! claims carried in the caller's access token.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::models::participant::ParticipantRole;
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Roles issued by the auth provider.
pub enum UserRole {
    /// Student enrolled in classes.
    #[default]
    Student,
    /// Teacher hosting classes.
    Teacher,
    /// School administrator.
    Admin,
}

impl UserRole {
    /// Returns the canonical snake_case representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Student => "student",
            UserRole::Teacher => "teacher",
            UserRole::Admin => "admin",
        }
    }

    /// Whether this role may publish media and host a live class.
    pub fn can_host(&self) -> bool {
        matches!(self, UserRole::Teacher | UserRole::Admin)
    }

    /// Media channel role this account joins with.
    pub fn participant_role(&self) -> ParticipantRole {
        if self.can_host() {
            ParticipantRole::Publisher
        } else {
            ParticipantRole::Subscriber
        }
    }
}

impl Serialize for UserRole {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(UserRole::Student),
            "teacher" => Ok(UserRole::Teacher),
            "admin" | "school_admin" => Ok(UserRole::Admin),
            _ => Err(serde::de::Error::unknown_variant(
                &s,
                &["student", "teacher", "admin"],
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// The caller of an authenticated request.
pub struct AuthUser {
    pub id: UserId,
    pub display_name: String,
    pub role: UserRole,
}
