//! In-memory presence of the participants of one live session.
//!
//! Media events can arrive in any order, so every mutation is an upsert or a
//! remove keyed by numeric participant id.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::models::participant::ParticipantRole;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceConnection {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceEntry {
    pub numeric_id: u32,
    pub display_name: String,
    pub role: ParticipantRole,
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub connection: PresenceConnection,
    pub last_active: DateTime<Utc>,
}

/// Partial update merged into an entry; `None` fields keep their value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PresenceUpdate {
    pub numeric_id: u32,
    pub display_name: Option<String>,
    pub role: Option<ParticipantRole>,
    pub audio_enabled: Option<bool>,
    pub video_enabled: Option<bool>,
    pub connection: Option<PresenceConnection>,
}

impl PresenceUpdate {
    pub fn new(numeric_id: u32) -> Self {
        Self {
            numeric_id,
            ..Default::default()
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn role(mut self, role: ParticipantRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn audio(mut self, enabled: bool) -> Self {
        self.audio_enabled = Some(enabled);
        self
    }

    pub fn video(mut self, enabled: bool) -> Self {
        self.video_enabled = Some(enabled);
        self
    }

    pub fn connection(mut self, connection: PresenceConnection) -> Self {
        self.connection = Some(connection);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    entries: BTreeMap<u32, PresenceEntry>,
    pinned: Option<u32>,
    raised_hands: BTreeSet<u32>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or merge an entry, stamping `last_active` with `now`.
    ///
    /// New entries default to a subscriber with media off, connecting, and a
    /// generic display name until a later update fills them in.
    pub fn add_or_update(&mut self, update: PresenceUpdate, now: DateTime<Utc>) -> &PresenceEntry {
        let id = update.numeric_id;
        let entry = self.entries.entry(id).or_insert_with(|| PresenceEntry {
            numeric_id: id,
            display_name: format!("Participant {}", id),
            role: ParticipantRole::Subscriber,
            audio_enabled: false,
            video_enabled: false,
            connection: PresenceConnection::Connecting,
            last_active: now,
        });

        if let Some(name) = update.display_name {
            entry.display_name = name;
        }
        if let Some(role) = update.role {
            entry.role = role;
        }
        if let Some(audio) = update.audio_enabled {
            entry.audio_enabled = audio;
        }
        if let Some(video) = update.video_enabled {
            entry.video_enabled = video;
        }
        if let Some(connection) = update.connection {
            entry.connection = connection;
        }
        entry.last_active = now;
        entry
    }

    /// Remove an entry together with its raised hand and pin. Unknown ids are
    /// a no-op.
    pub fn remove(&mut self, numeric_id: u32) -> Option<PresenceEntry> {
        self.raised_hands.remove(&numeric_id);
        if self.pinned == Some(numeric_id) {
            self.pinned = None;
        }
        self.entries.remove(&numeric_id)
    }

    /// Pin a known participant, or clear the pin with `None`. Returns false
    /// when the id is not present.
    pub fn set_pinned(&mut self, numeric_id: Option<u32>) -> bool {
        match numeric_id {
            None => {
                self.pinned = None;
                true
            }
            Some(id) if self.entries.contains_key(&id) => {
                self.pinned = Some(id);
                true
            }
            Some(_) => false,
        }
    }

    pub fn pinned(&self) -> Option<u32> {
        self.pinned
    }

    pub fn raise_hand(&mut self, numeric_id: u32) -> bool {
        if !self.entries.contains_key(&numeric_id) {
            return false;
        }
        self.raised_hands.insert(numeric_id);
        true
    }

    /// The participant lowers their own hand.
    pub fn lower_hand(&mut self, numeric_id: u32) -> bool {
        self.raised_hands.remove(&numeric_id)
    }

    /// The host dismisses someone's raised hand.
    pub fn dismiss_hand(&mut self, numeric_id: u32) -> bool {
        let dismissed = self.raised_hands.remove(&numeric_id);
        if dismissed {
            tracing::debug!(numeric_id, "raised hand dismissed by host");
        }
        dismissed
    }

    pub fn raised_hands(&self) -> Vec<u32> {
        self.raised_hands.iter().copied().collect()
    }

    pub fn is_hand_raised(&self, numeric_id: u32) -> bool {
        self.raised_hands.contains(&numeric_id)
    }

    pub fn get(&self, numeric_id: u32) -> Option<&PresenceEntry> {
        self.entries.get(&numeric_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PresenceEntry> {
        self.entries.values()
    }

    /// Participants with both audio and video on and a live connection.
    pub fn active_speakers(&self) -> Vec<&PresenceEntry> {
        self.entries
            .values()
            .filter(|entry| {
                entry.audio_enabled
                    && entry.video_enabled
                    && entry.connection == PresenceConnection::Connected
            })
            .collect()
    }

    pub fn by_role(&self, role: ParticipantRole) -> Vec<&PresenceEntry> {
        self.entries
            .values()
            .filter(|entry| entry.role == role)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn connected_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.connection == PresenceConnection::Connected)
            .count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.raised_hands.clear();
        self.pinned = None;
    }
}
