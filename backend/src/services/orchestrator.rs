//! Join/leave lifecycle of one participant in a live class.
//!
//! [`SessionOrchestrator`] ties the media client, the token issuer and the
//! session directory together:
//!
//! ```text
//! idle ──join──▶ joining ──▶ joined ──leave──▶ leaving ──▶ idle
//!                   │
//!                   └──▶ failed (behaves as idle)
//! ```
//!
//! Within one attempt the credential is fetched before the channel is joined,
//! the channel is joined before the directory is written, and the refresh
//! timer and event listener start last. Every failure path unwinds what the
//! attempt had already set up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::SessionPolicy;
use crate::error::SessionError;
use crate::models::credential::TokenRequest;
use crate::models::participant::ParticipantRole;
use crate::models::user::AuthUser;
use crate::models::video_session::{channel_name_for, NewVideoSession, VideoSession};
use crate::repositories::SessionDirectory;
use crate::services::media_client::{
    ConnectionState, MediaEvent, MediaKind, RealtimeMediaClient,
};
use crate::services::network_quality::{NetworkQualityMonitor, NetworkSample, QualityTier};
use crate::services::presence::{PresenceConnection, PresenceRegistry, PresenceUpdate};
use crate::services::token_issuer::TokenIssuer;
use crate::services::token_refresh::{CredentialRefresher, RefreshHandle, RefreshTarget};
use crate::types::{ClassId, UserId, VideoSessionId};

/// Default element id the local camera preview is rendered into.
pub const DEFAULT_VIDEO_SURFACE: &str = "local-video";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Joining,
    Joined,
    Leaving,
    Failed,
}

/// Who is joining which class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassroomIdentity {
    pub class_id: ClassId,
    pub user_id: UserId,
    pub display_name: String,
    pub role: ParticipantRole,
    pub video_surface_id: String,
}

impl ClassroomIdentity {
    pub fn for_user(user: &AuthUser, class_id: ClassId) -> Self {
        Self {
            class_id,
            user_id: user.id,
            display_name: user.display_name.clone(),
            role: user.role.participant_role(),
            video_surface_id: DEFAULT_VIDEO_SURFACE.to_string(),
        }
    }

    pub fn numeric_id(&self) -> u32 {
        self.user_id.numeric_id()
    }
}

/// Bounded counter of whole-join attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinAttempts {
    max: u32,
    used: u32,
}

impl JoinAttempts {
    pub fn new(max: u32) -> Self {
        Self {
            max: max.max(1),
            used: 0,
        }
    }

    /// Claim the next attempt. Returns false once the ceiling is reached.
    pub fn try_begin(&mut self) -> bool {
        if self.exhausted() {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn exhausted(&self) -> bool {
        self.used >= self.max
    }
}

/// Where a join attempt is headed before anything is written.
enum JoinTarget {
    Existing(VideoSession),
    Planned { channel_name: String },
}

impl JoinTarget {
    fn channel_name(&self) -> &str {
        match self {
            JoinTarget::Existing(session) => &session.channel_name,
            JoinTarget::Planned { channel_name } => channel_name,
        }
    }
}

struct ActiveSession {
    session: VideoSession,
    refresh: RefreshHandle,
    listener: JoinHandle<()>,
}

pub struct SessionOrchestrator {
    identity: ClassroomIdentity,
    media: Arc<dyn RealtimeMediaClient>,
    issuer: Arc<dyn TokenIssuer>,
    directory: Arc<dyn SessionDirectory>,
    policy: SessionPolicy,
    state: watch::Sender<SessionState>,
    active: Mutex<Option<ActiveSession>>,
    presence: Arc<Mutex<PresenceRegistry>>,
    network: Mutex<NetworkQualityMonitor>,
    connection: Arc<watch::Sender<ConnectionState>>,
    mounted: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionOrchestrator {
    pub fn new(
        identity: ClassroomIdentity,
        media: Arc<dyn RealtimeMediaClient>,
        issuer: Arc<dyn TokenIssuer>,
        directory: Arc<dyn SessionDirectory>,
        policy: SessionPolicy,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            identity,
            media,
            issuer,
            directory,
            policy,
            state,
            active: Mutex::new(None),
            presence: Arc::new(Mutex::new(PresenceRegistry::new())),
            network: Mutex::new(NetworkQualityMonitor::default()),
            connection: Arc::new(watch::channel(ConnectionState::Disconnected).0),
            mounted: AtomicBool::new(true),
        }
    }

    pub fn identity(&self) -> &ClassroomIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn session_id(&self) -> Option<VideoSessionId> {
        lock(&self.active).as_ref().map(|active| active.session.id)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.borrow()
    }

    /// Provider connection changes, e.g. to surface a dropped link while the
    /// session is still joined.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Atomically move from one of `from` to `to`. Returns the state that was
    /// found when the move was refused.
    fn transition(&self, from: &[SessionState], to: SessionState) -> Result<(), SessionState> {
        let mut refused = None;
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                refused = Some(*state);
                false
            }
        });
        match refused {
            None => Ok(()),
            Some(found) => Err(found),
        }
    }

    /// Join the class and return the resolved session id.
    ///
    /// With `existing_session_id` the given session is joined. Otherwise a
    /// publisher reuses the class's live session or creates one, and a
    /// subscriber joins the live session or fails with
    /// [`SessionError::NoActiveSession`].
    #[tracing::instrument(
        name = "join_session",
        skip(self),
        fields(
            class_id = %self.identity.class_id,
            role = self.identity.role.as_str()
        )
    )]
    pub async fn join_session(
        &self,
        existing_session_id: Option<VideoSessionId>,
    ) -> Result<VideoSessionId, SessionError> {
        if !self.is_mounted() {
            return Err(SessionError::TornDown);
        }
        self.transition(&[SessionState::Idle, SessionState::Failed], SessionState::Joining)
            .map_err(|_| SessionError::AlreadyActive)?;

        let mut attempts = JoinAttempts::new(self.policy.join_max_attempts);
        let mut last_error = None;
        while attempts.try_begin() {
            match self.attempt_join(existing_session_id).await {
                Ok(active) => return self.finish_join(active).await,
                Err(err) => {
                    let retry = err.is_retryable() && !attempts.exhausted() && self.is_mounted();
                    tracing::warn!(
                        attempt = attempts.used(),
                        max_attempts = attempts.max(),
                        will_retry = retry,
                        error = %err,
                        "join attempt failed"
                    );
                    last_error = Some(err);
                    if !retry {
                        break;
                    }
                }
            }
        }

        self.state.send_replace(SessionState::Failed);
        Err(last_error.unwrap_or(SessionError::TornDown))
    }

    async fn finish_join(&self, active: ActiveSession) -> Result<VideoSessionId, SessionError> {
        let session_id = active.session.id;
        *lock(&self.active) = Some(active);
        self.state.send_replace(SessionState::Joined);

        // Teardown may have run while the attempt was in flight. Whoever wins
        // the Joined -> Leaving transition releases the session.
        if !self.is_mounted() {
            if self
                .transition(&[SessionState::Joined], SessionState::Leaving)
                .is_ok()
            {
                tracing::info!(session_id = %session_id, "classroom closed during join, leaving");
                self.release_active().await;
                self.reset_local();
                self.state.send_replace(SessionState::Idle);
            }
            return Err(SessionError::TornDown);
        }

        tracing::info!(session_id = %session_id, "joined live class");
        Ok(session_id)
    }

    async fn attempt_join(
        &self,
        existing_session_id: Option<VideoSessionId>,
    ) -> Result<ActiveSession, SessionError> {
        let target = self.resolve_target(existing_session_id).await?;
        let numeric_id = self.identity.numeric_id();
        let channel_name = target.channel_name().to_string();

        self.media.initialize().await?;

        let request = TokenRequest {
            channel_name: channel_name.clone(),
            numeric_id,
            role: self.identity.role,
        };
        let credential = self.issuer.generate_token(&request).await?;

        // Subscribe before joining so no event emitted during the join is lost.
        let events = self.media.subscribe();
        self.media
            .join_channel(&channel_name, &credential, numeric_id)
            .await?;

        let session = match self.record_membership(target).await {
            Ok(session) => session,
            Err(err) => {
                self.leave_channel_quietly().await;
                self.issuer.forget_credential(&channel_name, numeric_id);
                return Err(err);
            }
        };

        let host_numeric_id = session.teacher_id.numeric_id();
        self.seed_presence(host_numeric_id).await;

        let refresh = CredentialRefresher::spawn(
            self.issuer.clone(),
            self.media.clone(),
            RefreshTarget {
                channel_name: channel_name.clone(),
                numeric_id,
                role: self.identity.role,
            },
            self.policy.refresh_interval,
        );
        let listener = self.spawn_listener(events, host_numeric_id);

        if self.identity.role == ParticipantRole::Publisher {
            self.publish_local_media().await;
        }

        Ok(ActiveSession {
            session,
            refresh,
            listener,
        })
    }

    /// Read-only lookup of the session to join; nothing is written yet.
    async fn resolve_target(
        &self,
        existing_session_id: Option<VideoSessionId>,
    ) -> Result<JoinTarget, SessionError> {
        let class_id = self.identity.class_id;
        if let Some(id) = existing_session_id {
            return match self.directory.get_session_by_id(id).await? {
                Some(session) if session.is_live() && session.class_id == class_id => {
                    Ok(JoinTarget::Existing(session))
                }
                _ => Err(SessionError::NoActiveSession { class_id }),
            };
        }

        match (
            self.identity.role,
            self.directory.get_active_session_for_class(class_id).await?,
        ) {
            (_, Some(session)) => Ok(JoinTarget::Existing(session)),
            (ParticipantRole::Publisher, None) => Ok(JoinTarget::Planned {
                channel_name: channel_name_for(class_id),
            }),
            (ParticipantRole::Subscriber, None) => Err(SessionError::NoActiveSession { class_id }),
        }
    }

    async fn record_membership(&self, target: JoinTarget) -> Result<VideoSession, SessionError> {
        match (target, self.identity.role) {
            (JoinTarget::Planned { channel_name }, _) => {
                let new_session = NewVideoSession {
                    class_id: self.identity.class_id,
                    teacher_id: self.identity.user_id,
                    channel_name,
                };
                self.directory.create_video_session(&new_session).await
            }
            (JoinTarget::Existing(session), ParticipantRole::Subscriber) => {
                self.directory
                    .add_participant(session.id, self.identity.user_id)
                    .await?;
                Ok(session)
            }
            (JoinTarget::Existing(session), ParticipantRole::Publisher) => Ok(session),
        }
    }

    async fn seed_presence(&self, host_numeric_id: u32) {
        let now = Utc::now();
        let remote = match self.media.get_remote_users().await {
            Ok(users) => users,
            Err(err) => {
                tracing::warn!(error = %err, "could not list remote participants");
                Vec::new()
            }
        };

        let mut presence = lock(&self.presence);
        presence.add_or_update(
            PresenceUpdate::new(self.identity.numeric_id())
                .display_name(self.identity.display_name.clone())
                .role(self.identity.role)
                .audio(false)
                .video(false)
                .connection(PresenceConnection::Connected),
            now,
        );
        for user in remote {
            presence.add_or_update(
                PresenceUpdate::new(user.numeric_id)
                    .role(role_for(user.numeric_id, host_numeric_id))
                    .audio(user.has_audio)
                    .video(user.has_video)
                    .connection(PresenceConnection::Connected),
                now,
            );
        }
        self.connection.send_replace(ConnectionState::Connected);
    }

    async fn publish_local_media(&self) {
        let local = self.identity.numeric_id();
        match self.media.publish_local_audio().await {
            Ok(()) => {
                lock(&self.presence).add_or_update(PresenceUpdate::new(local).audio(true), Utc::now());
            }
            Err(err) => tracing::warn!(error = %err, "publishing local audio failed"),
        }
        match self
            .media
            .publish_local_video(&self.identity.video_surface_id)
            .await
        {
            Ok(()) => {
                lock(&self.presence).add_or_update(PresenceUpdate::new(local).video(true), Utc::now());
            }
            Err(err) => tracing::warn!(error = %err, "publishing local video failed"),
        }
    }

    fn spawn_listener(
        &self,
        mut events: broadcast::Receiver<MediaEvent>,
        host_numeric_id: u32,
    ) -> JoinHandle<()> {
        let presence = self.presence.clone();
        let connection = self.connection.clone();
        let state = self.state.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(MediaEvent::ConnectionStateChange { current }) => {
                        connection.send_replace(current);
                        if current == ConnectionState::Disconnected
                            && *state.borrow() == SessionState::Joined
                        {
                            tracing::error!("media provider closed the connection to the live class");
                        }
                    }
                    Ok(event) => {
                        tracing::debug!(event = event.name(), "media event");
                        apply_media_event(&mut lock(&presence), &event, host_numeric_id);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "media event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Leave the class. Directory failures are logged; local state always
    /// returns to idle.
    #[tracing::instrument(
        name = "leave_session",
        skip(self),
        fields(class_id = %self.identity.class_id)
    )]
    pub async fn leave_session(&self) -> Result<(), SessionError> {
        match self.transition(&[SessionState::Joined], SessionState::Leaving) {
            Ok(()) => {}
            Err(SessionState::Idle) => return Ok(()),
            Err(SessionState::Failed) => {
                self.state.send_replace(SessionState::Idle);
                return Ok(());
            }
            Err(_) => return Err(SessionError::AlreadyActive),
        }

        self.release_active().await;
        self.reset_local();
        self.state.send_replace(SessionState::Idle);
        tracing::info!("left live class");
        Ok(())
    }

    /// Unmount: stop the timer and listener and leave without raising. A join
    /// still in flight leaves as soon as it settles.
    pub async fn teardown(&self) {
        if !self.mounted.swap(false, Ordering::SeqCst) {
            return;
        }
        if self
            .transition(&[SessionState::Joined], SessionState::Leaving)
            .is_ok()
        {
            self.release_active().await;
            self.reset_local();
            self.state.send_replace(SessionState::Idle);
        }
    }

    async fn release_active(&self) {
        let active = lock(&self.active).take();
        let Some(active) = active else {
            return;
        };
        active.refresh.cancel();
        active.listener.abort();

        self.leave_channel_quietly().await;

        self.issuer
            .forget_credential(&active.session.channel_name, self.identity.numeric_id());

        // Only the host ends the class. A co-teacher who joined someone else's
        // session never wrote a membership row, so there is nothing to close.
        let session_id = active.session.id;
        let is_host = active.session.teacher_id == self.identity.user_id;
        let bookkeeping = match self.identity.role {
            ParticipantRole::Publisher if is_host => {
                self.directory.end_video_session(session_id).await
            }
            ParticipantRole::Publisher => Ok(()),
            ParticipantRole::Subscriber => {
                self.directory
                    .remove_participant(session_id, self.identity.user_id)
                    .await
            }
        };
        if let Err(err) = bookkeeping {
            tracing::error!(
                session_id = %session_id,
                error = %err,
                "session bookkeeping failed on leave"
            );
        }
    }

    async fn leave_channel_quietly(&self) {
        if let Err(err) = self.media.leave_channel().await {
            tracing::warn!(error = %err, "leaving media channel failed");
        }
    }

    fn reset_local(&self) {
        lock(&self.presence).clear();
        lock(&self.network).reset();
        self.connection.send_replace(ConnectionState::Disconnected);
    }

    fn ensure_joined(&self) -> Result<(), SessionError> {
        if self.state() == SessionState::Joined {
            Ok(())
        } else {
            Err(SessionError::NoActiveSession {
                class_id: self.identity.class_id,
            })
        }
    }

    /// Mute or unmute the local microphone. A failure is returned to the
    /// caller but leaves the session joined.
    pub async fn toggle_audio(&self, enabled: bool) -> Result<(), SessionError> {
        self.ensure_joined()?;
        let result = if enabled {
            self.media.unmute_local_audio().await
        } else {
            self.media.mute_local_audio().await
        };
        if let Err(err) = result {
            tracing::warn!(enabled, error = %err, "toggling local audio failed");
            return Err(err);
        }
        lock(&self.presence).add_or_update(
            PresenceUpdate::new(self.identity.numeric_id()).audio(enabled),
            Utc::now(),
        );
        Ok(())
    }

    /// Enable or disable the local camera. Same failure policy as
    /// [`SessionOrchestrator::toggle_audio`].
    pub async fn toggle_video(&self, enabled: bool) -> Result<(), SessionError> {
        self.ensure_joined()?;
        let result = if enabled {
            self.media.enable_local_video().await
        } else {
            self.media.disable_local_video().await
        };
        if let Err(err) = result {
            tracing::warn!(enabled, error = %err, "toggling local video failed");
            return Err(err);
        }
        lock(&self.presence).add_or_update(
            PresenceUpdate::new(self.identity.numeric_id()).video(enabled),
            Utc::now(),
        );
        Ok(())
    }

    pub fn record_network_sample(&self, sample: NetworkSample) -> QualityTier {
        lock(&self.network).record(sample)
    }

    pub fn network_quality(&self) -> QualityTier {
        lock(&self.network).tier()
    }

    pub fn latest_network_sample(&self) -> Option<NetworkSample> {
        lock(&self.network).latest().cloned()
    }

    /// Snapshot of the current presence.
    pub fn presence(&self) -> PresenceRegistry {
        lock(&self.presence).clone()
    }

    /// Run `f` against the live presence registry, e.g. to pin a participant
    /// or dismiss a raised hand.
    pub fn with_presence<R>(&self, f: impl FnOnce(&mut PresenceRegistry) -> R) -> R {
        f(&mut lock(&self.presence))
    }
}

fn role_for(numeric_id: u32, host_numeric_id: u32) -> ParticipantRole {
    if numeric_id == host_numeric_id {
        ParticipantRole::Publisher
    } else {
        ParticipantRole::Subscriber
    }
}

/// Fold one participant event into the registry.
///
/// Events may arrive in any order. An unpublish for someone who already left
/// is ignored rather than resurrecting the entry.
pub fn apply_media_event(registry: &mut PresenceRegistry, event: &MediaEvent, host_numeric_id: u32) {
    let now = Utc::now();
    match *event {
        MediaEvent::UserJoined { uid } => {
            registry.add_or_update(
                PresenceUpdate::new(uid)
                    .role(role_for(uid, host_numeric_id))
                    .connection(PresenceConnection::Connected),
                now,
            );
        }
        MediaEvent::UserLeft { uid } => {
            registry.remove(uid);
        }
        MediaEvent::UserPublished { uid, kind } => {
            let update = PresenceUpdate::new(uid)
                .role(role_for(uid, host_numeric_id))
                .connection(PresenceConnection::Connected);
            let update = match kind {
                MediaKind::Audio => update.audio(true),
                MediaKind::Video => update.video(true),
            };
            registry.add_or_update(update, now);
        }
        MediaEvent::UserUnpublished { uid, kind } => {
            if registry.get(uid).is_none() {
                return;
            }
            let update = match kind {
                MediaKind::Audio => PresenceUpdate::new(uid).audio(false),
                MediaKind::Video => PresenceUpdate::new(uid).video(false),
            };
            registry.add_or_update(update, now);
        }
        MediaEvent::ConnectionStateChange { .. } => {}
    }
}
