#![allow(dead_code)]
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use classroom_backend::{
    config::{Config, SessionPolicy},
    error::SessionError,
    models::{
        credential::{Credential, TokenRequest},
        participant::{ParticipantRole, SessionParticipant},
        user::{AuthUser, UserRole},
        video_session::{NewVideoSession, SessionStatus, VideoSession},
    },
    repositories::SessionDirectory,
    services::{
        media_client::{MediaEvent, RealtimeMediaClient, RemoteUser},
        orchestrator::{ClassroomIdentity, SessionOrchestrator},
        token_issuer::TokenIssuer,
    },
    types::{ClassId, ParticipantId, UserId, VideoSessionId},
    utils::jwt::create_access_token,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{
    collections::HashMap,
    env,
    sync::{
        atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::{broadcast, Notify};

pub const JWT_SECRET: &str = "a_secure_token_that_is_long_enough_123";

pub fn test_config() -> Config {
    Config {
        database_url: env::var("TEST_DATABASE_URL").unwrap_or_default(),
        jwt_secret: JWT_SECRET.into(),
        media_app_id: "test-app".into(),
        media_app_certificate: "0123456789abcdef0123".into(),
        media_token_ttl_seconds: 600,
        token_refresh_interval_seconds: 30,
        token_refresh_lead_seconds: 60,
        join_max_attempts: 2,
        cors_allow_origins: vec!["http://localhost:8000".into()],
        bind_addr: "127.0.0.1:0".parse().expect("bind addr"),
    }
}

/// Pool for the Postgres-backed tests, or `None` when `TEST_DATABASE_URL` is
/// not set.
pub async fn test_pool() -> Option<PgPool> {
    let url = env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}

pub fn auth_user(role: UserRole) -> AuthUser {
    AuthUser {
        id: UserId::new(),
        display_name: match role {
            UserRole::Student => "Student".into(),
            UserRole::Teacher => "Teacher".into(),
            UserRole::Admin => "Admin".into(),
        },
        role,
    }
}

pub fn bearer_for(user: &AuthUser) -> String {
    let token = create_access_token(
        user.id.to_string(),
        user.display_name.clone(),
        user.role,
        JWT_SECRET,
        1,
    )
    .expect("create access token");
    format!("Bearer {}", token)
}

// ---------------------------------------------------------------------------
// Media client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    Initialize,
    Join { channel: String, numeric_id: u32 },
    Leave,
    PublishAudio,
    PublishVideo(String),
    MuteAudio,
    UnmuteAudio,
    DisableVideo,
    EnableVideo,
    GetRemoteUsers,
    RenewToken(String),
}

pub struct FakeMediaClient {
    events: broadcast::Sender<MediaEvent>,
    calls: Mutex<Vec<MediaCall>>,
    remote_users: Mutex<Vec<RemoteUser>>,
    failing_joins: AtomicU32,
    fail_publish: AtomicBool,
    fail_leave: AtomicBool,
    join_gate: Mutex<Option<Arc<Notify>>>,
    join_started: Notify,
}

impl Default for FakeMediaClient {
    fn default() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            events,
            calls: Mutex::new(Vec::new()),
            remote_users: Mutex::new(Vec::new()),
            failing_joins: AtomicU32::new(0),
            fail_publish: AtomicBool::new(false),
            fail_leave: AtomicBool::new(false),
            join_gate: Mutex::new(None),
            join_started: Notify::new(),
        }
    }
}

impl FakeMediaClient {
    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().expect("calls").clone()
    }

    pub fn count(&self, call: &MediaCall) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn join_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MediaCall::Join { .. }))
            .count()
    }

    pub fn renewed_tokens(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MediaCall::RenewToken(token) => Some(token),
                _ => None,
            })
            .collect()
    }

    pub fn set_remote_users(&self, users: Vec<RemoteUser>) {
        *self.remote_users.lock().expect("remote users") = users;
    }

    pub fn fail_next_joins(&self, count: u32) {
        self.failing_joins.store(count, Ordering::SeqCst);
    }

    pub fn fail_publish(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn fail_leave(&self) {
        self.fail_leave.store(true, Ordering::SeqCst);
    }

    /// Make `join_channel` wait until the returned gate is notified.
    pub fn hold_joins(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.join_gate.lock().expect("join gate") = Some(gate.clone());
        gate
    }

    /// Resolves once a held `join_channel` call has started.
    pub async fn join_started(&self) {
        self.join_started.notified().await;
    }

    pub fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, call: MediaCall) {
        self.calls.lock().expect("calls").push(call);
    }
}

#[async_trait]
impl RealtimeMediaClient for FakeMediaClient {
    async fn initialize(&self) -> Result<(), SessionError> {
        self.record(MediaCall::Initialize);
        Ok(())
    }

    async fn join_channel(
        &self,
        channel_name: &str,
        _credential: &Credential,
        numeric_id: u32,
    ) -> Result<(), SessionError> {
        self.record(MediaCall::Join {
            channel: channel_name.to_string(),
            numeric_id,
        });
        let gate = self.join_gate.lock().expect("join gate").clone();
        if let Some(gate) = gate {
            self.join_started.notify_one();
            gate.notified().await;
        }
        let remaining = self.failing_joins.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_joins.store(remaining - 1, Ordering::SeqCst);
            return Err(SessionError::Connection("network unreachable".into()));
        }
        Ok(())
    }

    async fn leave_channel(&self) -> Result<(), SessionError> {
        self.record(MediaCall::Leave);
        if self.fail_leave.load(Ordering::SeqCst) {
            return Err(SessionError::Connection("already disconnected".into()));
        }
        Ok(())
    }

    async fn publish_local_video(&self, target_surface_id: &str) -> Result<(), SessionError> {
        self.record(MediaCall::PublishVideo(target_surface_id.to_string()));
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SessionError::Connection("camera unavailable".into()));
        }
        Ok(())
    }

    async fn publish_local_audio(&self) -> Result<(), SessionError> {
        self.record(MediaCall::PublishAudio);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SessionError::Connection("microphone unavailable".into()));
        }
        Ok(())
    }

    async fn mute_local_audio(&self) -> Result<(), SessionError> {
        self.record(MediaCall::MuteAudio);
        Ok(())
    }

    async fn unmute_local_audio(&self) -> Result<(), SessionError> {
        self.record(MediaCall::UnmuteAudio);
        Ok(())
    }

    async fn disable_local_video(&self) -> Result<(), SessionError> {
        self.record(MediaCall::DisableVideo);
        Ok(())
    }

    async fn enable_local_video(&self) -> Result<(), SessionError> {
        self.record(MediaCall::EnableVideo);
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(SessionError::Connection("camera unavailable".into()));
        }
        Ok(())
    }

    async fn get_remote_users(&self) -> Result<Vec<RemoteUser>, SessionError> {
        self.record(MediaCall::GetRemoteUsers);
        Ok(self.remote_users.lock().expect("remote users").clone())
    }

    async fn renew_token(&self, credential: &Credential) -> Result<(), SessionError> {
        self.record(MediaCall::RenewToken(credential.token.clone()));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Token issuer
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeTokenIssuer {
    issued: AtomicUsize,
    expiry_checks: AtomicUsize,
    refreshes: AtomicUsize,
    forgotten: AtomicUsize,
    deny: AtomicBool,
    expiring: AtomicBool,
    fail_refresh: AtomicBool,
}

impl FakeTokenIssuer {
    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn expiry_checks(&self) -> usize {
        self.expiry_checks.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn forgotten(&self) -> usize {
        self.forgotten.load(Ordering::SeqCst)
    }

    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn set_expiring(&self, expiring: bool) {
        self.expiring.store(expiring, Ordering::SeqCst);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    fn credential(&self, request: &TokenRequest, sequence: usize) -> Credential {
        Credential {
            token: format!("token-{}", sequence),
            channel_name: request.channel_name.clone(),
            numeric_id: request.numeric_id,
            role: request.role,
            expires_at: Utc::now() + ChronoDuration::minutes(10),
        }
    }
}

#[async_trait]
impl TokenIssuer for FakeTokenIssuer {
    async fn generate_token(&self, request: &TokenRequest) -> Result<Credential, SessionError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SessionError::Auth("permission denied".into()));
        }
        let sequence = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(self.credential(request, sequence))
    }

    async fn is_token_expiring_soon(
        &self,
        _channel_name: &str,
        _numeric_id: u32,
    ) -> Result<bool, SessionError> {
        self.expiry_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.expiring.load(Ordering::SeqCst))
    }

    async fn refresh_token(
        &self,
        channel_name: &str,
        numeric_id: u32,
        role: ParticipantRole,
    ) -> Result<Credential, SessionError> {
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(SessionError::Connection("issuer unavailable".into()));
        }
        let sequence = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let request = TokenRequest {
            channel_name: channel_name.to_string(),
            numeric_id,
            role,
        };
        Ok(Credential {
            token: format!("refreshed-{}", sequence),
            ..self.credential(&request, sequence)
        })
    }

    fn forget_credential(&self, _channel_name: &str, _numeric_id: u32) {
        self.forgotten.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Session directory
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryDirectory {
    sessions: Mutex<HashMap<VideoSessionId, VideoSession>>,
    participants: Mutex<Vec<SessionParticipant>>,
    fail_writes: AtomicBool,
    creates: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn sessions(&self) -> Vec<VideoSession> {
        self.sessions
            .lock()
            .expect("sessions")
            .values()
            .cloned()
            .collect()
    }

    pub fn participants(&self) -> Vec<SessionParticipant> {
        self.participants.lock().expect("participants").clone()
    }

    /// Seed a live session hosted by `teacher_id`.
    pub fn insert_live(&self, class_id: ClassId, teacher_id: UserId) -> VideoSession {
        let session = VideoSession {
            id: VideoSessionId::new(),
            class_id,
            teacher_id,
            channel_name: format!("class-{}", class_id.as_uuid().simple()),
            status: SessionStatus::Live,
            participant_count: 0,
            created_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
        };
        self.sessions
            .lock()
            .expect("sessions")
            .insert(session.id, session.clone());
        session
    }

    fn check_writable(&self) -> Result<(), SessionError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(SessionError::Directory("directory is read-only".into()))
        } else {
            Ok(())
        }
    }

    fn recount(&self, session_id: VideoSessionId) {
        let open = self
            .participants()
            .iter()
            .filter(|p| p.session_id == session_id && p.left_at.is_none())
            .count() as i32;
        if let Some(session) = self.sessions.lock().expect("sessions").get_mut(&session_id) {
            session.participant_count = open;
        }
    }
}

#[async_trait]
impl SessionDirectory for InMemoryDirectory {
    async fn get_session_by_id(
        &self,
        id: VideoSessionId,
    ) -> Result<Option<VideoSession>, SessionError> {
        Ok(self.sessions.lock().expect("sessions").get(&id).cloned())
    }

    async fn get_active_session_for_class(
        &self,
        class_id: ClassId,
    ) -> Result<Option<VideoSession>, SessionError> {
        Ok(self
            .sessions
            .lock()
            .expect("sessions")
            .values()
            .find(|s| s.class_id == class_id && s.is_live())
            .cloned())
    }

    async fn create_video_session(
        &self,
        new_session: &NewVideoSession,
    ) -> Result<VideoSession, SessionError> {
        self.check_writable()?;
        let mut sessions = self.sessions.lock().expect("sessions");
        if sessions
            .values()
            .any(|s| s.class_id == new_session.class_id && s.is_live())
        {
            return Err(SessionError::AlreadyActive);
        }
        let session = VideoSession {
            id: VideoSessionId::new(),
            class_id: new_session.class_id,
            teacher_id: new_session.teacher_id,
            channel_name: new_session.channel_name.clone(),
            status: SessionStatus::Live,
            participant_count: 0,
            created_at: Utc::now(),
            ended_at: None,
            duration_seconds: None,
        };
        sessions.insert(session.id, session.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(session)
    }

    async fn end_video_session(&self, session_id: VideoSessionId) -> Result<(), SessionError> {
        self.check_writable()?;
        let now = Utc::now();
        {
            let mut sessions = self.sessions.lock().expect("sessions");
            let Some(session) = sessions.get_mut(&session_id) else {
                return Ok(());
            };
            if session.status == SessionStatus::Ended {
                return Ok(());
            }
            session.status = SessionStatus::Ended;
            session.ended_at = Some(now);
            session.duration_seconds = Some((now - session.created_at).num_seconds().max(0));
        }
        for participant in self.participants.lock().expect("participants").iter_mut() {
            if participant.session_id == session_id && participant.left_at.is_none() {
                participant.left_at = Some(now);
            }
        }
        self.recount(session_id);
        Ok(())
    }

    async fn add_participant(
        &self,
        session_id: VideoSessionId,
        student_id: UserId,
    ) -> Result<(), SessionError> {
        self.check_writable()?;
        let live = self
            .sessions
            .lock()
            .expect("sessions")
            .get(&session_id)
            .map(|s| s.is_live())
            .unwrap_or(false);
        if !live {
            return Err(SessionError::Directory("session is not live".into()));
        }
        {
            let mut participants = self.participants.lock().expect("participants");
            let already_open = participants.iter().any(|p| {
                p.session_id == session_id && p.user_id == student_id && p.left_at.is_none()
            });
            if !already_open {
                participants.push(SessionParticipant {
                    id: ParticipantId::new(),
                    session_id,
                    user_id: student_id,
                    role: ParticipantRole::Subscriber,
                    joined_at: Utc::now(),
                    left_at: None,
                });
            }
        }
        self.recount(session_id);
        Ok(())
    }

    async fn remove_participant(
        &self,
        session_id: VideoSessionId,
        student_id: UserId,
    ) -> Result<(), SessionError> {
        self.check_writable()?;
        let now = Utc::now();
        for participant in self.participants.lock().expect("participants").iter_mut() {
            if participant.session_id == session_id
                && participant.user_id == student_id
                && participant.left_at.is_none()
            {
                participant.left_at = Some(now);
            }
        }
        self.recount(session_id);
        Ok(())
    }

    async fn list_participants(
        &self,
        session_id: VideoSessionId,
    ) -> Result<Vec<SessionParticipant>, SessionError> {
        Ok(self
            .participants()
            .into_iter()
            .filter(|p| p.session_id == session_id)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Orchestrator harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub media: Arc<FakeMediaClient>,
    pub issuer: Arc<FakeTokenIssuer>,
    pub directory: Arc<InMemoryDirectory>,
    pub class_id: ClassId,
}

impl Default for Harness {
    fn default() -> Self {
        Self {
            media: Arc::new(FakeMediaClient::default()),
            issuer: Arc::new(FakeTokenIssuer::default()),
            directory: Arc::new(InMemoryDirectory::default()),
            class_id: ClassId::new(),
        }
    }
}

impl Harness {
    pub fn identity(&self, role: ParticipantRole) -> ClassroomIdentity {
        let user_role = match role {
            ParticipantRole::Publisher => UserRole::Teacher,
            ParticipantRole::Subscriber => UserRole::Student,
        };
        ClassroomIdentity::for_user(&auth_user(user_role), self.class_id)
    }

    pub fn orchestrator(&self, identity: ClassroomIdentity) -> SessionOrchestrator {
        self.orchestrator_with(identity, SessionPolicy::default())
    }

    pub fn orchestrator_with(
        &self,
        identity: ClassroomIdentity,
        policy: SessionPolicy,
    ) -> SessionOrchestrator {
        SessionOrchestrator::new(
            identity,
            self.media.clone(),
            self.issuer.clone(),
            self.directory.clone(),
            policy,
        )
    }

    pub fn teacher(&self) -> SessionOrchestrator {
        self.orchestrator(self.identity(ParticipantRole::Publisher))
    }

    pub fn student(&self) -> SessionOrchestrator {
        self.orchestrator(self.identity(ParticipantRole::Subscriber))
    }
}

/// Let spawned tasks (event listener, refresh timer) run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
