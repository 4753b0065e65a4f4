//! Session directory: persistent records of live class sessions and their
//! participants.
//!
//! The orchestrator only talks to the [`SessionDirectory`] trait, which can be
//! mocked using mockall in unit tests or backed by Postgres or HTTP.

use async_trait::async_trait;
use sqlx::postgres::PgTransaction;
use sqlx::PgPool;

use crate::error::SessionError;
use crate::models::participant::{ParticipantRole, SessionParticipant};
use crate::models::video_session::{NewVideoSession, VideoSession};
use crate::types::{ClassId, ParticipantId, UserId, VideoSessionId};

const SESSION_COLUMNS: &str = "id, class_id, teacher_id, channel_name, status, participant_count, \
     created_at, ended_at, duration_seconds";

const PARTICIPANT_COLUMNS: &str = "id, session_id, user_id, role, joined_at, left_at";

/// Narrow CRUD surface the session orchestrator needs.
///
/// Use `MockSessionDirectory` in unit tests to script behaviour.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Find a session by id, whatever its status.
    async fn get_session_by_id(
        &self,
        id: VideoSessionId,
    ) -> Result<Option<VideoSession>, SessionError>;

    /// Find the live session of a class, if any.
    async fn get_active_session_for_class(
        &self,
        class_id: ClassId,
    ) -> Result<Option<VideoSession>, SessionError>;

    /// Create a new live session.
    async fn create_video_session(
        &self,
        new_session: &NewVideoSession,
    ) -> Result<VideoSession, SessionError>;

    /// Mark a session ended, recording end time and duration.
    async fn end_video_session(&self, session_id: VideoSessionId) -> Result<(), SessionError>;

    /// Open a membership row for a student.
    async fn add_participant(
        &self,
        session_id: VideoSessionId,
        student_id: UserId,
    ) -> Result<(), SessionError>;

    /// Close the student's open membership row.
    async fn remove_participant(
        &self,
        session_id: VideoSessionId,
        student_id: UserId,
    ) -> Result<(), SessionError>;

    /// All membership rows of a session, open and closed.
    async fn list_participants(
        &self,
        session_id: VideoSessionId,
    ) -> Result<Vec<SessionParticipant>, SessionError>;
}

/// Postgres-backed session directory.
#[derive(Debug, Clone)]
pub struct PgSessionDirectory {
    pool: PgPool,
}

impl PgSessionDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn refresh_participant_count(
    tx: &mut PgTransaction<'_>,
    session_id: VideoSessionId,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE video_sessions
        SET participant_count = (
            SELECT COUNT(*)::INTEGER
            FROM session_participants
            WHERE session_id = $1 AND left_at IS NULL
        )
        WHERE id = $1 AND status <> 'ended'
        "#,
    )
    .bind(session_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl SessionDirectory for PgSessionDirectory {
    #[tracing::instrument(name = "directory_get_session", level = "debug", skip(self), err)]
    async fn get_session_by_id(
        &self,
        id: VideoSessionId,
    ) -> Result<Option<VideoSession>, SessionError> {
        let query = format!("SELECT {} FROM video_sessions WHERE id = $1", SESSION_COLUMNS);
        let session = sqlx::query_as::<_, VideoSession>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    #[tracing::instrument(name = "directory_active_session", level = "debug", skip(self), err)]
    async fn get_active_session_for_class(
        &self,
        class_id: ClassId,
    ) -> Result<Option<VideoSession>, SessionError> {
        let query = format!(
            "SELECT {} FROM video_sessions WHERE class_id = $1 AND status = 'live' \
             ORDER BY created_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let session = sqlx::query_as::<_, VideoSession>(&query)
            .bind(class_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    #[tracing::instrument(
        name = "directory_create_session",
        level = "debug",
        skip(self, new_session),
        fields(class_id = %new_session.class_id, channel = %new_session.channel_name),
        err
    )]
    async fn create_video_session(
        &self,
        new_session: &NewVideoSession,
    ) -> Result<VideoSession, SessionError> {
        let query = format!(
            "INSERT INTO video_sessions (id, class_id, teacher_id, channel_name, status) \
             VALUES ($1, $2, $3, $4, 'live') RETURNING {}",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, VideoSession>(&query)
            .bind(VideoSessionId::new())
            .bind(new_session.class_id)
            .bind(new_session.teacher_id)
            .bind(&new_session.channel_name)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    tracing::warn!(
                        class_id = %new_session.class_id,
                        "class already has a live session"
                    );
                    SessionError::AlreadyActive
                }
                other => other.into(),
            })
    }

    #[tracing::instrument(name = "directory_end_session", level = "debug", skip(self), err)]
    async fn end_video_session(&self, session_id: VideoSessionId) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE video_sessions
            SET status = 'ended',
                ended_at = NOW(),
                duration_seconds = GREATEST(0, EXTRACT(EPOCH FROM (NOW() - created_at)))::BIGINT
            WHERE id = $1 AND status <> 'ended'
            "#,
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Already ended or unknown; ended sessions stay untouched.
            tx.rollback().await?;
            tracing::debug!(%session_id, "end requested for a session that is not open");
            return Ok(());
        }

        sqlx::query(
            "UPDATE session_participants SET left_at = NOW() \
             WHERE session_id = $1 AND left_at IS NULL",
        )
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(name = "directory_add_participant", level = "debug", skip(self), err)]
    async fn add_participant(
        &self,
        session_id: VideoSessionId,
        student_id: UserId,
    ) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await?;
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM video_sessions WHERE id = $1 FOR UPDATE")
                .bind(session_id)
                .fetch_optional(&mut *tx)
                .await?;
        match status.as_deref() {
            Some("live") => {}
            Some(_) => {
                return Err(SessionError::Directory(format!(
                    "session {} is not live",
                    session_id
                )))
            }
            None => {
                return Err(SessionError::Directory(format!(
                    "session {} not found",
                    session_id
                )))
            }
        }

        sqlx::query(
            r#"
            INSERT INTO session_participants (id, session_id, user_id, role, joined_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (session_id, user_id) WHERE left_at IS NULL DO NOTHING
            "#,
        )
        .bind(ParticipantId::new())
        .bind(session_id)
        .bind(student_id)
        .bind(ParticipantRole::Subscriber)
        .execute(&mut *tx)
        .await?;

        refresh_participant_count(&mut tx, session_id).await?;
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(name = "directory_remove_participant", level = "debug", skip(self), err)]
    async fn remove_participant(
        &self,
        session_id: VideoSessionId,
        student_id: UserId,
    ) -> Result<(), SessionError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE session_participants SET left_at = NOW() \
             WHERE session_id = $1 AND user_id = $2 AND left_at IS NULL",
        )
        .bind(session_id)
        .bind(student_id)
        .execute(&mut *tx)
        .await?;

        refresh_participant_count(&mut tx, session_id).await?;
        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(name = "directory_list_participants", level = "debug", skip(self), err)]
    async fn list_participants(
        &self,
        session_id: VideoSessionId,
    ) -> Result<Vec<SessionParticipant>, SessionError> {
        let query = format!(
            "SELECT {} FROM session_participants WHERE session_id = $1 \
             ORDER BY joined_at, id",
            PARTICIPANT_COLUMNS
        );
        let rows = sqlx::query_as::<_, SessionParticipant>(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
