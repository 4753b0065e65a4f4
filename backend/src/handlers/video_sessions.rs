use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        participant::SessionParticipant,
        user::{AuthUser, UserRole},
        video_session::{NewVideoSession, VideoSession},
    },
    state::AppState,
    types::{ClassId, UserId, VideoSessionId},
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateVideoSessionRequest {
    pub class_id: ClassId,
    #[validate(length(min = 1, max = 64))]
    pub channel_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddParticipantRequest {
    pub student_id: UserId,
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<VideoSessionId>,
) -> Result<Json<VideoSession>, AppError> {
    let session = state
        .directory
        .get_session_by_id(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Video session not found".into()))?;
    Ok(Json(session))
}

pub async fn get_active_session(
    State(state): State<AppState>,
    Path(class_id): Path<ClassId>,
) -> Result<Json<VideoSession>, AppError> {
    let session = state
        .directory
        .get_active_session_for_class(class_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Class has no live session".into()))?;
    Ok(Json(session))
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<CreateVideoSessionRequest>,
) -> Result<(StatusCode, Json<VideoSession>), AppError> {
    if !user.role.can_host() {
        return Err(AppError::Forbidden(
            "Only teachers can start a live class".into(),
        ));
    }
    payload.validate()?;

    if state
        .directory
        .get_active_session_for_class(payload.class_id)
        .await?
        .is_some()
    {
        return Err(AppError::Conflict(
            "Class already has a live session".into(),
        ));
    }

    let new_session = NewVideoSession {
        class_id: payload.class_id,
        teacher_id: user.id,
        channel_name: payload.channel_name,
    };
    let session = state.directory.create_video_session(&new_session).await?;
    tracing::info!(
        session_id = %session.id,
        class_id = %session.class_id,
        teacher_id = %user.id,
        "video session started"
    );
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn end_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<VideoSessionId>,
) -> Result<StatusCode, AppError> {
    let session = state
        .directory
        .get_session_by_id(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Video session not found".into()))?;
    if session.teacher_id != user.id && user.role != UserRole::Admin {
        return Err(AppError::Forbidden(
            "Only the host can end this session".into(),
        ));
    }

    state.directory.end_video_session(session_id).await?;
    tracing::info!(session_id = %session_id, "video session ended");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_participants(
    State(state): State<AppState>,
    Path(session_id): Path<VideoSessionId>,
) -> Result<Json<Vec<SessionParticipant>>, AppError> {
    let participants = state.directory.list_participants(session_id).await?;
    Ok(Json(participants))
}

pub async fn add_participant(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(session_id): Path<VideoSessionId>,
    Json(payload): Json<AddParticipantRequest>,
) -> Result<StatusCode, AppError> {
    ensure_self_or_host(&user, payload.student_id)?;
    state
        .directory
        .get_session_by_id(session_id)
        .await?
        .filter(VideoSession::is_live)
        .ok_or_else(|| AppError::NotFound("Class has no live session".into()))?;

    state
        .directory
        .add_participant(session_id, payload.student_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn remove_participant(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path((session_id, student_id)): Path<(VideoSessionId, UserId)>,
) -> Result<StatusCode, AppError> {
    ensure_self_or_host(&user, student_id)?;
    state
        .directory
        .remove_participant(session_id, student_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Students manage only their own membership; hosts may manage anyone's.
fn ensure_self_or_host(user: &AuthUser, student_id: UserId) -> Result<(), AppError> {
    if user.id == student_id || user.role.can_host() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Cannot change another participant's membership".into(),
        ))
    }
}
