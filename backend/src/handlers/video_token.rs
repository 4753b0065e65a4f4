use axum::{
    extract::{Extension, State},
    Json,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    error::{AppError, SessionError},
    models::{
        credential::{TokenRequest, TokenResponse},
        participant::ParticipantRole,
        user::AuthUser,
    },
    state::AppState,
};

/// Issue a channel token for the caller.
pub async fn issue_token(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    payload.validate()?;
    authorize_token_request(&user, &payload)?;

    let response = state.signer.sign(&payload, Utc::now())?;
    tracing::info!(
        user_id = %user.id,
        channel = %payload.channel_name,
        role = payload.role.as_str(),
        expires_at = %response.expires_at,
        "issued channel token"
    );
    Ok(Json(response))
}

/// Callers may only request tokens for their own numeric id, and only hosts
/// may publish.
pub fn authorize_token_request(
    user: &AuthUser,
    request: &TokenRequest,
) -> Result<(), SessionError> {
    if request.numeric_id != user.id.numeric_id() {
        return Err(SessionError::Auth(
            "tokens can only be issued for your own participant id".to_string(),
        ));
    }
    if request.role == ParticipantRole::Publisher && !user.role.can_host() {
        return Err(SessionError::Auth(
            "only teachers can publish to a class".to_string(),
        ));
    }
    Ok(())
}
