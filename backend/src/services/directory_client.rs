//! HTTP client for the session directory routes served by this backend.

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Serialize;
use std::time::Duration;
use url::Url;

use crate::error::{ErrorResponse, SessionError};
use crate::models::participant::SessionParticipant;
use crate::models::video_session::{NewVideoSession, VideoSession};
use crate::repositories::SessionDirectory;
use crate::types::{ClassId, UserId, VideoSessionId};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionBody<'a> {
    class_id: ClassId,
    channel_name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddParticipantBody {
    student_id: UserId,
}

/// [`SessionDirectory`] over the `/api/video/sessions` routes, authenticated
/// with the caller's access token. The host of a created session is always
/// the caller.
pub struct HttpSessionDirectory {
    client: reqwest::Client,
    base: Url,
    access_token: String,
}

impl HttpSessionDirectory {
    pub fn new(base_url: &str, access_token: impl Into<String>) -> anyhow::Result<Self> {
        let base = Url::parse(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base,
            access_token: access_token.into(),
        })
    }

    fn url(&self, path: &str) -> Result<Url, SessionError> {
        self.base
            .join(path)
            .map_err(|e| SessionError::Directory(format!("invalid directory url {}: {}", path, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, SessionError> {
        request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| SessionError::Directory(format!("directory unreachable: {}", e)))
    }
}

async fn error_from(response: Response) -> SessionError {
    let status = response.status();
    let message = response
        .json::<ErrorResponse>()
        .await
        .map(|body| body.error)
        .unwrap_or_else(|_| status.to_string());
    error_for_status(status, message)
}

/// Same taxonomy as the Postgres directory: a conflicting live session is
/// `AlreadyActive`, not a retryable bookkeeping failure.
fn error_for_status(status: StatusCode, message: String) -> SessionError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SessionError::Auth(message),
        StatusCode::CONFLICT => SessionError::AlreadyActive,
        _ => SessionError::Directory(format!("directory returned {}: {}", status, message)),
    }
}

async fn optional_session(response: Response) -> Result<Option<VideoSession>, SessionError> {
    match response.status() {
        StatusCode::NOT_FOUND => Ok(None),
        status if status.is_success() => response
            .json::<VideoSession>()
            .await
            .map(Some)
            .map_err(|e| SessionError::Directory(format!("malformed session: {}", e))),
        _ => Err(error_from(response).await),
    }
}

async fn expect_success(response: Response) -> Result<(), SessionError> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(error_from(response).await)
    }
}

#[async_trait]
impl SessionDirectory for HttpSessionDirectory {
    #[tracing::instrument(name = "http_directory_get_session", level = "debug", skip(self), err)]
    async fn get_session_by_id(
        &self,
        id: VideoSessionId,
    ) -> Result<Option<VideoSession>, SessionError> {
        let url = self.url(&format!("/api/video/sessions/{}", id))?;
        let response = self.send(self.client.get(url)).await?;
        optional_session(response).await
    }

    #[tracing::instrument(name = "http_directory_active_session", level = "debug", skip(self), err)]
    async fn get_active_session_for_class(
        &self,
        class_id: ClassId,
    ) -> Result<Option<VideoSession>, SessionError> {
        let url = self.url(&format!("/api/classes/{}/video-session", class_id))?;
        let response = self.send(self.client.get(url)).await?;
        optional_session(response).await
    }

    #[tracing::instrument(
        name = "http_directory_create_session",
        level = "debug",
        skip(self, new_session),
        fields(class_id = %new_session.class_id),
        err
    )]
    async fn create_video_session(
        &self,
        new_session: &NewVideoSession,
    ) -> Result<VideoSession, SessionError> {
        let url = self.url("/api/video/sessions")?;
        let body = CreateSessionBody {
            class_id: new_session.class_id,
            channel_name: &new_session.channel_name,
        };
        let response = self.send(self.client.post(url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        response
            .json::<VideoSession>()
            .await
            .map_err(|e| SessionError::Directory(format!("malformed session: {}", e)))
    }

    #[tracing::instrument(name = "http_directory_end_session", level = "debug", skip(self), err)]
    async fn end_video_session(&self, session_id: VideoSessionId) -> Result<(), SessionError> {
        let url = self.url(&format!("/api/video/sessions/{}/end", session_id))?;
        let response = self.send(self.client.post(url)).await?;
        expect_success(response).await
    }

    #[tracing::instrument(name = "http_directory_add_participant", level = "debug", skip(self), err)]
    async fn add_participant(
        &self,
        session_id: VideoSessionId,
        student_id: UserId,
    ) -> Result<(), SessionError> {
        let url = self.url(&format!("/api/video/sessions/{}/participants", session_id))?;
        let response = self
            .send(self.client.post(url).json(&AddParticipantBody { student_id }))
            .await?;
        expect_success(response).await
    }

    #[tracing::instrument(
        name = "http_directory_remove_participant",
        level = "debug",
        skip(self),
        err
    )]
    async fn remove_participant(
        &self,
        session_id: VideoSessionId,
        student_id: UserId,
    ) -> Result<(), SessionError> {
        let url = self.url(&format!(
            "/api/video/sessions/{}/participants/{}",
            session_id, student_id
        ))?;
        let response = self.send(self.client.delete(url)).await?;
        expect_success(response).await
    }

    #[tracing::instrument(name = "http_directory_participants", level = "debug", skip(self), err)]
    async fn list_participants(
        &self,
        session_id: VideoSessionId,
    ) -> Result<Vec<SessionParticipant>, SessionError> {
        let url = self.url(&format!("/api/video/sessions/{}/participants", session_id))?;
        let response = self.send(self.client.get(url)).await?;
        if !response.status().is_success() {
            return Err(error_from(response).await);
        }
        response
            .json::<Vec<SessionParticipant>>()
            .await
            .map_err(|e| SessionError::Directory(format!("malformed participants: {}", e)))
    }
}
