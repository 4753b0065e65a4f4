use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use classroom_backend::{
    app,
    models::{
        participant::{ParticipantRole, SessionParticipant},
        user::{AuthUser, UserRole},
        video_session::{SessionStatus, VideoSession},
    },
    state::AppState,
    types::ClassId,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

#[path = "support/mod.rs"]
mod support;

use support::{auth_user, bearer_for, test_config, InMemoryDirectory};

fn router_with(directory: Arc<InMemoryDirectory>) -> (Router, AppState) {
    let state = AppState::new(test_config(), directory);
    (app::router(state.clone()), state)
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    user: Option<&AuthUser>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, bearer_for(user));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    };
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, json)
}

#[tokio::test]
async fn requests_without_a_bearer_token_are_unauthorized() {
    let (router, _) = router_with(Arc::new(InMemoryDirectory::default()));
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/video/token",
        None,
        Some(json!({ "channelName": "c", "numericId": 1, "role": "subscriber" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_endpoint_issues_a_verifiable_channel_token() {
    let (router, state) = router_with(Arc::new(InMemoryDirectory::default()));
    let teacher = auth_user(UserRole::Teacher);
    let numeric_id = teacher.id.numeric_id();

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/video/token",
        Some(&teacher),
        Some(json!({
            "channelName": "class-abc",
            "numericId": numeric_id,
            "role": "publisher"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().expect("token");
    assert!(body["expiresAt"].is_string());
    let claims = state.signer.verify(token).expect("verify");
    assert_eq!(claims.channel, "class-abc");
    assert_eq!(claims.uid, numeric_id);
    assert_eq!(claims.role, ParticipantRole::Publisher);
}

#[tokio::test]
async fn students_cannot_request_publisher_tokens() {
    let (router, _) = router_with(Arc::new(InMemoryDirectory::default()));
    let student = auth_user(UserRole::Student);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/video/token",
        Some(&student),
        Some(json!({
            "channelName": "class-abc",
            "numericId": student.id.numeric_id(),
            "role": "publisher"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}

#[tokio::test]
async fn token_requests_are_validated() {
    let (router, _) = router_with(Arc::new(InMemoryDirectory::default()));
    let student = auth_user(UserRole::Student);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/video/token",
        Some(&student),
        Some(json!({ "channelName": "", "numericId": 0, "role": "subscriber" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn teacher_creates_and_ends_a_session() {
    let directory = Arc::new(InMemoryDirectory::default());
    let (router, _) = router_with(directory.clone());
    let teacher = auth_user(UserRole::Teacher);
    let class_id = ClassId::new();

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/video/sessions",
        Some(&teacher),
        Some(json!({ "classId": class_id, "channelName": "class-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session: VideoSession = serde_json::from_value(body).expect("session");
    assert_eq!(session.teacher_id, teacher.id);
    assert_eq!(session.status, SessionStatus::Live);

    let (status, body) = send(
        &router,
        Method::GET,
        &format!("/api/classes/{}/video-session", class_id),
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], session.id.to_string());

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/video/sessions",
        Some(&teacher),
        Some(json!({ "classId": class_id, "channelName": "class-2" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/video/sessions/{}/end", session.id),
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &router,
        Method::GET,
        &format!("/api/video/sessions/{}", session.id),
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ended");
    assert!(body["durationSeconds"].as_i64().expect("duration") >= 0);

    let (status, _) = send(
        &router,
        Method::GET,
        &format!("/api/classes/{}/video-session", class_id),
        Some(&teacher),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn students_cannot_start_or_end_sessions() {
    let directory = Arc::new(InMemoryDirectory::default());
    let (router, _) = router_with(directory.clone());
    let student = auth_user(UserRole::Student);
    let live = directory.insert_live(ClassId::new(), auth_user(UserRole::Teacher).id);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/video/sessions",
        Some(&student),
        Some(json!({ "classId": ClassId::new(), "channelName": "class-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/video/sessions/{}/end", live.id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(directory.sessions()[0].is_live());
}

#[tokio::test]
async fn students_manage_their_own_membership() {
    let directory = Arc::new(InMemoryDirectory::default());
    let (router, _) = router_with(directory.clone());
    let student = auth_user(UserRole::Student);
    let classmate = auth_user(UserRole::Student);
    let live = directory.insert_live(ClassId::new(), auth_user(UserRole::Teacher).id);
    let participants_uri = format!("/api/video/sessions/{}/participants", live.id);

    let (status, _) = send(
        &router,
        Method::POST,
        &participants_uri,
        Some(&student),
        Some(json!({ "studentId": student.id })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &router,
        Method::POST,
        &participants_uri,
        Some(&student),
        Some(json!({ "studentId": classmate.id })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&router, Method::GET, &participants_uri, Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    let rows: Vec<SessionParticipant> = serde_json::from_value(body).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].user_id, student.id);
    assert!(rows[0].left_at.is_none());

    let (status, _) = send(
        &router,
        Method::DELETE,
        &format!("{}/{}", participants_uri, student.id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(directory.participants()[0].left_at.is_some());
}

#[tokio::test]
async fn joining_an_ended_session_is_not_found() {
    let directory = Arc::new(InMemoryDirectory::default());
    let (router, _) = router_with(directory.clone());
    let student = auth_user(UserRole::Student);

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/video/sessions/{}/participants", classroom_backend::types::VideoSessionId::new()),
        Some(&student),
        Some(json!({ "studentId": student.id })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let (router, _) = router_with(Arc::new(InMemoryDirectory::default()));
    let request = Request::builder()
        .uri(format!("/api/classes/{}/video-session", ClassId::new()))
        .header("x-request-id", "req-42")
        .body(Body::empty())
        .expect("request");

    let response = router.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok()),
        Some("req-42")
    );
}
