use axum::{
    http::{HeaderValue, Method},
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{handlers, middleware, state::AppState};

/// All routes of the classroom backend. Every route requires a bearer token.
pub fn router(state: AppState) -> Router {
    let video_routes = Router::new()
        .route("/api/video/token", post(handlers::video_token::issue_token))
        .route(
            "/api/video/sessions",
            post(handlers::video_sessions::create_session),
        )
        .route(
            "/api/video/sessions/{id}",
            get(handlers::video_sessions::get_session),
        )
        .route(
            "/api/video/sessions/{id}/end",
            post(handlers::video_sessions::end_session),
        )
        .route(
            "/api/video/sessions/{id}/participants",
            get(handlers::video_sessions::list_participants)
                .post(handlers::video_sessions::add_participant),
        )
        .route(
            "/api/video/sessions/{id}/participants/{student_id}",
            delete(handlers::video_sessions::remove_participant),
        )
        .route(
            "/api/classes/{class_id}/video-session",
            get(handlers::video_sessions::get_active_session),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth,
        ));

    let cors = cors_layer(&state.config.cors_allow_origins);

    Router::new()
        .merge(video_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(middleware::request_id))
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(24 * 60 * 60));

    if origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(allowed))
}
