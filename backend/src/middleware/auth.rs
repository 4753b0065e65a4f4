use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::{
    models::user::AuthUser,
    state::AppState,
    types::UserId,
    utils::jwt::{verify_access_token, Claims},
};

/// Requires a valid bearer access token. Inserts the [`Claims`] and the
/// resolved [`AuthUser`] into the request extensions.
pub async fn auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    let (claims, user) = authenticate_request(auth_header, &state.config.jwt_secret)?;
    tracing::Span::current().record("user_id", tracing::field::display(&user.id));

    request.extensions_mut().insert(claims);
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

pub fn parse_bearer_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

pub fn authenticate_request(
    auth_header: Option<&str>,
    secret: &str,
) -> Result<(Claims, AuthUser), StatusCode> {
    let token = auth_header
        .and_then(parse_bearer_token)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let claims = verify_access_token(token, secret).map_err(|err| {
        tracing::debug!(error = %err, "rejected access token");
        StatusCode::UNAUTHORIZED
    })?;

    let id: UserId = claims.sub.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;
    let user = AuthUser {
        id,
        display_name: claims.name.clone(),
        role: claims.role,
    };
    Ok((claims, user))
}
