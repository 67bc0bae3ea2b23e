use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use tracing::debug;

use crate::error::ApiError;
use crate::session::{Session, SessionToken, token_from_request};
use crate::state::{AppState, blocking};

pub const LOGIN_PAGE: &str = "/login.html";

/// Resolve the session from the cookie or bearer token and attach
/// [`Session`] and [`SessionToken`] to the request.
///
/// Unauthenticated API clients get a 401; browsers loading a page are sent
/// to the login page instead.
pub async fn require_auth(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let session = match token_from_request(&jar, req.headers()) {
        Some(token) => {
            let lookup = token.clone();
            match blocking(&state, move |inner| Ok(inner.sessions.resolve(&lookup)?)).await {
                Ok(session) => session.map(|s| (s, token)),
                Err(e) => return e.into_response(),
            }
        }
        None => None,
    };

    let Some((session, token)) = session else {
        debug!("Unauthenticated request to {}", req.uri().path());
        return if wants_json(req.headers()) {
            ApiError::unauthenticated().into_response()
        } else {
            Redirect::to(LOGIN_PAGE).into_response()
        };
    };

    req.extensions_mut().insert(session);
    req.extensions_mut().insert(SessionToken(token));
    next.run(req).await
}

/// Must run after [`require_auth`].
pub async fn require_admin(req: Request, next: Next) -> Result<Response, ApiError> {
    let session = req
        .extensions()
        .get::<Session>()
        .ok_or_else(ApiError::unauthenticated)?;

    if !session.is_admin() {
        return Err(ApiError::forbidden("Administrator access required"));
    }

    Ok(next.run(req).await)
}

/// Whether the client expects a JSON error rather than a page.
pub fn wants_json(headers: &HeaderMap) -> bool {
    let xhr = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    if xhr {
        return true;
    }

    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    accept.contains("json") || !accept.contains("text/html")
}
