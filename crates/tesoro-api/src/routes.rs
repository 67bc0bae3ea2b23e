use std::any::Any;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    middleware::{from_fn, from_fn_with_state},
    response::{Html, IntoResponse, Response},
    routing::{delete, get, post, put},
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tracing::error;

use crate::error::ApiError;
use crate::media::MAX_UPLOAD_BYTES;
use crate::middleware::{require_admin, require_auth};
use crate::rate_limit::limit_login;
use crate::state::{AppState, blocking};
use crate::{admin, auth, events, journals};

/// Room for the multipart framing and text fields around a full-size file.
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/registro", post(auth::register))
        .route(
            "/login",
            post(auth::login).route_layer(from_fn_with_state(state.clone(), limit_login)),
        )
        .route("/logout", get(auth::logout).post(auth::logout))
        .route("/site", get(auth::site_info));

    let protected_routes = Router::new()
        .route("/sesion", get(auth::current_session))
        .route("/diarios", get(journals::list_journals).post(journals::create_journal))
        .route("/diarios/activo", put(journals::set_active_journal))
        .route("/diarios/{id}", delete(journals::delete_journal))
        .route(
            "/diarios/{id}/config",
            get(journals::get_theme_config).put(journals::save_theme_config),
        )
        .route(
            "/diarios/{id}/acceso",
            get(journals::list_members).post(journals::grant_access),
        )
        .route(
            "/diarios/{id}/acceso/{user_id}",
            put(journals::change_access).delete(journals::revoke_access),
        )
        .route(
            "/eventos/{diario_id}",
            get(events::list_events)
                .post(events::create_event)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/eventos/{diario_id}/{evento_id}",
            delete(events::delete_event),
        )
        .route(
            "/eventos/{diario_id}/{evento_id}/favorito",
            put(events::set_favorite),
        )
        .route("/media/{diario_id}/{file}", get(events::download_media));

    let admin_routes = Router::new()
        .route("/admin/stats", get(admin::stats))
        .route(
            "/admin/site-settings",
            get(admin::get_site_settings).put(admin::update_site_settings),
        )
        .route("/admin/usuarios", get(admin::list_users))
        .route("/admin/usuarios/{id}", delete(admin::delete_user))
        .route("/admin/usuarios/{id}/rol", put(admin::change_user_role))
        .route_layer(from_fn(require_admin));

    // Admin checks run after authentication: the outer route_layer wraps them.
    let authenticated = protected_routes
        .merge(admin_routes)
        .route_layer(from_fn_with_state(state.clone(), require_auth));

    let api = Router::new()
        .merge(public_routes)
        .merge(authenticated)
        .method_not_allowed_fallback(api_method_not_allowed)
        .fallback(api_not_found);

    let public_dir = ServeDir::new(&state.config.public_dir);

    Router::new()
        .nest("/api", api)
        .route("/", get(index_page))
        .fallback_service(public_dir)
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// `/` shows the registration page while sign-ups are open, otherwise the
/// login page.
async fn index_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let site = blocking(&state, |inner| Ok(inner.db.get_site_config()?)).await?;
    let page = if site.allow_new_registrations {
        "index.html"
    } else {
        "login.html"
    };

    match tokio::fs::read_to_string(state.config.public_dir.join(page)).await {
        Ok(html) => Ok(Html(html)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::not_found(format!("{page} is missing")))
        }
        Err(e) => Err(anyhow::Error::from(e).into()),
    }
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("No such API endpoint")
}

async fn api_method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!("Handler panicked: {}", detail);

    ApiError::Internal(anyhow::anyhow!("handler panicked: {}", detail)).into_response()
}
