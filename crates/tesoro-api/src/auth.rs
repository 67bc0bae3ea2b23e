use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use tesoro_db::queries::Registration;
use tesoro_types::api::{LoginRequest, MessageResponse, RegisterRequest, SessionResponse, SessionUser};
use tesoro_types::models::{SiteConfig, SiteRole};

use crate::error::ApiError;
use crate::extract::ApiJson;
use crate::middleware::{LOGIN_PAGE, wants_json};
use crate::session::{Session, clear_session_cookie, session_cookie, token_from_request};
use crate::state::{AppState, AppStateInner, blocking};
use crate::validation;

/// Journal created with an account when the form leaves the name out.
pub const DEFAULT_JOURNAL_NAME: &str = "Mi Diario";

/// POST /api/registro
///
/// The registration switch is checked before the body is even parsed, so a
/// closed site answers 403 to every attempt.
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Bytes, BytesRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let site = blocking(&state, |inner| Ok(inner.db.get_site_config()?)).await?;
    if !site.allow_new_registrations {
        return Err(ApiError::RegistrationDisabled);
    }

    let req: RegisterRequest = parse_body(&body?)?;
    let name = validation::name(&req.name)?;
    let email = validation::email(&req.email)?;
    validation::password(&req.password)?;
    let subject_name = match req.subject_name.as_deref() {
        Some(subject) => validation::subject_name(subject)?,
        None => DEFAULT_JOURNAL_NAME.to_string(),
    };

    let (token, session) = blocking(&state, move |inner| {
        if inner.db.get_user_by_email(&email)?.is_some() {
            return Err(email_taken());
        }

        let password_hash = hash_password(&req.password)?;
        match inner
            .db
            .register_user(&name, &email, &password_hash, SiteRole::User, &subject_name)?
        {
            Registration::EmailTaken => Err(email_taken()),
            Registration::Created { user_id, journal_id } => {
                Ok(inner.sessions.create(user_id, &name, SiteRole::User, Some(journal_id))?)
            }
        }
    })
    .await?;

    let jar = jar.add(session_cookie(token, state.sessions.ttl(), state.config.secure_cookies));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(SessionResponse {
            message: "Registration successful".into(),
            user: session.to_user(),
        }),
    ))
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = validation::email(&req.email)?;
    if req.password.is_empty() {
        return Err(ApiError::validation("password must not be empty"));
    }

    let (token, session) = blocking(&state, move |inner| {
        let Some(user) = inner.db.get_user_by_email(&email)? else {
            return Err(bad_credentials());
        };

        if !verify_password(&req.password, &user.password)? {
            warn!("Failed login for user {}", user.id);
            return Err(bad_credentials());
        }

        let active = inner.db.most_recent_journal(user.id)?;
        Ok(inner.sessions.create(user.id, &user.name, user.role, active)?)
    })
    .await?;

    let jar = jar.add(session_cookie(token, state.sessions.ttl(), state.config.secure_cookies));
    Ok((
        jar,
        Json(SessionResponse {
            message: "Login successful".into(),
            user: session.to_user(),
        }),
    ))
}

/// GET or POST /api/logout. Works with or without a live session.
pub async fn logout(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    if let Some(token) = token_from_request(&jar, &headers) {
        blocking(&state, move |inner| Ok(inner.sessions.destroy(&token)?)).await?;
    }

    let jar = jar.add(clear_session_cookie(state.config.secure_cookies));
    if method == Method::GET && !wants_json(&headers) {
        return Ok((jar, Redirect::to(LOGIN_PAGE)).into_response());
    }

    Ok((jar, Json(MessageResponse::new("Logged out"))).into_response())
}

/// GET /api/sesion
pub async fn current_session(Extension(session): Extension<Session>) -> Json<SessionUser> {
    Json(session.to_user())
}

/// GET /api/site
pub async fn site_info(State(state): State<AppState>) -> Result<Json<SiteConfig>, ApiError> {
    let site = blocking(&state, |inner| Ok(inner.db.get_site_config()?)).await?;
    Ok(Json(SiteConfig {
        site_name: site.site_name,
        allow_new_registrations: site.allow_new_registrations,
    }))
}

/// Creates the configured administrator on first start. Does nothing when
/// no seed is configured or the account already exists.
pub fn bootstrap_admin(inner: &AppStateInner) -> anyhow::Result<()> {
    let Some(seed) = &inner.config.admin_seed else {
        return Ok(());
    };

    let email = validation::email(&seed.email)
        .map_err(|e| anyhow::anyhow!("TESORO_ADMIN_EMAIL: {}", e))?;
    validation::password(&seed.password)
        .map_err(|e| anyhow::anyhow!("TESORO_ADMIN_PASSWORD: {}", e))?;

    if inner.db.get_user_by_email(&email)?.is_some() {
        info!("Admin account {} already present", email);
        return Ok(());
    }

    let password_hash = hash_password(&seed.password)?;
    match inner.db.register_user(
        seed.name.trim(),
        &email,
        &password_hash,
        SiteRole::Admin,
        DEFAULT_JOURNAL_NAME,
    )? {
        Registration::Created { user_id, .. } => info!("Created admin account {} ({})", email, user_id),
        Registration::EmailTaken => info!("Admin account {} already present", email),
    }
    Ok(())
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn verify_password(password: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| anyhow::anyhow!("stored password hash is invalid: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::validation(format!("Invalid JSON body: {e}")))
}

fn email_taken() -> ApiError {
    ApiError::conflict("That email is already registered")
}

fn bad_credentials() -> ApiError {
    ApiError::Unauthenticated("Invalid email or password".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hashes_verify() {
        let hash = hash_password("password1").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("password1", &hash).unwrap());
        assert!(!verify_password("password2", &hash).unwrap());
        assert!(verify_password("password1", "not a hash").is_err());
    }

    #[test]
    fn each_hash_gets_a_fresh_os_salt() {
        let a = hash_password("password1").unwrap();
        let b = hash_password("password1").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("password1", &b).unwrap());
    }
}
