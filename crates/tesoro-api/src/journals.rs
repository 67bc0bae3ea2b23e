use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{info, warn};

use tesoro_db::journals::{AccessChange, GrantOutcome};
use tesoro_db::models::{JournalRow, MemberRow};
use tesoro_db::parse_timestamp;
use tesoro_types::api::{
    ActiveJournalResponse, ChangeRoleRequest, CreateJournalRequest, CreateJournalResponse,
    GrantAccessRequest, JournalList, MemberList, MessageResponse, SetActiveJournalRequest,
    ThemeConfig,
};
use tesoro_types::models::{Journal, JournalRole, Member};

use crate::access::{self, MANAGE, READ};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};
use crate::session::{Session, SessionToken};
use crate::state::{AppState, blocking};
use crate::validation;

const DEFAULT_THEME_CONFIG: &str = "{}";

/// GET /api/diarios
pub async fn list_journals(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<Json<JournalList>, ApiError> {
    let user_id = session.user_id;
    let rows = blocking(&state, move |inner| Ok(inner.db.list_journals_for_user(user_id)?)).await?;

    let journals: Vec<Journal> = rows.into_iter().map(to_journal).collect();
    // A grant revoked since login leaves a stale pointer in the session.
    let active_journal_id = session
        .active_journal_id
        .filter(|id| journals.iter().any(|j| j.id == *id));

    Ok(Json(JournalList {
        journals,
        active_journal_id,
    }))
}

/// POST /api/diarios
pub async fn create_journal(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiJson(req): ApiJson<CreateJournalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subject_name = validation::subject_name(&req.subject_name)?;
    let user_id = session.user_id;

    let (id, subject_name) = blocking(&state, move |inner| {
        let id = inner.db.create_journal(&subject_name, user_id)?;
        info!("User {} created journal {}", user_id, id);
        Ok((id, subject_name))
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateJournalResponse {
            id,
            subject_name,
            role: JournalRole::Owner,
        }),
    ))
}

/// PUT /api/diarios/activo
pub async fn set_active_journal(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    ApiJson(req): ApiJson<SetActiveJournalRequest>,
) -> Result<Json<ActiveJournalResponse>, ApiError> {
    let journal_id = req.id;

    let role = blocking(&state, move |inner| {
        let role = access::require_role(inner, &session, journal_id, READ)?;
        inner.db.touch_journal(journal_id, session.user_id)?;
        if !inner.sessions.set_active_journal(&token, Some(journal_id))? {
            return Err(ApiError::unauthenticated());
        }
        Ok(role)
    })
    .await?;

    Ok(Json(ActiveJournalResponse {
        active_journal_id: journal_id,
        role,
    }))
}

/// DELETE /api/diarios/{id}
pub async fn delete_journal(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(SessionToken(token)): Extension<SessionToken>,
    ApiPath(journal_id): ApiPath<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    blocking(&state, move |inner| {
        access::require_role(inner, &session, journal_id, MANAGE)?;
        if !inner.db.delete_journal(journal_id)? {
            return Err(ApiError::not_found("Journal not found"));
        }
        if session.active_journal_id == Some(journal_id) {
            let next = inner.db.most_recent_journal(session.user_id)?;
            inner.sessions.set_active_journal(&token, next)?;
        }
        Ok(())
    })
    .await?;

    if let Err(e) = state.media.delete_journal_dir(journal_id).await {
        warn!("Could not remove media of deleted journal {}: {:#}", journal_id, e);
    }

    Ok(Json(MessageResponse::new("Journal deleted")))
}

/// GET /api/diarios/{id}/config
pub async fn get_theme_config(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath(journal_id): ApiPath<i64>,
) -> Result<Json<ThemeConfig>, ApiError> {
    let config = blocking(&state, move |inner| {
        access::require_role(inner, &session, journal_id, READ)?;
        Ok(inner.db.get_theme_config(journal_id, session.user_id)?)
    })
    .await?;

    Ok(Json(ThemeConfig {
        config: config.unwrap_or_else(|| DEFAULT_THEME_CONFIG.to_string()),
    }))
}

/// PUT /api/diarios/{id}/config
pub async fn save_theme_config(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath(journal_id): ApiPath<i64>,
    ApiJson(req): ApiJson<ThemeConfig>,
) -> Result<Json<MessageResponse>, ApiError> {
    blocking(&state, move |inner| {
        access::require_role(inner, &session, journal_id, READ)?;
        validation::theme_config(&req.config)?;
        inner.db.save_theme_config(journal_id, session.user_id, &req.config)?;
        Ok(())
    })
    .await?;

    Ok(Json(MessageResponse::new("Configuration saved")))
}

/// GET /api/diarios/{id}/acceso
pub async fn list_members(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath(journal_id): ApiPath<i64>,
) -> Result<Json<MemberList>, ApiError> {
    let rows = blocking(&state, move |inner| {
        access::require_role(inner, &session, journal_id, READ)?;
        Ok(inner.db.list_members(journal_id)?)
    })
    .await?;

    Ok(Json(MemberList {
        members: rows.into_iter().map(to_member).collect(),
    }))
}

/// POST /api/diarios/{id}/acceso
pub async fn grant_access(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath(journal_id): ApiPath<i64>,
    ApiJson(req): ApiJson<GrantAccessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = blocking(&state, move |inner| {
        access::require_role(inner, &session, journal_id, MANAGE)?;
        let email = validation::email(&req.email)?;

        let Some(user) = inner.db.get_user_by_email(&email)? else {
            return Err(ApiError::not_found("No user with that email"));
        };

        match inner.db.grant_access(journal_id, user.id, req.role)? {
            GrantOutcome::AlreadyMember => Err(ApiError::conflict(
                "That user already has access to this journal",
            )),
            GrantOutcome::Granted => {
                info!("User {} granted {} on journal {} to user {}", session.user_id, req.role, journal_id, user.id);
                Ok(Member {
                    user_id: user.id,
                    name: user.name,
                    email: user.email,
                    role: req.role,
                })
            }
        }
    })
    .await?;

    Ok((StatusCode::CREATED, Json(member)))
}

/// PUT /api/diarios/{id}/acceso/{user_id}
pub async fn change_access(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath((journal_id, user_id)): ApiPath<(i64, i64)>,
    ApiJson(req): ApiJson<ChangeRoleRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    blocking(&state, move |inner| {
        access::require_role(inner, &session, journal_id, MANAGE)?;
        let change = inner.db.change_access_role(journal_id, user_id, req.role)?;
        access_change_result(change)
    })
    .await?;

    Ok(Json(MessageResponse::new("Role updated")))
}

/// DELETE /api/diarios/{id}/acceso/{user_id}
///
/// Owners may remove anyone; every member may remove themself.
pub async fn revoke_access(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath((journal_id, user_id)): ApiPath<(i64, i64)>,
) -> Result<Json<MessageResponse>, ApiError> {
    blocking(&state, move |inner| {
        let required = if user_id == session.user_id { READ } else { MANAGE };
        access::require_role(inner, &session, journal_id, required)?;
        let change = inner.db.revoke_access(journal_id, user_id)?;
        access_change_result(change)
    })
    .await?;

    Ok(Json(MessageResponse::new("Access removed")))
}

fn access_change_result(change: AccessChange) -> Result<(), ApiError> {
    match change {
        AccessChange::Applied => Ok(()),
        AccessChange::NotMember => Err(ApiError::not_found("That user has no access to this journal")),
        AccessChange::LastOwner => Err(ApiError::conflict(
            "A journal must keep at least one owner",
        )),
    }
}

fn to_journal(row: JournalRow) -> Journal {
    Journal {
        id: row.id,
        subject_name: row.subject_name,
        role: row.role,
        created_at: parse_timestamp(&row.created_at).unwrap_or_default(),
        last_accessed_at: parse_timestamp(&row.last_accessed_at).unwrap_or_default(),
    }
}

fn to_member(row: MemberRow) -> Member {
    Member {
        user_id: row.user_id,
        name: row.name,
        email: row.email,
        role: row.role,
    }
}
