use axum::{Extension, Json, extract::State};
use tracing::{info, warn};

use tesoro_db::models::UserRow;
use tesoro_db::parse_timestamp;
use tesoro_types::api::{
    AdminStats, ChangeSiteRoleRequest, MessageResponse, UpdateSiteSettingsRequest, UserList,
};
use tesoro_types::models::{SiteConfig, User};

use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath};
use crate::session::Session;
use crate::state::{AppState, blocking};
use crate::validation;

/// GET /api/admin/stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<AdminStats>, ApiError> {
    let stats = blocking(&state, |inner| Ok(inner.db.stats()?)).await?;
    Ok(Json(AdminStats {
        total_users: stats.users,
        total_journals: stats.journals,
        total_events: stats.events,
    }))
}

/// GET /api/admin/site-settings
pub async fn get_site_settings(State(state): State<AppState>) -> Result<Json<SiteConfig>, ApiError> {
    let site = blocking(&state, |inner| Ok(inner.db.get_site_config()?)).await?;
    Ok(Json(SiteConfig {
        site_name: site.site_name,
        allow_new_registrations: site.allow_new_registrations,
    }))
}

/// PUT /api/admin/site-settings
pub async fn update_site_settings(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiJson(req): ApiJson<UpdateSiteSettingsRequest>,
) -> Result<Json<SiteConfig>, ApiError> {
    let site_name = validation::site_name(&req.site_name)?;
    let allow = req.allow_new_registrations;

    let site_name = blocking(&state, move |inner| {
        inner.db.update_site_config(&site_name, allow)?;
        Ok(site_name)
    })
    .await?;

    info!(
        "Admin {} updated site settings (registrations {})",
        session.user_id,
        if allow { "open" } else { "closed" }
    );
    Ok(Json(SiteConfig {
        site_name,
        allow_new_registrations: allow,
    }))
}

/// GET /api/admin/usuarios
pub async fn list_users(State(state): State<AppState>) -> Result<Json<UserList>, ApiError> {
    let rows = blocking(&state, |inner| Ok(inner.db.list_users()?)).await?;
    Ok(Json(UserList {
        users: rows.into_iter().map(to_user).collect(),
    }))
}

/// DELETE /api/admin/usuarios/{id}
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath(user_id): ApiPath<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    if user_id == session.user_id {
        return Err(ApiError::forbidden("You cannot delete your own account"));
    }

    let deletion = blocking(&state, move |inner| {
        let deletion = inner
            .db
            .delete_user(user_id)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        inner.sessions.destroy_for_user(user_id)?;
        Ok(deletion)
    })
    .await?;

    for journal_id in &deletion.deleted_journals {
        if let Err(e) = state.media.delete_journal_dir(*journal_id).await {
            warn!("Could not remove media of orphaned journal {}: {:#}", journal_id, e);
        }
    }

    info!("Admin {} deleted user {}", session.user_id, user_id);
    Ok(Json(MessageResponse::new("User deleted")))
}

/// PUT /api/admin/usuarios/{id}/rol
///
/// The target's sessions are dropped so the new role applies from their
/// next login.
pub async fn change_user_role(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath(user_id): ApiPath<i64>,
    ApiJson(req): ApiJson<ChangeSiteRoleRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if user_id == session.user_id {
        return Err(ApiError::forbidden("You cannot change your own role"));
    }

    let role = req.role;
    blocking(&state, move |inner| {
        if !inner.db.set_user_role(user_id, role)? {
            return Err(ApiError::not_found("User not found"));
        }
        inner.sessions.destroy_for_user(user_id)?;
        Ok(())
    })
    .await?;

    info!("Admin {} set role of user {} to {}", session.user_id, user_id, role);
    Ok(Json(MessageResponse::new("Role updated")))
}

fn to_user(row: UserRow) -> User {
    User {
        id: row.id,
        name: row.name,
        email: row.email,
        role: row.role,
        created_at: parse_timestamp(&row.created_at).unwrap_or_default(),
    }
}
