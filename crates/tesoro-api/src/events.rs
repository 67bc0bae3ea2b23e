use axum::{
    Extension, Json,
    body::Body,
    extract::{Multipart, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

use tesoro_db::events::EventFilter;
use tesoro_db::models::{EventRow, NewEvent};
use tesoro_db::parse_timestamp;
use tesoro_types::api::{CreateEventResponse, EventList, FavoriteRequest, MessageResponse};
use tesoro_types::models::{Event, EventKind};

use crate::access::{self, READ, WRITE};
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::media::{self, MAX_UPLOAD_BYTES};
use crate::session::Session;
use crate::state::{AppState, blocking};
use crate::validation;

const UNKNOWN_AUTHOR: &str = "unknown";

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    #[serde(default)]
    pub favorites: bool,
    #[serde(default)]
    pub with_media: bool,
}

/// GET /api/eventos/{diario_id}
pub async fn list_events(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath(journal_id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<EventQuery>,
) -> Result<Json<EventList>, ApiError> {
    let filter = EventFilter {
        favorites_only: query.favorites,
        with_media_only: query.with_media,
    };

    let (role, rows) = blocking(&state, move |inner| {
        let role = access::require_role(inner, &session, journal_id, READ)?;
        Ok((role, inner.db.list_events(journal_id, filter)?))
    })
    .await?;

    let events = rows
        .into_iter()
        .map(to_event)
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(Json(EventList { role, events }))
}

/// Fields of the event creation form.
#[derive(Default)]
struct EventForm {
    kind: Option<String>,
    description: Option<String>,
    date: Option<String>,
    media: Option<Vec<u8>>,
}

impl EventForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "kind" => form.kind = Some(field.text().await?),
                "description" => form.description = Some(field.text().await?),
                "date" => form.date = Some(field.text().await?),
                "media" => {
                    let data = field.bytes().await?;
                    if data.len() > MAX_UPLOAD_BYTES {
                        return Err(ApiError::PayloadTooLarge);
                    }
                    // Browsers send an empty part when no file was chosen.
                    if !data.is_empty() {
                        form.media = Some(data.to_vec());
                    }
                }
                other => {
                    return Err(ApiError::validation(format!("unexpected form field '{other}'")));
                }
            }
        }

        Ok(form)
    }
}

/// POST /api/eventos/{diario_id}, multipart.
pub async fn create_event(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath(journal_id): ApiPath<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    access::authorize(&state, &session, journal_id, WRITE).await?;

    let form = EventForm::read(multipart).await?;
    let kind: EventKind = form
        .kind
        .as_deref()
        .unwrap_or_default()
        .trim()
        .parse()
        .map_err(|_| ApiError::validation("kind must be one of text, photo, milestone"))?;
    let description = validation::description(form.description.as_deref().unwrap_or_default())?;
    let date = validation::date(form.date.as_deref().unwrap_or_default())?;

    let file_name = match &form.media {
        Some(data) => {
            let media_type = media::detect_media_type(data).ok_or_else(|| {
                ApiError::validation("File type not allowed, only JPEG, PNG, GIF, MP4 and MOV are accepted")
            })?;
            let file_name = media::generate_file_name(media_type.extension);
            state.media.save(journal_id, &file_name, data).await?;
            Some(file_name)
        }
        None => None,
    };

    let stored = file_name.clone();
    let author_id = session.user_id;
    let inserted = blocking(&state, move |inner| {
        let date = date.format("%Y-%m-%d").to_string();
        Ok(inner.db.insert_event(&NewEvent {
            journal_id,
            kind,
            description: &description,
            date: &date,
            media_path: stored.as_deref(),
            author_id,
        })?)
    })
    .await;

    let id = match inserted {
        Ok(id) => id,
        Err(e) => {
            if let Some(name) = &file_name {
                if let Err(cleanup) = state.media.delete_file(journal_id, name).await {
                    warn!("Could not remove orphaned media {}: {:#}", name, cleanup);
                }
            }
            return Err(e);
        }
    };

    info!("User {} added event {} to journal {}", author_id, id, journal_id);
    Ok((
        StatusCode::CREATED,
        Json(CreateEventResponse {
            id,
            media_url: file_name.map(|name| media::media_url(journal_id, &name)),
        }),
    ))
}

/// DELETE /api/eventos/{diario_id}/{evento_id}
///
/// The row goes first; a media file that cannot be removed afterwards is
/// only logged.
pub async fn delete_event(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath((journal_id, event_id)): ApiPath<(i64, i64)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let media_path = blocking(&state, move |inner| {
        access::require_role(inner, &session, journal_id, WRITE)?;
        inner
            .db
            .delete_event(journal_id, event_id)?
            .ok_or_else(|| ApiError::not_found("Event not found"))
    })
    .await?;

    if let Some(name) = media_path {
        if let Err(e) = state.media.delete_file(journal_id, &name).await {
            warn!("Could not remove media {} of deleted event {}: {:#}", name, event_id, e);
        }
    }

    Ok(Json(MessageResponse::new("Event deleted")))
}

/// PUT /api/eventos/{diario_id}/{evento_id}/favorito
pub async fn set_favorite(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath((journal_id, event_id)): ApiPath<(i64, i64)>,
    ApiJson(req): ApiJson<FavoriteRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    blocking(&state, move |inner| {
        access::require_role(inner, &session, journal_id, WRITE)?;
        if !inner.db.set_favorite(journal_id, event_id, req.is_favorite)? {
            return Err(ApiError::not_found("Event not found"));
        }
        Ok(())
    })
    .await?;

    Ok(Json(MessageResponse::new("Favorite updated")))
}

/// GET /api/media/{diario_id}/{file}
pub async fn download_media(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    ApiPath((journal_id, file_name)): ApiPath<(i64, String)>,
) -> Result<Response, ApiError> {
    access::authorize(&state, &session, journal_id, READ).await?;

    let path = state
        .media
        .file_path(journal_id, &file_name)
        .ok_or_else(|| ApiError::not_found("Media not found"))?;

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found("Media not found"));
        }
        Err(e) => return Err(anyhow::Error::from(e).into()),
    };
    let len = file.metadata().await.map_err(anyhow::Error::from)?.len();

    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(media::content_type_for(&file_name)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, max-age=3600"));

    Ok(response)
}

fn to_event(row: EventRow) -> anyhow::Result<Event> {
    let date = row
        .date
        .parse()
        .map_err(|e| anyhow::anyhow!("event {} has an invalid date {:?}: {}", row.id, row.date, e))?;

    Ok(Event {
        id: row.id,
        journal_id: row.journal_id,
        kind: row.kind,
        description: row.description,
        date,
        media_url: row
            .media_path
            .as_deref()
            .map(|name| media::media_url(row.journal_id, name)),
        is_favorite: row.is_favorite,
        author_id: row.author_id,
        author_name: row.author_name.unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        created_at: parse_timestamp(&row.created_at).unwrap_or_default(),
    })
}
