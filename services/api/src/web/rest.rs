//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::config::MAX_TTL_HOURS;
use crate::sync::gate::hash_password;
use crate::sync::{AccessDecision, SessionRegistry};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use chrono::{DateTime, Duration, Utc};
use quickpad_core::domain::Note;
use quickpad_core::ports::{NoteRepository, PortError, PortResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Request header carrying the secret of a protected note.
pub const SECRET_HEADER: &str = "x-note-secret";

const NOTE_ID_LEN: usize = 8;
const NOTE_ID_ATTEMPTS: usize = 5;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        create_note_handler,
        get_note_handler,
        update_note_handler,
    ),
    components(
        schemas(
            HealthResponse,
            CreateNoteRequest,
            CreateNoteResponse,
            NoteResponse,
            UpdateNoteRequest,
            UpdateNoteResponse
        )
    ),
    tags(
        (name = "Quickpad API", description = "Create, read and overwrite notes; live editing happens over the /ws WebSocket.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub service: String,
}

/// The payload for creating a note. Every field is optional.
#[derive(Deserialize, ToSchema, Default)]
pub struct CreateNoteRequest {
    #[serde(default)]
    pub content: String,
    /// Protects the note when present and non-empty.
    #[serde(default)]
    pub password: Option<String>,
    /// Lifetime in hours; the server default applies when omitted.
    #[serde(default)]
    pub ttl_hours: Option<i64>,
}

/// The response payload sent after successfully creating a note.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct CreateNoteResponse {
    pub id: String,
    pub protected: bool,
    pub expires_at: DateTime<Utc>,
}

/// A note's current text. `version` is present only while a live session holds
/// the note, and is the version a `join` would report.
#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct NoteResponse {
    pub id: String,
    pub content: String,
    pub version: Option<u64>,
}

/// Full-text overwrite of a note.
#[derive(Deserialize, ToSchema)]
pub struct UpdateNoteRequest {
    pub content: String,
    /// The session version the writer last saw; treated as 0 when omitted.
    #[serde(default)]
    pub base_version: Option<u64>,
}

#[derive(Serialize, Deserialize, ToSchema, Debug, PartialEq)]
pub struct UpdateNoteResponse {
    pub id: String,
    pub version: u64,
    /// The write was based on an out-of-date version and overrode newer edits.
    pub rebase: bool,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        service: "quickpad-backend".to_string(),
    })
}

/// Create a new note, optionally protected by a password.
///
/// The note's content is not echoed back; clients open it through the
/// WebSocket `join` message.
#[utoipa::path(
    post,
    path = "/api/notes",
    request_body = CreateNoteRequest,
    responses(
        (status = 201, description = "Note created", body = CreateNoteResponse),
        (status = 400, description = "Invalid TTL"),
        (status = 503, description = "Storage unavailable"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_note_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<CreateNoteRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let ttl_hours = req.ttl_hours.unwrap_or(app_state.config.note_ttl_hours);
    if !(1..=MAX_TTL_HOURS).contains(&ttl_hours) {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("ttl_hours must be between 1 and {}", MAX_TTL_HOURS),
        ));
    }

    let password_hash = match req.password.filter(|p| !p.is_empty()) {
        Some(password) => {
            let hashed = tokio::task::spawn_blocking(move || hash_password(&password))
                .await
                .map_err(|e| {
                    error!("Password hashing task failed: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password".to_string())
                })?
                .map_err(|e| {
                    error!("Failed to hash password: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to hash password".to_string())
                })?;
            Some(hashed)
        }
        None => None,
    };

    match create_note(app_state.db.as_ref(), req.content, password_hash, ttl_hours).await {
        Ok(note) => {
            info!(note_id = %note.id, protected = note.is_protected(), "Note created");
            let response = CreateNoteResponse {
                protected: note.is_protected(),
                id: note.id,
                expires_at: note.expires_at,
            };
            Ok((StatusCode::CREATED, Json(response)))
        }
        Err(PortError::StorageUnavailable(e)) => {
            error!("Failed to create note: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage is unavailable".to_string(),
            ))
        }
        Err(e) => {
            error!("Failed to create note: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to create note".to_string(),
            ))
        }
    }
}

/// Read a note.
///
/// Returns the live session's content while anyone is editing the note, and
/// the stored content otherwise. Protected notes need their secret in the
/// `x-note-secret` header.
#[utoipa::path(
    get,
    path = "/api/notes/{id}",
    params(
        ("id" = String, Path, description = "Note id"),
        ("x-note-secret" = Option<String>, Header, description = "Secret of a protected note")
    ),
    responses(
        (status = 200, description = "Current note content", body = NoteResponse),
        (status = 401, description = "Wrong or missing secret"),
        (status = 404, description = "Note not found"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn get_note_handler(
    State(app_state): State<Arc<AppState>>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<NoteResponse>, (StatusCode, String)> {
    check_access(&app_state, &note_id, &headers).await?;
    let note = read_note(&app_state.registry, app_state.db.as_ref(), &note_id)
        .await
        .map_err(port_error_response)?;
    Ok(Json(note))
}

/// Overwrite a note's content.
///
/// While a live session holds the note the write is applied like a
/// participant's edit and broadcast to everyone in the session; a
/// `base_version` ahead of the session is rejected with 409.
#[utoipa::path(
    put,
    path = "/api/notes/{id}",
    request_body = UpdateNoteRequest,
    params(
        ("id" = String, Path, description = "Note id"),
        ("x-note-secret" = Option<String>, Header, description = "Secret of a protected note")
    ),
    responses(
        (status = 200, description = "Content written", body = UpdateNoteResponse),
        (status = 401, description = "Wrong or missing secret"),
        (status = 404, description = "Note not found"),
        (status = 409, description = "base_version is ahead of the live session"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn update_note_handler(
    State(app_state): State<Arc<AppState>>,
    Path(note_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateNoteRequest>,
) -> Result<Json<UpdateNoteResponse>, (StatusCode, String)> {
    check_access(&app_state, &note_id, &headers).await?;
    let outcome = app_state
        .registry
        .write_content(&note_id, req.base_version, req.content)
        .await
        .map_err(port_error_response)?;
    info!(
        note_id = %note_id,
        version = outcome.resulting_version,
        rebase = outcome.is_rebase(),
        "Note overwritten over REST"
    );
    Ok(Json(UpdateNoteResponse {
        id: note_id,
        version: outcome.resulting_version,
        rebase: outcome.is_rebase(),
    }))
}

/// The live session's view of a note if there is one, else the stored note.
pub async fn read_note(
    registry: &SessionRegistry,
    db: &dyn NoteRepository,
    note_id: &str,
) -> PortResult<NoteResponse> {
    match registry.get(note_id).await {
        Ok(snapshot) => Ok(NoteResponse {
            id: snapshot.note_id,
            content: snapshot.content,
            version: Some(snapshot.version),
        }),
        Err(PortError::NotFound(_)) => {
            let note = db.load(note_id).await?;
            Ok(NoteResponse {
                id: note.id,
                content: note.content,
                version: None,
            })
        }
        Err(e) => Err(e),
    }
}

async fn check_access(
    app_state: &AppState,
    note_id: &str,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, String)> {
    let secret = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    app_state
        .gate
        .authorize(note_id, secret)
        .await
        .and_then(AccessDecision::require)
        .map_err(port_error_response)
}

fn port_error_response(error: PortError) -> (StatusCode, String) {
    match error {
        PortError::NotFound(_) => (StatusCode::NOT_FOUND, "Note not found".to_string()),
        PortError::Unauthorized => (StatusCode::UNAUTHORIZED, "Wrong or missing secret".to_string()),
        PortError::InvalidState(message) => (StatusCode::CONFLICT, message),
        PortError::StorageUnavailable(reason) => {
            error!("Storage unavailable: {}", reason);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage is unavailable".to_string(),
            )
        }
    }
}

/// Stores a new note under a fresh random slug, drawing again on collision.
pub async fn create_note(
    db: &dyn NoteRepository,
    content: String,
    password_hash: Option<String>,
    ttl_hours: i64,
) -> PortResult<Note> {
    let created_at = Utc::now();
    for _ in 0..NOTE_ID_ATTEMPTS {
        let id = new_note_id();
        if db.exists(&id).await? {
            continue;
        }
        let note = Note {
            id,
            content: content.clone(),
            password_hash: password_hash.clone(),
            created_at,
            expires_at: created_at + Duration::hours(ttl_hours),
        };
        match db.create(note.clone()).await {
            Ok(()) => return Ok(note),
            // Lost a race for the same slug.
            Err(PortError::InvalidState(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(PortError::InvalidState(
        "could not allocate a unique note id".to_string(),
    ))
}

fn new_note_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(NOTE_ID_LEN);
    id
}
