//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `NoteRepository` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quickpad_core::domain::Note;
use quickpad_core::ports::{NoteRepository, PortError, PortResult};
use sqlx::{FromRow, PgPool};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `NoteRepository` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct NoteRecord {
    id: String,
    content: String,
    password_hash: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}
impl NoteRecord {
    fn to_domain(self) -> Note {
        Note {
            id: self.id,
            content: self.content,
            password_hash: self.password_hash,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

fn storage_error(e: sqlx::Error) -> PortError {
    PortError::StorageUnavailable(e.to_string())
}

//=========================================================================================
// `NoteRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl NoteRepository for DbAdapter {
    async fn create(&self, note: Note) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO notes (id, content, password_hash, created_at, expires_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&note.id)
        .bind(&note.content)
        .bind(&note.password_hash)
        .bind(note.created_at)
        .bind(note.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return PortError::InvalidState(format!("Note id {} is already taken", note.id));
                }
            }
            storage_error(e)
        })?;
        Ok(())
    }

    async fn load(&self, note_id: &str) -> PortResult<Note> {
        let record = sqlx::query_as::<_, NoteRecord>(
            "SELECT id, content, password_hash, created_at, expires_at FROM notes WHERE id = $1",
        )
        .bind(note_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?
        .ok_or_else(|| PortError::NotFound(format!("Note {} not found", note_id)))?;
        Ok(record.to_domain())
    }

    async fn save(&self, note_id: &str, content: &str) -> PortResult<()> {
        let result = sqlx::query("UPDATE notes SET content = $1 WHERE id = $2")
            .bind(content)
            .bind(note_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Note {} not found", note_id)));
        }
        Ok(())
    }

    async fn exists(&self, note_id: &str) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM notes WHERE id = $1)")
            .bind(note_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_error)
    }

    async fn delete(&self, note_id: &str) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM notes WHERE id = $1")
            .bind(note_id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Note {} not found", note_id)));
        }
        Ok(())
    }
}
