use parlor_core::{Message, User};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("message {0} already exists")]
    Duplicate(Uuid),

    #[error("corrupted row: {0}")]
    Corrupted(String),

    #[error("timestamp out of storable range: {0}")]
    TimestampOutOfRange(OffsetDateTime),
}

const COLUMNS: &str = "id, body, author_id, author_name, created_at, updated_at";

/// Archivio dei messaggi su SQLite.
/// I timestamp sono salvati come nanosecondi unix (INTEGER) così l'ordinamento è esatto;
/// `seq` (autoincrement) spareggia messaggi creati nello stesso istante.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert(&self, message: &Message) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO messages (id, body, author_id, author_name, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(&message.body)
        .bind(message.author.id.to_string())
        .bind(&message.author.username)
        .bind(to_nanos(message.created_at)?)
        .bind(message.updated_at.map(to_nanos).transpose()?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            // id già presente: lo segnaliamo a parte, non è un guasto del database
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(message.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM messages WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Aggiorna body e updated_at; `None` se il messaggio non esiste.
    pub async fn update_body(
        &self,
        id: Uuid,
        body: &str,
        updated_at: OffsetDateTime,
    ) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!(
            "UPDATE messages SET body = ?, updated_at = ? WHERE id = ? RETURNING {COLUMNS}"
        ))
        .bind(body)
        .bind(to_nanos(updated_at)?)
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Cancella e restituisce lo snapshot del messaggio com'era prima; `None` se non esiste.
    pub async fn delete(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!("DELETE FROM messages WHERE id = ? RETURNING {COLUMNS}"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Pagina di messaggi dal più recente.
    pub async fn list(&self, offset: u64, limit: u32) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM messages ORDER BY created_at DESC, seq DESC LIMIT ? OFFSET ?"
        ))
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(total).unwrap_or_default())
    }
}

fn to_nanos(at: OffsetDateTime) -> Result<i64, StoreError> {
    i64::try_from(at.unix_timestamp_nanos()).map_err(|_| StoreError::TimestampOutOfRange(at))
}

fn from_nanos(nanos: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|e| StoreError::Corrupted(format!("timestamp {nanos}: {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupted(format!("uuid {raw:?}: {e}")))
}

fn message_from_row(row: &SqliteRow) -> Result<Message, StoreError> {
    let id: String = row.try_get("id")?;
    let body: String = row.try_get("body")?;
    let author_id: String = row.try_get("author_id")?;
    let username: String = row.try_get("author_name")?;
    let created_at: i64 = row.try_get("created_at")?;
    let updated_at: Option<i64> = row.try_get("updated_at")?;

    Ok(Message {
        id: parse_uuid(&id)?,
        body,
        author: User { id: parse_uuid(&author_id)?, username },
        created_at: from_nanos(created_at)?,
        updated_at: updated_at.map(from_nanos).transpose()?,
    })
}
