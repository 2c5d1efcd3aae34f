use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::User;

/// Messaggio persistito dal server e notificato via WS dentro una `Action`.
///
/// Sul wire i campi sono camelCase; in lettura accettiamo anche i nomi snake_case
/// e i vecchi alias `publicatedAt` / `user` usati dai primi client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub body: String,
    #[serde(alias = "user")]
    pub author: User,
    #[serde(alias = "created_at", alias = "publicatedAt", with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, alias = "updated_at", with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Message {
    /// Nuovo messaggio non ancora modificato. `created_at` lo decide il chiamante (il server).
    pub fn new(id: Uuid, body: String, author: User, created_at: OffsetDateTime) -> Self {
        Self { id, body, author, created_at, updated_at: None }
    }
}
