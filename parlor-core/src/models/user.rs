use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::placeholder_username;

/// Autore di un messaggio. Non c'è autenticazione: è un'identità segnaposto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub username: String,
}

impl User {
    /// Utente generato al volo per i messaggi che arrivano senza autore.
    pub fn placeholder() -> Self {
        Self { id: Uuid::new_v4(), username: placeholder_username() }
    }
}
