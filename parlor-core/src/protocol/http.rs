use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, User};
/*
    http dto for http requests
*/
// Create message: solo `body` è obbligatorio, id e autore vengono generati se assenti
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, alias = "user", skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
}

// Update message (PATCH): si può cambiare solo il body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageRequest {
    pub body: String,
}

// List messages: offset come query param, la dimensione pagina la decide il server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub offset: u64,
}

/// Pagina di messaggi, dal più recente. `has_next` resta snake_case: è il contratto storico della lista.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMessagesResponse {
    #[serde(alias = "hasNext")]
    pub has_next: bool,
    pub messages: Vec<Message>,
}
