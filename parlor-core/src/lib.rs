//! parlor-core: tipi condivisi tra client e server (modelli, DTO HTTP, codec delle Action, errori).
//! Niente I/O: il crate resta usabile anche da un client WASM.

pub mod models;
pub mod protocol;
pub mod error;
pub mod utils;

/// Nome del topic su cui viaggiano tutte le Action.
pub const MESSAGES_TOPIC: &str = "messages";

// Re-export utili per ridurre i percorsi nei crate client/server
pub use error::Error;
pub use models::{action::Action, action::ActionType, message::Message, user::User};
pub use protocol::codec::{decode, encode, encode_text, DecodeError, EncodeError};
pub use protocol::http::{
    CreateMessageRequest, ListMessagesQuery, ListMessagesResponse, UpdateMessageRequest,
};
pub use utils::{new_message_id, now_utc, placeholder_username};
