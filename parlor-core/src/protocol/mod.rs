pub mod codec;
pub mod http;

// Re-export comodi
pub use codec::{decode, encode, encode_text, DecodeError, EncodeError};
pub use http::{CreateMessageRequest, ListMessagesQuery, ListMessagesResponse, UpdateMessageRequest};
