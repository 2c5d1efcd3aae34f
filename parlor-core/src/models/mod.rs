pub mod user;
pub mod message;
pub mod action;

// Re-export per comodità
pub use user::User;
pub use message::Message;
pub use action::{Action, ActionType};
