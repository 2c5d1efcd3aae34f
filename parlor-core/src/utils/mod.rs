pub mod ids;
pub mod time;

pub use self::ids::{new_message_id, placeholder_username};
pub use self::time::now_utc;
