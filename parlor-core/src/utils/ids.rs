use uuid::Uuid;

/// Genera un nuovo id di messaggio (UUIDv4).
pub fn new_message_id() -> Uuid {
    Uuid::new_v4()
}

/// Username segnaposto del tipo "User-1a2b3c4d", finché non esiste un vero login.
pub fn placeholder_username() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("User-{}", &id[..8])
}
