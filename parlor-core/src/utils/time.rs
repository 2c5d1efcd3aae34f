use time::OffsetDateTime;

/// Istante corrente in UTC. Usato per `created_at` / `updated_at` assegnati dal server.
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
