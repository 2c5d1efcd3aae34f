/* Mutation handlers: applicano la scrittura sullo store e solo DOPO pubblicano l'Action.
    Se la pubblicazione fallisce la scrittura resta (nessun rollback, nessun retry):
    l'errore torna al chiamante come BusError.
    Scrittura e pubblicazione sullo stesso id avvengono sotto un lock per id, così
    l'ordine delle Action sul bus è lo stesso delle scritture sullo store.
*/
use std::sync::Arc;

use dashmap::DashMap;
use parlor_core::{
    encode, new_message_id, now_utc, Action, CreateMessageRequest, ListMessagesResponse, Message,
    User, MESSAGES_TOPIC,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    AppState,
};

/// Lock per id, creati al bisogno e rimossi quando nessuno li usa più.
#[derive(Clone, Default)]
pub struct WriteLocks {
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl WriteLocks {
    pub async fn lock(&self, id: Uuid) -> WriteGuard {
        // il clone avviene sotto il lock dello shard: remove_if non può vederlo a metà
        let lock = self.locks.entry(id).or_default().clone();
        let guard = lock.lock_owned().await;
        WriteGuard { id, locks: Arc::clone(&self.locks), guard: Some(guard) }
    }

    /// Quanti id hanno un lock in uso o in attesa.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct WriteGuard {
    id: Uuid,
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // l'unico riferimento rimasto è quello della mappa: nessuno aspetta questo id
        self.locks.remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub async fn create(state: &AppState, req: CreateMessageRequest) -> AppResult<Message> {
    let message = Message::new(
        req.id.unwrap_or_else(new_message_id),
        req.body,
        req.author.unwrap_or_else(User::placeholder),
        now_utc(),
    );
    let _write = state.write_locks.lock(message.id).await;
    state.store.insert(&message).await?;
    publish(state, Action::create(message.clone())).await?;
    Ok(message)
}

pub async fn update(state: &AppState, id: Uuid, body: String) -> AppResult<Message> {
    let _write = state.write_locks.lock(id).await;
    let message = state
        .store
        .update_body(id, &body, now_utc())
        .await?
        .ok_or(AppError::NotFound(id))?;
    publish(state, Action::update(message.clone())).await?;
    Ok(message)
}

pub async fn delete(state: &AppState, id: Uuid) -> AppResult<Message> {
    let _write = state.write_locks.lock(id).await;
    let snapshot = state.store.delete(id).await?.ok_or(AppError::NotFound(id))?;
    publish(state, Action::delete(snapshot.clone())).await?;
    Ok(snapshot)
}

pub async fn get(state: &AppState, id: Uuid) -> AppResult<Message> {
    state.store.get(id).await?.ok_or(AppError::NotFound(id))
}

/// Pagina dal più recente. Il conteggio è letto prima della pagina: con scritture
/// concorrenti `has_next` può essere leggermente in ritardo, come la snapshot stessa.
pub async fn list(state: &AppState, offset: u64, limit: u32) -> AppResult<ListMessagesResponse> {
    let total = state.store.count().await?;
    let messages = state.store.list(offset, limit).await?;
    Ok(ListMessagesResponse { has_next: has_next(offset, limit, total), messages })
}

pub fn has_next(offset: u64, limit: u32, total: u64) -> bool {
    offset.saturating_add(u64::from(limit)) < total
}

async fn publish(state: &AppState, action: Action) -> AppResult<()> {
    let payload = encode(&action)?;
    let receivers = state.bus.publish(MESSAGES_TOPIC, &payload).await?;
    debug!(
        action = %action.action_type,
        message_id = %action.message.id,
        receivers,
        "action published"
    );
    Ok(())
}
