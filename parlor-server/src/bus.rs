/* Event bus: publish/subscribe su un topic con nome fisso.
    Due backend:
    - Redis pub/sub (produzione), una connessione pub/sub dedicata per ogni sottoscrizione
      e una connessione multiplexed condivisa per pubblicare;
    - bus locale in-process (sviluppo e test) basato su tokio::sync::broadcast.
    In entrambi i casi ogni Subscription legge da un broadcast::Receiver di capacità limitata:
    un client lento perde i payload più vecchi invece di far crescere la memoria.
*/
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use dashmap::DashMap;
use futures_util::StreamExt;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Payload così come arriva dal bus.
pub type Payload = Arc<[u8]>;

/// Prefisso del DSN che seleziona il bus in-process.
pub const LOCAL_DSN: &str = "memory://";

/// Limite massimo del buffer per subscriber: broadcast alloca tutto il buffer subito.
pub const MAX_CAPACITY: usize = 1 << 20;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("event bus is closed")]
    Closed,
}

/// Bus condiviso da handler e sessioni. Clonarlo è economico.
#[derive(Clone)]
pub enum EventBus {
    Redis(RedisBus),
    Local(LocalBus),
}

impl EventBus {
    /// Sceglie il backend dal DSN: `memory://` per il bus locale, altrimenti Redis.
    pub async fn connect(dsn: &str, capacity: usize) -> Result<Self, BusError> {
        if dsn.starts_with(LOCAL_DSN) {
            Ok(EventBus::local(capacity))
        } else {
            Ok(EventBus::Redis(RedisBus::connect(dsn, capacity).await?))
        }
    }

    pub fn local(capacity: usize) -> Self {
        EventBus::Local(LocalBus::new(capacity))
    }

    /// Pubblica un payload. Ritorna quanti subscriber lo hanno ricevuto (0 non è un errore).
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, BusError> {
        match self {
            EventBus::Redis(bus) => bus.publish(topic, payload).await,
            EventBus::Local(bus) => bus.publish(topic, payload),
        }
    }

    /// Crea una sottoscrizione nuova e privata al topic.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        match self {
            EventBus::Redis(bus) => bus.subscribe(topic).await,
            EventBus::Local(bus) => bus.subscribe(topic),
        }
    }

    /// Quanti subscriber ha in questo momento il topic (PUBSUB NUMSUB per Redis).
    pub async fn subscriber_count(&self, topic: &str) -> Result<usize, BusError> {
        match self {
            EventBus::Redis(bus) => bus.subscriber_count(topic).await,
            EventBus::Local(bus) => Ok(bus.subscriber_count(topic)),
        }
    }

    pub async fn ping(&self) -> Result<(), BusError> {
        match self {
            EventBus::Redis(bus) => bus.ping().await,
            EventBus::Local(bus) if bus.is_closed() => Err(BusError::Closed),
            EventBus::Local(_) => Ok(()),
        }
    }

    /// Rilascia le risorse del bus. Va chiamato dopo aver chiuso tutte le sessioni.
    pub fn close(&self) {
        if let EventBus::Local(bus) = self {
            bus.close();
        }
    }
}

#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    publisher: redis::aio::MultiplexedConnection,
    capacity: usize,
}

impl RedisBus {
    pub async fn connect(dsn: &str, capacity: usize) -> Result<Self, BusError> {
        let client = redis::Client::open(dsn)?;
        let publisher = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, publisher, capacity: capacity.clamp(1, MAX_CAPACITY) })
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, BusError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(topic, payload).await?;
        Ok(usize::try_from(receivers).unwrap_or_default())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;

        let (tx, receiver) = broadcast::channel(self.capacity);
        let (stop, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(pump(pubsub, topic.to_string(), tx, stop_rx));

        Ok(Subscription {
            topic: topic.to_string(),
            receiver,
            pump: Some(Pump { stop, handle }),
        })
    }

    async fn subscriber_count(&self, topic: &str) -> Result<usize, BusError> {
        let mut conn = self.publisher.clone();
        let (_, count): (String, i64) =
            redis::cmd("PUBSUB").arg("NUMSUB").arg(topic).query_async(&mut conn).await?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), BusError> {
        let mut conn = self.publisher.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

// Travasa i messaggi della connessione pub/sub nel buffer limitato della Subscription.
async fn pump(
    mut pubsub: redis::aio::PubSub,
    topic: String,
    tx: broadcast::Sender<Payload>,
    mut stop: oneshot::Receiver<()>,
) -> Result<(), BusError> {
    loop {
        tokio::select! {
            // Ok: unsubscribe esplicito; Err: la Subscription è stata droppata
            _ = &mut stop => break,
            msg = async { pubsub.on_message().next().await } => match msg {
                Some(msg) => {
                    if tx.send(Payload::from(msg.get_payload_bytes())).is_err() {
                        break;
                    }
                }
                None => {
                    warn!(topic = %topic, "redis pub/sub stream ended");
                    return Ok(());
                }
            }
        }
    }
    pubsub.unsubscribe(&topic).await?;
    Ok(())
}

struct Pump {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), BusError>>,
}

/// Bus in-process: un broadcast::Sender per topic.
#[derive(Clone)]
pub struct LocalBus {
    topics: Arc<DashMap<String, broadcast::Sender<Payload>>>,
    capacity: usize,
    closed: Arc<AtomicBool>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            capacity: capacity.clamp(1, MAX_CAPACITY),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn sender(&self, topic: &str) -> Result<broadcast::Sender<Payload>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let sender = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(sender.clone())
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<usize, BusError> {
        let sender = self.sender(topic)?;
        // send fallisce solo se non c'è nessun subscriber: at most once, nessun errore
        Ok(sender.send(Payload::from(payload)).unwrap_or(0))
    }

    fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let receiver = self.sender(topic)?.subscribe();
        Ok(Subscription { topic: topic.to_string(), receiver, pump: None })
    }

    fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.receiver_count()).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // droppare i sender chiude tutti i receiver ancora aperti
        self.topics.clear();
    }
}

/// Sottoscrizione privata di una singola connessione. Non va condivisa tra sessioni.
pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<Payload>,
    pump: Option<Pump>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Prossimo payload in ordine di pubblicazione; `None` quando la sottoscrizione è finita.
    /// Cancel-safe: si può usare dentro `tokio::select!`.
    pub async fn recv(&mut self) -> Option<Payload> {
        loop {
            match self.receiver.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "slow subscriber, oldest payloads dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub async fn unsubscribe(self) -> Result<(), BusError> {
        let Subscription { topic, receiver, pump } = self;
        drop(receiver);
        if let Some(Pump { stop, handle }) = pump {
            // il pump può essere già terminato da solo, in quel caso stop non ha destinatario
            let _ = stop.send(());
            match handle.await {
                Ok(result) => result?,
                Err(e) => warn!(topic = %topic, error = %e, "redis pump task failed"),
            }
        }
        debug!(topic = %topic, "unsubscribed");
        Ok(())
    }
}
