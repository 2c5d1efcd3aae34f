/* Relay: una sessione per ogni client WebSocket connesso.
    Ogni sessione ha la sua Subscription privata al topic "messages" e un loop select!
    che aspetta in parallelo: il prossimo payload dal bus, attività del client (letture,
    close, errori) e lo shutdown del server. Nessun registro globale delle connessioni:
    la consegna passa solo dal bus.

    Stati: Connecting -> Open -> Closing -> Closed. Closed è terminale e close() è idempotente.
*/
use std::fmt;

use axum::extract::ws::{close_code, CloseFrame, Message as WsMessage};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parlor_core::{decode, encode_text, MESSAGES_TOPIC};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::bus::{BusError, EventBus, Subscription};

/// La sottoscrizione non è riuscita: la connessione non arriva mai in `Open`.
#[derive(Debug, Error)]
#[error("cannot open relay session: {0}")]
pub struct ConnectionError(#[from] BusError);

/// Errore di lettura/scrittura sul client a sessione aperta. Chiude solo quella sessione.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("read from client failed: {0}")]
    Read(String),

    #[error("write to client failed: {0}")]
    Write(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Perché una sessione è uscita da `Open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Close frame dal client o fine dello stream.
    ClientClosed,
    Transport(TransportError),
    /// Il bus ha chiuso la sottoscrizione (es. connessione Redis persa).
    SubscriptionEnded,
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientClosed => f.write_str("client closed"),
            CloseReason::Transport(e) => write!(f, "{e}"),
            CloseReason::SubscriptionEnded => f.write_str("subscription ended"),
            CloseReason::Shutdown => f.write_str("server shutdown"),
        }
    }
}

/// Stato di una singola sessione. Appartiene al task che serve quel client.
pub struct Connection<T> {
    id: Uuid,
    transport: Option<T>,
    subscription: Option<Subscription>,
    state: ConnectionState,
    close_reason: Option<CloseReason>,
}

impl<T, E> Connection<T>
where
    T: Stream<Item = Result<WsMessage, E>> + Sink<WsMessage, Error = E> + Unpin,
    E: fmt::Display,
{
    /// L'handshake HTTP è già fatto dal framework: qui si crea la sottoscrizione.
    /// Se fallisce mandiamo un close frame (best-effort) e il transport viene scartato.
    pub async fn accept(mut transport: T, bus: &EventBus) -> Result<Self, ConnectionError> {
        let id = Uuid::new_v4();
        debug!(conn = %id, state = ?ConnectionState::Connecting, "subscribing");
        match bus.subscribe(MESSAGES_TOPIC).await {
            Ok(subscription) => Ok(Self {
                id,
                transport: Some(transport),
                subscription: Some(subscription),
                state: ConnectionState::Open,
                close_reason: None,
            }),
            Err(e) => {
                let frame = CloseFrame { code: close_code::ERROR, reason: "subscribe failed".into() };
                let _ = transport.send(WsMessage::Close(Some(frame))).await;
                Err(ConnectionError(e))
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn close_reason(&self) -> Option<&CloseReason> {
        self.close_reason.as_ref()
    }

    /// Inoltra le Action al client finché la sessione resta aperta.
    /// All'uscita lo stato è `Closing`; il chiamante deve poi invocare `close`.
    pub async fn run(&mut self, shutdown: &CancellationToken) -> CloseReason {
        if self.state != ConnectionState::Open {
            return self.close_reason.clone().unwrap_or(CloseReason::ClientClosed);
        }
        let (Some(transport), Some(subscription)) =
            (self.transport.as_mut(), self.subscription.as_mut())
        else {
            return CloseReason::ClientClosed;
        };
        let id = self.id;

        let reason = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break CloseReason::Shutdown,

                payload = subscription.recv() => {
                    let Some(payload) = payload else {
                        break CloseReason::SubscriptionEnded;
                    };
                    let action = match decode(&payload) {
                        Ok(action) => action,
                        Err(e) => {
                            // payload illeggibile: si scarta e la sessione continua
                            warn!(conn = %id, error = %e, bytes = payload.len(), "dropping malformed payload");
                            continue;
                        }
                    };
                    let frame = match encode_text(&action) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(conn = %id, error = %e, "dropping unencodable action");
                            continue;
                        }
                    };
                    if let Err(e) = transport.send(WsMessage::Text(frame)).await {
                        break CloseReason::Transport(TransportError::Write(e.to_string()));
                    }
                    debug!(conn = %id, action = %action.action_type, message_id = %action.message.id, "forwarded");
                }

                incoming = transport.next() => match incoming {
                    None | Some(Ok(WsMessage::Close(_))) => break CloseReason::ClientClosed,
                    // quello che manda il client serve solo come segnale di vita
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseReason::Transport(TransportError::Read(e.to_string())),
                },
            }
        };

        self.state = ConnectionState::Closing;
        self.close_reason = Some(reason.clone());
        reason
    }

    /// Toglie la sottoscrizione e rilascia il transport. Chiamarla due volte non fa nulla.
    pub async fn close(&mut self) {
        match self.state {
            ConnectionState::Closed => return,
            ConnectionState::Connecting | ConnectionState::Open => {
                self.state = ConnectionState::Closing;
            }
            ConnectionState::Closing => {}
        }

        if let Some(subscription) = self.subscription.take() {
            if let Err(e) = subscription.unsubscribe().await {
                warn!(conn = %self.id, error = %e, "unsubscribe failed");
            }
        }

        if let Some(mut transport) = self.transport.take() {
            if self.close_reason == Some(CloseReason::Shutdown) {
                let frame = CloseFrame { code: close_code::AWAY, reason: "server shutting down".into() };
                let _ = transport.send(WsMessage::Close(Some(frame))).await;
            }
            // il client può essere già sparito, non è un problema
            if let Err(e) = transport.close().await {
                debug!(conn = %self.id, error = %e, "transport close failed");
            }
        }

        self.state = ConnectionState::Closed;
        let reason = self.close_reason.as_ref().map(ToString::to_string).unwrap_or_default();
        info!(conn = %self.id, reason = %reason, "relay session closed");
    }
}

/// Ciclo di vita completo di una sessione: accept, run, close (sempre, anche in caso d'errore).
pub async fn serve<T, E>(transport: T, bus: EventBus, shutdown: CancellationToken)
where
    T: Stream<Item = Result<WsMessage, E>> + Sink<WsMessage, Error = E> + Unpin,
    E: fmt::Display,
{
    let mut conn = match Connection::accept(transport, &bus).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "relay session refused");
            return;
        }
    };

    let span = tracing::info_span!("relay", conn = %conn.id());
    async move {
        info!("relay session open");
        conn.run(&shutdown).await;
        conn.close().await;
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use parlor_core::{encode, Action, Message, User};
    use std::{
        pin::Pin,
        task::{Context, Poll},
        time::Duration,
    };

    /// Transport in memoria: quello che il "client" manda arriva da `incoming`,
    /// quello che il server scrive finisce in `outgoing`.
    struct ChannelTransport {
        incoming: mpsc::UnboundedReceiver<Result<WsMessage, String>>,
        outgoing: mpsc::UnboundedSender<WsMessage>,
    }

    struct Client {
        to_server: mpsc::UnboundedSender<Result<WsMessage, String>>,
        from_server: mpsc::UnboundedReceiver<WsMessage>,
    }

    fn pair() -> (ChannelTransport, Client) {
        let (to_server, incoming) = mpsc::unbounded();
        let (outgoing, from_server) = mpsc::unbounded();
        (ChannelTransport { incoming, outgoing }, Client { to_server, from_server })
    }

    impl Stream for ChannelTransport {
        type Item = Result<WsMessage, String>;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            self.incoming.poll_next_unpin(cx)
        }
    }

    impl Sink<WsMessage> for ChannelTransport {
        type Error = String;

        fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            self.outgoing.poll_ready(cx).map_err(|e| e.to_string())
        }

        fn start_send(mut self: Pin<&mut Self>, item: WsMessage) -> Result<(), String> {
            self.outgoing.start_send(item).map_err(|e| e.to_string())
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            Poll::Ready(Ok(()))
        }

        fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
            self.outgoing.close_channel();
            Poll::Ready(Ok(()))
        }
    }

    fn action(body: &str) -> Action {
        Action::create(Message::new(Uuid::new_v4(), body.into(), User::placeholder(), parlor_core::now_utc()))
    }

    async fn publish(bus: &EventBus, action: &Action) {
        bus.publish(MESSAGES_TOPIC, &encode(action).unwrap()).await.unwrap();
    }

    async fn next_action(client: &mut Client) -> Action {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.from_server.next())
            .await
            .expect("frame in time")
            .expect("stream open");
        match frame {
            WsMessage::Text(text) => decode(text.as_bytes()).expect("valid action"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn forwards_in_order_and_skips_malformed_payloads() {
        let bus = EventBus::local(64);
        let (transport, mut client) = pair();
        let mut conn = Connection::accept(transport, &bus).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Open);

        let shutdown = CancellationToken::new();
        let first = action("one");
        let second = action("two");
        publish(&bus, &first).await;
        bus.publish(MESSAGES_TOPIC, b"{not an action").await.unwrap();
        publish(&bus, &second).await;

        let runner = tokio::spawn(async move {
            let reason = conn.run(&shutdown).await;
            (conn, reason)
        });

        assert_eq!(next_action(&mut client).await, first);
        assert_eq!(next_action(&mut client).await, second);

        client.to_server.unbounded_send(Ok(WsMessage::Close(None))).unwrap();
        let (mut conn, reason) = runner.await.unwrap();
        assert_eq!(reason, CloseReason::ClientClosed);
        assert_eq!(conn.state(), ConnectionState::Closing);

        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        conn.close().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn client_pings_do_not_end_the_session() {
        let bus = EventBus::local(8);
        let (transport, mut client) = pair();
        let mut conn = Connection::accept(transport, &bus).await.unwrap();
        let shutdown = CancellationToken::new();

        client.to_server.unbounded_send(Ok(WsMessage::Text("ping".into()))).unwrap();
        client.to_server.unbounded_send(Ok(WsMessage::Ping(vec![1]))).unwrap();
        let runner = tokio::spawn(async move { conn.run(&shutdown).await });

        let a = action("still here");
        // lascia al loop il tempo di consumare i ping prima della pubblicazione
        tokio::time::sleep(Duration::from_millis(50)).await;
        publish(&bus, &a).await;
        assert_eq!(next_action(&mut client).await, a);

        drop(client.to_server);
        assert_eq!(runner.await.unwrap(), CloseReason::ClientClosed);
    }

    #[tokio::test]
    async fn write_failure_ends_only_this_session() {
        let bus = EventBus::local(8);
        let (broken, broken_client) = pair();
        let (healthy, mut healthy_client) = pair();
        let mut broken_conn = Connection::accept(broken, &bus).await.unwrap();
        let mut healthy_conn = Connection::accept(healthy, &bus).await.unwrap();
        let shutdown = CancellationToken::new();

        // il client "rotto" non legge più: le scritture falliscono
        drop(broken_client.from_server);
        let _keep_incoming_open = broken_client.to_server;

        let s1 = shutdown.clone();
        let broken_run = tokio::spawn(async move {
            let reason = broken_conn.run(&s1).await;
            broken_conn.close().await;
            (broken_conn.state(), reason)
        });
        let s2 = shutdown.clone();
        let healthy_run = tokio::spawn(async move { healthy_conn.run(&s2).await });

        let a = action("after failure");
        publish(&bus, &a).await;

        let (state, reason) = broken_run.await.unwrap();
        assert_eq!(state, ConnectionState::Closed);
        assert!(matches!(reason, CloseReason::Transport(TransportError::Write(_))));

        assert_eq!(next_action(&mut healthy_client).await, a);
        shutdown.cancel();
        assert_eq!(healthy_run.await.unwrap(), CloseReason::Shutdown);
    }

    #[tokio::test]
    async fn accept_fails_when_bus_is_gone() {
        let bus = EventBus::local(8);
        bus.close();
        let (transport, mut client) = pair();
        let err = Connection::accept(transport, &bus).await.err().expect("accept must fail");
        assert!(matches!(err, ConnectionError(BusError::Closed)));
        assert!(matches!(client.from_server.next().await, Some(WsMessage::Close(Some(_)))));
    }

    #[tokio::test]
    async fn shutdown_sends_going_away_and_closes() {
        let bus = EventBus::local(8);
        let (transport, mut client) = pair();
        let shutdown = CancellationToken::new();
        let session = tokio::spawn(serve(transport, bus.clone(), shutdown.clone()));

        // aspetta che la sessione sia sottoscritta prima di fermare il server
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        session.await.unwrap();

        match client.from_server.next().await {
            Some(WsMessage::Close(Some(frame))) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert!(client.from_server.next().await.is_none());
    }
}
