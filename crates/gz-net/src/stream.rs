//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Live stream connection manager with fixed-delay reconnection."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! One session task owns the transport. It walks
//! `Connecting -> Connected -> Disconnected` and, unless told to stop, waits
//! the configured delay and starts over. Failing to open and losing an open
//! connection take the same path. There is no backoff growth and no retry cap.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use gz_common::{EndpointConfig, StreamConfig};
use gz_msg::{FrameCodec, FrameStats, InboundFrame, StreamUpdate};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on waiting for a session to close its transport on disconnect.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Outward connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }

    /// Numeric encoding for gauges.
    pub fn as_gauge(&self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }

    /// State after a transport event. Errors collapse into `Disconnected`
    /// exactly like a close does.
    pub fn on_event(self, event: &TransportEvent) -> ConnectionState {
        match event {
            TransportEvent::Open => ConnectionState::Connected,
            TransportEvent::Frame(_) => self,
            TransportEvent::Closed(_) | TransportEvent::Error(_) => ConnectionState::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw events produced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Frame(String),
    /// Orderly close, with the peer's reason when it sent one.
    Closed(Option<String>),
    /// Transport failure; the detail is for logs only.
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Opens transports. Implemented for WebSockets and swapped out in tests.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<Box<dyn FrameSource>, TransportError>;
}

/// An open transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Next event. Must keep returning `Closed`/`Error` once the transport is done.
    async fn next_event(&mut self) -> TransportEvent;

    async fn close(&mut self);
}

/// Connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<Box<dyn FrameSource>, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|source| TransportError::Connect {
                url: url.to_string(),
                source,
            })?;
        Ok(Box::new(WebSocketSource { stream }))
    }
}

struct WebSocketSource {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_event(&mut self) -> TransportEvent {
        loop {
            let event = match self.stream.next().await {
                Some(Ok(Message::Text(text))) => TransportEvent::Frame(text),
                Some(Ok(Message::Binary(bytes))) => {
                    TransportEvent::Frame(String::from_utf8_lossy(&bytes).into_owned())
                }
                Some(Ok(Message::Close(frame))) => {
                    TransportEvent::Closed(frame.map(|frame| frame.reason.into_owned()))
                }
                // ping/pong are answered by tungstenite itself
                Some(Ok(_)) => continue,
                Some(Err(err)) => TransportEvent::Error(err.to_string()),
                None => TransportEvent::Closed(None),
            };
            return event;
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(error = %err, "websocket close handshake failed");
        }
    }
}

/// What the consumer receives from the manager, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    State(ConnectionState),
    Update(StreamUpdate),
    /// A frame was dropped by the codec.
    Rejected { reason: &'static str },
    Unrecognized { kind: String },
}

struct Shared {
    codec: FrameCodec,
    state: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<StreamEvent>,
    attempts: AtomicU64,
}

impl Shared {
    /// Returns false once the consumer has gone away.
    fn transition(&self, next: ConnectionState) -> bool {
        let previous = self.state.send_replace(next);
        if previous == next {
            return true;
        }
        debug!(from = %previous, to = %next, "connection state changed");
        self.events.send(StreamEvent::State(next)).is_ok()
    }

    fn dispatch(&self, raw: &str) -> bool {
        let event = match self.codec.decode(raw) {
            Ok(InboundFrame::Update(update)) => StreamEvent::Update(update),
            Ok(InboundFrame::Unrecognized { kind }) => StreamEvent::Unrecognized { kind },
            Err(err) => StreamEvent::Rejected { reason: err.kind() },
        };
        self.events.send(event).is_ok()
    }
}

struct Session {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the stream session and its reconnect timer.
pub struct ConnectionManager {
    endpoint: Url,
    reconnect_delay: Duration,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    session: Option<Session>,
}

impl ConnectionManager {
    pub fn new(
        endpoint: Url,
        reconnect_delay: Duration,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<StreamEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let manager = Self {
            endpoint,
            reconnect_delay,
            connector,
            shared: Arc::new(Shared {
                codec: FrameCodec::new(),
                state,
                events,
                attempts: AtomicU64::new(0),
            }),
            session: None,
        };
        (manager, receiver)
    }

    /// Manager for the configured WebSocket endpoint.
    pub fn websocket(
        endpoint: &EndpointConfig,
        stream: &StreamConfig,
    ) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<StreamEvent>)> {
        let url = endpoint.stream_url()?;
        Ok(Self::new(
            url,
            stream.reconnect_delay,
            Arc::new(WebSocketConnector),
        ))
    }

    /// Start the session. Does nothing while one is already running.
    pub fn connect(&mut self) {
        if self
            .session
            .as_ref()
            .is_some_and(|session| !session.task.is_finished())
        {
            return;
        }
        let (shutdown, shutdown_rx) = watch::channel(false);
        info!(endpoint = %self.endpoint, delay_ms = self.reconnect_delay.as_millis() as u64, "starting stream session");
        let task = tokio::spawn(run_session(
            self.endpoint.clone(),
            self.reconnect_delay,
            Arc::clone(&self.connector),
            Arc::clone(&self.shared),
            shutdown_rx,
        ));
        self.session = Some(Session { shutdown, task });
    }

    /// Stop the session: any pending reconnect is cancelled and the open
    /// transport is closed before this returns.
    pub async fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.shutdown.send(true);
            let mut task = session.task;
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!(endpoint = %self.endpoint, "stream session did not stop in time; aborting");
                task.abort();
            }
            info!(endpoint = %self.endpoint, "stream session stopped");
        }
        self.shared.transition(ConnectionState::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.shared.codec.stats()
    }

    /// Connection attempts made so far, including the first.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Relaxed)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.shutdown.send(true);
            session.task.abort();
        }
    }
}

async fn run_session(
    endpoint: Url,
    reconnect_delay: Duration,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let attempt = shared.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        if !shared.transition(ConnectionState::Connecting) {
            return;
        }

        let opened = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            opened = connector.open(&endpoint) => opened,
        };

        match opened {
            Ok(mut source) => {
                let mut state = ConnectionState::Connecting.on_event(&TransportEvent::Open);
                info!(endpoint = %endpoint, attempt, "stream connected");
                if !shared.transition(state) {
                    source.close().await;
                    return;
                }
                let reason = loop {
                    let event = tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            source.close().await;
                            return;
                        }
                        event = source.next_event() => event,
                    };
                    state = state.on_event(&event);
                    match event {
                        TransportEvent::Frame(raw) => {
                            if !shared.dispatch(&raw) {
                                source.close().await;
                                return;
                            }
                        }
                        TransportEvent::Open => {}
                        TransportEvent::Closed(reason) => {
                            break reason.unwrap_or_else(|| "closed by peer".to_owned())
                        }
                        TransportEvent::Error(detail) => break detail,
                    }
                };
                debug_assert_eq!(state, ConnectionState::Disconnected);
                warn!(endpoint = %endpoint, attempt, reason = %reason, "stream disconnected");
            }
            Err(err) => {
                warn!(endpoint = %endpoint, attempt, error = %err, "stream connection failed");
            }
        }

        if !shared.transition(ConnectionState::Disconnected) {
            return;
        }
        debug!(delay_ms = reconnect_delay.as_millis() as u64, "reconnect scheduled");
        tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
}
