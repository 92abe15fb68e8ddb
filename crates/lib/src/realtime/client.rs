//! Reconnecting STOMP client owning one transport connection per session.
//!
//! `connect` spawns a connection task: open transport, CONNECT/CONNECTED handshake,
//! subscribe the session topics (plus any custom topics), then pump frames until the
//! connection fails or the client is torn down. Failures are reported as events and retried
//! after a fixed delay, forever. All inbound traffic reaches the owner as [`RealtimeEvent`]s
//! on one channel, in arrival order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::frame::{negotiate_heartbeat, Command, Frame};
use super::topics::{decode_event, RealtimeEvent, TopicKind};
use super::transport::{Connection, Connector, TransportError, WsConnector};
use crate::config::RealtimeConfig;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Transport settings for one client.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: String,
    pub reconnect_delay: Duration,
    /// Heart-beat offer (outgoing, incoming) in milliseconds; 0 disables a direction.
    pub heartbeat: (u64, u64),
    pub token: Option<String>,
}

impl ClientOptions {
    pub fn from_config(config: &RealtimeConfig, token: Option<String>) -> Self {
        Self {
            url: config.url.clone(),
            reconnect_delay: config.reconnect_delay(),
            heartbeat: (config.heartbeat_outgoing_ms, config.heartbeat_incoming_ms),
            token,
        }
    }
}

/// Where MESSAGE bodies for a subscription go.
enum Route {
    /// Decoded into a typed event on the owner's channel.
    Session(TopicKind),
    /// Raw bodies to a [`Subscription`] handle.
    Custom(mpsc::UnboundedSender<String>),
}

struct SubscriptionEntry {
    id: String,
    route: Route,
    active: Arc<AtomicBool>,
}

struct Shared {
    subscriptions: HashMap<String, SubscriptionEntry>,
    /// Frames for the live connection; `None` unless connected.
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    next_id: u64,
    /// Set by teardown; the connection task must not publish anything afterwards.
    closed: bool,
}

impl Shared {
    fn new(session_id: Option<&str>) -> Self {
        let mut shared = Self {
            subscriptions: HashMap::new(),
            outbound: None,
            next_id: 0,
            closed: false,
        };
        if let Some(sid) = session_id {
            for kind in TopicKind::ALL {
                let id = shared.next_subscription_id();
                shared.subscriptions.insert(
                    kind.topic(sid),
                    SubscriptionEntry {
                        id,
                        route: Route::Session(kind),
                        active: Arc::new(AtomicBool::new(false)),
                    },
                );
            }
        }
        shared
    }

    fn next_subscription_id(&mut self) -> String {
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn mark_all(&self, active: bool) {
        for entry in self.subscriptions.values() {
            entry.active.store(active, Ordering::SeqCst);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for a custom topic subscription. Bodies arrive raw (undecoded).
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    id: String,
    active: Arc<AtomicBool>,
    bodies: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// True while the broker subscription is live (false after unsubscribe, disconnect,
    /// or while reconnecting).
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Next message body; `None` once the topic has been unsubscribed or the client torn down.
    pub async fn recv(&mut self) -> Option<String> {
        self.bodies.recv().await
    }
}

/// One reconnecting realtime connection. Dropping the client tears it down.
pub struct RealtimeClient {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    shared: Arc<Mutex<Shared>>,
    shutdown: Option<watch::Sender<bool>>,
    session_id: Option<String>,
}

impl RealtimeClient {
    pub fn new(options: ClientOptions) -> Self {
        Self::with_connector(options, Arc::new(WsConnector))
    }

    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            options,
            connector,
            state_tx: Arc::new(state_tx),
            state_rx,
            shared: Arc::new(Mutex::new(Shared::new(None))),
            shutdown: None,
            session_id: None,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Resolves once the client is connected (immediately if it already is).
    /// Returns false if the client was dropped first.
    pub async fn connected(&self) -> bool {
        let mut rx = self.state_rx.clone();
        let ready = rx.wait_for(|s| *s == ConnectionState::Connected).await.is_ok();
        ready
    }

    /// Start connecting for `session_id` and return the event stream. Any previous connection
    /// is torn down first. Must be called within a tokio runtime.
    pub fn connect(&mut self, session_id: &str) -> mpsc::UnboundedReceiver<RealtimeEvent> {
        self.disconnect();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Mutex::new(Shared::new(Some(session_id))));
        self.shared = shared.clone();
        self.shutdown = Some(shutdown_tx);
        self.session_id = Some(session_id.to_string());
        self.state_tx.send_replace(ConnectionState::Connecting);
        log::info!("realtime connecting to {} for session {}", self.options.url, session_id);

        let task = ConnectionTask {
            options: self.options.clone(),
            connector: self.connector.clone(),
            shared,
            events: events_tx,
            state: self.state_tx.clone(),
        };
        tokio::spawn(task.run(shutdown_rx));
        events_rx
    }

    /// Subscribe to an arbitrary topic. Returns `None` unless connected, and for the session
    /// topics, which stay routed to the event stream.
    /// Subscribing to a custom topic that is already subscribed replaces the earlier subscription.
    pub fn subscribe(&self, topic: &str) -> Option<Subscription> {
        if !self.is_connected() {
            log::warn!("cannot subscribe to {}: realtime client not connected", topic);
            return None;
        }
        let mut g = lock(&self.shared);
        let Some(outbound) = g.outbound.clone() else {
            log::warn!("cannot subscribe to {}: realtime client not connected", topic);
            return None;
        };
        if matches!(
            g.subscriptions.get(topic),
            Some(SubscriptionEntry {
                route: Route::Session(_),
                ..
            })
        ) {
            log::warn!("cannot subscribe to {}: session topic is already delivered as events", topic);
            return None;
        }
        if let Some(old) = g.subscriptions.remove(topic) {
            old.active.store(false, Ordering::SeqCst);
            let _ = outbound.send(Frame::unsubscribe(&old.id));
        }
        let id = g.next_subscription_id();
        let (tx, rx) = mpsc::unbounded_channel();
        let active = Arc::new(AtomicBool::new(true));
        g.subscriptions.insert(
            topic.to_string(),
            SubscriptionEntry {
                id: id.clone(),
                route: Route::Custom(tx),
                active: active.clone(),
            },
        );
        let _ = outbound.send(Frame::subscribe(&id, topic));
        log::debug!("subscribed {} as {}", topic, id);
        Some(Subscription {
            topic: topic.to_string(),
            id,
            active,
            bodies: rx,
        })
    }

    /// Stop receiving `topic`. No-op if not subscribed.
    pub fn unsubscribe(&self, topic: &str) {
        let mut g = lock(&self.shared);
        let Some(entry) = g.subscriptions.remove(topic) else {
            return;
        };
        entry.active.store(false, Ordering::SeqCst);
        if let Some(outbound) = &g.outbound {
            let _ = outbound.send(Frame::unsubscribe(&entry.id));
        }
        log::debug!("unsubscribed {}", topic);
    }

    /// Unsubscribe everything, close the transport and cancel any pending reconnect.
    /// Safe to call any number of times.
    pub fn disconnect(&mut self) {
        let Some(shutdown) = self.shutdown.take() else {
            return;
        };
        {
            let mut g = lock(&self.shared);
            g.closed = true;
            let outbound = g.outbound.take();
            for (_, entry) in g.subscriptions.drain() {
                entry.active.store(false, Ordering::SeqCst);
                if let Some(o) = &outbound {
                    let _ = o.send(Frame::unsubscribe(&entry.id));
                }
            }
            if let Some(o) = outbound {
                let _ = o.send(Frame::disconnect());
            }
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
        let _ = shutdown.send(true);
        log::info!("realtime disconnected");
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// State owned by the spawned connection loop.
struct ConnectionTask {
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<RealtimeEvent>,
    state: Arc<watch::Sender<ConnectionState>>,
}

enum SessionEnd {
    Shutdown,
    Failed { error: TransportError, was_connected: bool },
}

impl ConnectionTask {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_session(&mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Failed {
                    error,
                    was_connected,
                } => {
                    if !self.set_state(ConnectionState::Connecting) {
                        break;
                    }
                    log::warn!(
                        "realtime connection failed: {}; retrying in {:?}",
                        error,
                        self.options.reconnect_delay
                    );
                    self.emit(match error {
                        TransportError::Broker(message) => RealtimeEvent::BrokerError(message),
                        other => RealtimeEvent::TransportError(other.to_string()),
                    });
                    if was_connected {
                        self.emit(RealtimeEvent::Disconnected);
                    }
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.options.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        log::debug!("realtime connection task finished");
    }

    /// Publish a state change unless the client has been torn down. Returns false when closed.
    fn set_state(&self, state: ConnectionState) -> bool {
        let mut g = lock(&self.shared);
        if g.closed {
            return false;
        }
        if state != ConnectionState::Connected {
            g.outbound = None;
            g.mark_all(false);
        }
        self.state.send_replace(state);
        true
    }

    fn emit(&self, event: RealtimeEvent) {
        if self.events.send(event).is_err() {
            log::debug!("realtime event receiver dropped");
        }
    }

    async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let fail = |error| SessionEnd::Failed {
            error,
            was_connected: false,
        };

        let connect = self.connector.connect(&self.options.url);
        let mut conn = tokio::select! {
            r = connect => match r {
                Ok(conn) => conn,
                Err(e) => return fail(e),
            },
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        };

        let host = reqwest::Url::parse(&self.options.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());
        let connect_frame =
            Frame::connect(&host, self.options.heartbeat, self.options.token.as_deref());
        if let Err(e) = conn.send_text(connect_frame.encode()).await {
            return fail(e);
        }

        let handshake = tokio::select! {
            r = tokio::time::timeout(HANDSHAKE_TIMEOUT, await_connected(&mut conn)) => match r {
                Ok(r) => r,
                Err(_) => Err(TransportError::Handshake("timed out waiting for CONNECTED".to_string())),
            },
            _ = shutdown.changed() => {
                conn.close().await;
                return SessionEnd::Shutdown;
            }
        };
        let connected = match handshake {
            Ok(frame) => frame,
            Err(e) => {
                conn.close().await;
                return fail(e);
            }
        };
        let (outgoing, incoming) =
            negotiate_heartbeat(self.options.heartbeat, connected.get("heart-beat"));
        log::debug!(
            "stomp connected (version {:?}, heart-beat out {:?} in {:?})",
            connected.get("version"),
            outgoing,
            incoming
        );

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();
        let subscribe_frames = {
            let mut g = lock(&self.shared);
            if g.closed {
                None
            } else {
                g.outbound = Some(outbound_tx);
                let frames: Vec<Frame> = g
                    .subscriptions
                    .iter()
                    .map(|(topic, entry)| Frame::subscribe(&entry.id, topic))
                    .collect();
                g.mark_all(true);
                self.state.send_replace(ConnectionState::Connected);
                Some(frames)
            }
        };
        let Some(subscribe_frames) = subscribe_frames else {
            conn.close().await;
            return SessionEnd::Shutdown;
        };
        for frame in subscribe_frames {
            if let Err(e) = conn.send_text(frame.encode()).await {
                return SessionEnd::Failed {
                    error: e,
                    was_connected: true,
                };
            }
        }
        log::info!("realtime connected to {}", self.options.url);
        self.emit(RealtimeEvent::Connected);

        let mut beat = tokio::time::interval(outgoing.unwrap_or(Duration::from_secs(3600)));
        beat.tick().await;
        let mut last_inbound = Instant::now();
        let silence_limit = incoming.unwrap_or(Duration::from_secs(3600));

        let error = loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    while let Ok(frame) = outbound_rx.try_recv() {
                        if conn.send_text(frame.encode()).await.is_err() {
                            break;
                        }
                    }
                    conn.close().await;
                    return SessionEnd::Shutdown;
                }
                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = conn.send_text(frame.encode()).await {
                        break e;
                    }
                }
                msg = conn.next_text() => match msg {
                    Some(Ok(text)) => {
                        last_inbound = Instant::now();
                        if let Err(e) = self.handle_inbound(&text) {
                            break e;
                        }
                    }
                    Some(Err(e)) => break e,
                    None => break TransportError::Closed,
                },
                _ = beat.tick(), if outgoing.is_some() => {
                    if let Err(e) = conn.send_text("\n".to_string()).await {
                        break e;
                    }
                }
                _ = tokio::time::sleep_until(last_inbound + silence_limit), if incoming.is_some() => {
                    break TransportError::HeartbeatTimeout(silence_limit);
                }
            }
        };
        conn.close().await;
        SessionEnd::Failed {
            error,
            was_connected: true,
        }
    }

    /// Route one inbound text message. Only a broker ERROR frame ends the connection;
    /// malformed frames and payloads are dropped.
    fn handle_inbound(&self, text: &str) -> Result<(), TransportError> {
        let frame = match Frame::decode(text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                log::warn!("dropping malformed stomp frame: {}", e);
                return Ok(());
            }
        };
        match frame.command {
            Command::Message => self.dispatch(frame),
            Command::Error => {
                let message = frame
                    .get("message")
                    .filter(|m| !m.is_empty())
                    .unwrap_or("WebSocket error")
                    .to_string();
                log::error!("stomp error frame: {} {}", message, frame.body);
                return Err(TransportError::Broker(message));
            }
            Command::Receipt => log::debug!("stomp receipt {:?}", frame.get("receipt-id")),
            other => log::debug!("ignoring unexpected {} frame", other),
        }
        Ok(())
    }

    fn dispatch(&self, frame: Frame) {
        enum Target {
            Session(TopicKind),
            Custom(mpsc::UnboundedSender<String>),
        }
        let target = {
            let g = lock(&self.shared);
            let by_id = frame.get("subscription").and_then(|id| {
                g.subscriptions
                    .iter()
                    .find(|(_, e)| e.id == id)
                    .map(|(_, e)| e)
            });
            let entry = by_id.or_else(|| {
                frame
                    .get("destination")
                    .and_then(|d| g.subscriptions.get(d))
            });
            entry.map(|e| match &e.route {
                Route::Session(kind) => Target::Session(*kind),
                Route::Custom(tx) => Target::Custom(tx.clone()),
            })
        };
        match target {
            Some(Target::Session(kind)) => match decode_event(kind, &frame.body) {
                Ok(event) => self.emit(event),
                Err(e) => log::warn!(
                    "dropping malformed {} payload: {} ({})",
                    kind.segment(),
                    e,
                    frame.body
                ),
            },
            Some(Target::Custom(tx)) => {
                if tx.send(frame.body).is_err() {
                    log::debug!("subscription receiver dropped");
                }
            }
            None => log::debug!(
                "dropping message for unknown subscription {:?}",
                frame.get("subscription")
            ),
        }
    }
}

/// Read until CONNECTED; an ERROR frame or closed connection fails the handshake.
async fn await_connected(conn: &mut Box<dyn Connection>) -> Result<Frame, TransportError> {
    loop {
        let text = match conn.next_text().await {
            Some(r) => r?,
            None => return Err(TransportError::Closed),
        };
        match Frame::decode(&text) {
            Ok(Some(frame)) if frame.command == Command::Connected => return Ok(frame),
            Ok(Some(frame)) if frame.command == Command::Error => {
                let message = frame.get("message").unwrap_or("connect rejected");
                return Err(TransportError::Handshake(message.to_string()));
            }
            Ok(_) => {}
            Err(e) => log::warn!("ignoring malformed frame during handshake: {}", e),
        }
    }
}
