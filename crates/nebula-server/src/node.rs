//! A protocol node: accepts (or opens) TCP connections, ticks every
//! connection at the configured rate, and reacts to their events.
//!
//! All connections publish into one [`ChannelSink`]; the node's run loop
//! drains it between ticks, the way a game thread drains network events once
//! per frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nebula_config::{Config, NetworkConfig};
use nebula_protocol::{
    ChannelSink, ConnectionHandler, ConnectionId, EventSink, FrameConfig, IdGenerator,
    NetworkEvent, Packet, ProtocolConfig, TcpTransport, Transport, completion, drive,
};
use tokio::io::AsyncBufReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::message::GameMessage;

/// Reason given to a player turned away at the connection limit.
pub const SERVER_FULL_REASON: &str = "Server full";

/// Reason given to every player when the node stops.
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// How long a disconnect notice may take to write before the close proceeds.
const NOTICE_GRACE: Duration = Duration::from_secs(1);

/// Shared handle to one connection.
pub type Handler = Arc<ConnectionHandler<GameMessage>>;

/// Receiving end of the node's event sink.
pub type Events = mpsc::UnboundedReceiver<NetworkEvent<GameMessage>>;

/// Error returned when the connection map is at capacity.
#[derive(Debug)]
pub struct ConnectionLimitReached;

struct Peer {
    handler: Handler,
    name: Option<String>,
}

/// Thread-safe map of live connections keyed by [`ConnectionId`].
pub struct ConnectionMap {
    inner: RwLock<HashMap<ConnectionId, Peer>>,
    max_connections: usize,
}

impl ConnectionMap {
    /// Create a new map with the given capacity limit.
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Insert a connection. Returns `Err` if the map is at capacity.
    pub async fn insert(&self, handler: Handler) -> Result<(), ConnectionLimitReached> {
        let mut map = self.inner.write().await;
        if map.len() >= self.max_connections {
            return Err(ConnectionLimitReached);
        }
        map.insert(handler.id(), Peer {
            handler,
            name: None,
        });
        Ok(())
    }

    /// Remove a connection by ID.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Handler> {
        self.inner.write().await.remove(id).map(|peer| peer.handler)
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Record the display name a player announced.
    pub async fn set_name(&self, id: &ConnectionId, name: &str) {
        if let Some(peer) = self.inner.write().await.get_mut(id) {
            peer.name = Some(name.to_string());
        }
    }

    /// Display name of `id`, if it has said hello.
    pub async fn name(&self, id: &ConnectionId) -> Option<String> {
        self.inner.read().await.get(id).and_then(|peer| peer.name.clone())
    }

    /// Snapshot of every registered handler.
    pub async fn handlers(&self) -> Vec<Handler> {
        self.inner
            .read()
            .await
            .values()
            .map(|peer| Arc::clone(&peer.handler))
            .collect()
    }

    /// Return the number of active connections.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Return whether the map is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

/// Protocol settings derived from the node's network config.
pub fn protocol_config(network: &NetworkConfig) -> ProtocolConfig {
    ProtocolConfig {
        heartbeat_window_ticks: network.heartbeat_window_ticks,
        read_timeout: network.read_timeout(),
        frame: FrameConfig {
            max_payload_size: network.max_payload_size,
        },
        ..ProtocolConfig::default()
    }
}

/// Send a disconnect notice, give it a moment to reach the wire, then close.
pub async fn disconnect_gracefully(handler: Handler, reason: &'static str) {
    let (callback, written) = completion();
    if handler.send_now(Packet::disconnect(reason), Some(callback)).is_ok() {
        let _ = tokio::time::timeout(NOTICE_GRACE, written).await;
    }
    handler.close(reason).await;
}

async fn stopped(shutdown_rx: &mut watch::Receiver<bool>) {
    while !*shutdown_rx.borrow_and_update() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }
}

/// A running server or client node.
pub struct Node {
    network: NetworkConfig,
    protocol: ProtocolConfig,
    log_packets: bool,
    connections: ConnectionMap,
    id_gen: IdGenerator,
    sink: Arc<dyn EventSink<GameMessage>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Node {
    /// Create a node and the receiver its run loop drains.
    pub fn new(config: &Config) -> (Arc<Self>, Events) {
        let (sink, events) = ChannelSink::<GameMessage>::new();
        let (shutdown_tx, _) = watch::channel(false);
        let node = Arc::new(Self {
            network: config.network.clone(),
            protocol: protocol_config(&config.network),
            log_packets: config.debug.log_packets,
            connections: ConnectionMap::new(config.network.max_connections),
            id_gen: IdGenerator::new(),
            sink: Arc::new(sink),
            shutdown_tx,
        });
        (node, events)
    }

    /// Live connections.
    pub fn connections(&self) -> &ConnectionMap {
        &self.connections
    }

    /// Ask the run loop to close every connection and return.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Listen or connect according to the config, then run until shutdown.
    pub async fn run(self: &Arc<Self>, events: Events) -> std::io::Result<()> {
        if self.network.listen {
            let listener = TcpListener::bind(self.network.endpoint()).await?;
            tracing::info!("Server listening on {}", listener.local_addr()?);
            self.run_with_listener(listener, events).await
        } else {
            let handler = self.connect(&format!("player-{}", std::process::id())).await?;
            self.spawn_console(handler);
            self.run_loop(events).await;
            Ok(())
        }
    }

    /// Run the accept loop with a pre-bound listener (useful for tests).
    pub async fn run_with_listener(
        self: &Arc<Self>,
        listener: TcpListener,
        events: Events,
    ) -> std::io::Result<()> {
        let node = Arc::clone(self);
        let accept = tokio::spawn(async move { node.accept_loop(listener).await });
        self.run_loop(events).await;
        accept.abort();
        Ok(())
    }

    /// Open a connection to the configured server and say hello.
    pub async fn connect(&self, name: &str) -> std::io::Result<Handler> {
        let endpoint = self.network.endpoint();
        let (transport, inbound) =
            TcpTransport::<GameMessage>::connect(endpoint.as_str(), &self.protocol).await?;
        let handler = self.build_handler(transport);
        if self.connections.insert(Arc::clone(&handler)).await.is_err() {
            return Err(std::io::Error::other("connection limit reached"));
        }
        tracing::info!("Connected to {endpoint} as {:?}", handler.id());
        tokio::spawn(drive(Arc::clone(&handler), inbound));

        let hello = Packet::Application(GameMessage::Hello {
            name: name.to_string(),
        });
        if handler.send_now(hello, None).is_err() {
            return Err(std::io::Error::other("connection closed during handshake"));
        }
        Ok(handler)
    }

    fn build_handler(&self, transport: Arc<dyn Transport<GameMessage>>) -> Handler {
        ConnectionHandler::builder(self.id_gen.next_id(), transport, Arc::clone(&self.sink))
            .config(&self.protocol)
            .build()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                _ = stopped(&mut shutdown_rx) => break,
                result = listener.accept() => match result {
                    Ok((stream, peer_addr)) => {
                        if let Err(err) = self.admit(stream).await {
                            tracing::warn!("Failed to set up connection from {peer_addr}: {err}");
                        }
                    }
                    Err(err) => tracing::warn!("Accept failed: {err}"),
                },
            }
        }
    }

    async fn admit(&self, stream: TcpStream) -> std::io::Result<()> {
        let (transport, inbound) =
            TcpTransport::<GameMessage>::from_stream(stream, &self.protocol)?;
        let handler = self.build_handler(transport);
        tokio::spawn(drive(Arc::clone(&handler), inbound));

        if self.connections.insert(Arc::clone(&handler)).await.is_err() {
            tracing::warn!("Connection limit reached, rejecting {}", handler.peer());
            tokio::spawn(disconnect_gracefully(handler, SERVER_FULL_REASON));
            return Ok(());
        }

        handler.set_phase("login");
        tracing::info!("Accepted connection {:?} from {}", handler.id(), handler.peer());
        Ok(())
    }

    /// Forward stdin lines as chat until EOF, then stop the node.
    fn spawn_console(self: &Arc<Self>, handler: Handler) {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(text)) = lines.next_line().await {
                let chat = Packet::Application(GameMessage::Chat {
                    from: String::new(),
                    text,
                });
                if handler.enqueue(chat, None).is_err() {
                    break;
                }
            }
            node.shutdown();
        });
    }

    async fn run_loop(&self, mut events: Events) {
        let mut interval = tokio::time::interval(self.network.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut shutdown_rx) => break,
                Some(event) = events.recv() => self.handle_event(event).await,
                _ = interval.tick() => self.tick_all().await,
            }
        }

        tracing::info!("Node shutting down");
        let closing: Vec<_> = self
            .connections
            .handlers()
            .await
            .into_iter()
            .map(|handler| tokio::spawn(disconnect_gracefully(handler, SHUTDOWN_REASON)))
            .collect();
        for task in closing {
            let _ = task.await;
        }
    }

    async fn tick_all(&self) {
        for handler in self.connections.handlers().await {
            handler.tick();
        }
    }

    async fn handle_event(&self, event: NetworkEvent<GameMessage>) {
        match event {
            NetworkEvent::PacketReceived { handler, packet } => match packet {
                Packet::Application(message) => self.on_message(&handler, message).await,
                Packet::Heartbeat { is_reply } => {
                    tracing::trace!("Heartbeat on {:?} (reply: {is_reply})", handler.id());
                }
                Packet::Disconnect { reason } => {
                    tracing::debug!("Connection {:?} is leaving: {reason}", handler.id());
                }
            },
            NetworkEvent::Disconnected { connection, reason } => {
                if self.connections.remove(&connection).await.is_some() {
                    tracing::info!("Connection {connection:?} closed: {reason}");
                }
                if !self.network.listen {
                    self.shutdown();
                }
            }
        }
    }

    async fn on_message(&self, handler: &Handler, message: GameMessage) {
        let id = handler.id();
        if self.log_packets {
            tracing::debug!("Connection {id:?} sent {message:?}");
        }

        match message {
            GameMessage::Hello { name } => {
                if !self.connections.contains(&id).await || !handler.mark_ready() {
                    tracing::warn!("Ignoring hello from {name} on {id:?}");
                    return;
                }
                handler.set_phase("play");
                self.connections.set_name(&id, &name).await;
                tracing::info!("{name} joined as {id:?}");

                let welcome = Packet::Application(GameMessage::Welcome { connection: id.0 });
                if handler.send_now(welcome, None).is_err() {
                    tracing::debug!("{name} left before the welcome was sent");
                }
            }
            GameMessage::Welcome { connection } => {
                handler.mark_ready();
                handler.set_phase("play");
                tracing::info!("Joined server as connection {connection}");
            }
            GameMessage::Chat { from, text } => {
                if !self.network.listen {
                    tracing::info!("<{from}> {text}");
                    return;
                }

                let from = self
                    .connections
                    .name(&id)
                    .await
                    .unwrap_or_else(|| format!("connection-{}", id.0));
                tracing::info!("<{from}> {text}");
                for peer in self.connections.handlers().await {
                    if peer.id() == id || !peer.status().is_usable() {
                        continue;
                    }
                    let relay = Packet::Application(GameMessage::Chat {
                        from: from.clone(),
                        text: text.clone(),
                    });
                    let _ = peer.enqueue(relay, None);
                }
            }
        }
    }
}
