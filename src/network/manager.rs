//! Connection manager
//!
//! Owns the single session link. All link state lives in one actor task;
//! [`ConnectionManager`] is a cheap cloneable handle that forwards commands
//! to it.
//!
//! ```text
//!               connect()                 transport open
//! Disconnected ───────────▶ Connecting ────────────────────▶ Connected
//!      ▲                     │  ▲   ▲                           │
//!      │ disconnect()        │  │   └── reconnect timer ──┐     │ transport closed
//!      └─────────────────────┘  └─────── closed / failed ─┴─────┘
//! ```
//!
//! While not connected, outgoing messages wait in a FIFO that is flushed, in
//! order, the moment a link opens and before any later message is sent.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::codec::{MessageDecoder, MessageEncoder};
use crate::config::ConnectionConfig;
use crate::error::NetworkError;
use crate::network::subscribers::{Subscribers, Subscription};
use crate::network::transport::{Connector, LinkId, TransportEvent, TransportLink};
use crate::network::websocket::WsConnector;
use crate::protocol::{ClientMessage, ServerMessage};

/// Connection state as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

enum Command {
    Connect,
    Disconnect,
    Send(ClientMessage),
}

/// Subscriber hubs and counters shared between handles and the actor
#[derive(Default)]
struct Hubs {
    messages: Subscribers<ServerMessage>,
    states: Subscribers<ConnectionState>,
    opens: Subscribers<()>,
    connection_attempts: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    malformed_frames: AtomicU64,
}

/// Manager statistics
#[derive(Debug, Clone, Default)]
pub struct ManagerStats {
    pub connection_attempts: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub malformed_frames: u64,
}

/// Handle to the session connection
///
/// Clones share the same connection. Handlers registered through the
/// `on_*` methods run on the manager's task, one at a time, in the order
/// events arrive.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<watch::Sender<ConnectionState>>,
    hubs: Arc<Hubs>,
}

impl ConnectionManager {
    /// Spawn the manager on the current tokio runtime. Starts disconnected.
    pub fn spawn<C: Connector>(connector: C, reconnect_delay: Duration) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let state = Arc::new(state);
        let hubs = Arc::new(Hubs::default());

        let actor = Actor {
            connector,
            commands: command_rx,
            events_tx,
            events_rx,
            state: state.clone(),
            hubs: hubs.clone(),
            link: None,
            next_link: 0,
            outbound: VecDeque::new(),
            reconnect_at: None,
            reconnect_delay,
            encoder: MessageEncoder::new(),
            decoder: MessageDecoder::new(),
        };
        tokio::spawn(actor.run());

        Self {
            commands,
            state,
            hubs,
        }
    }

    /// Spawn a manager for the configured WebSocket endpoint
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::spawn(
            WsConnector::new(config.url.clone()),
            Duration::from_millis(config.reconnect_delay_ms),
        )
    }

    /// Start connecting. No-op while connecting or connected.
    pub fn connect(&self) {
        let started = self.state.send_if_modified(|s| {
            if *s == ConnectionState::Disconnected {
                *s = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if started {
            let _ = self.commands.send(Command::Connect);
        }
    }

    /// Close the connection and stop reconnecting until the next `connect()`.
    ///
    /// Takes effect immediately: no reconnect attempt is made after this
    /// returns, even when called from inside a handler.
    pub fn disconnect(&self) {
        self.state.send_replace(ConnectionState::Disconnected);
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Send a message now if connected, otherwise queue it for the next open link.
    pub fn send(&self, message: ClientMessage) -> Result<(), NetworkError> {
        self.commands
            .send(Command::Send(message))
            .map_err(|_| NetworkError::ManagerClosed)
    }

    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerMessage) + Send + Sync + 'static,
    {
        self.hubs.messages.subscribe(handler)
    }

    pub fn on_state_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionState) + Send + Sync + 'static,
    {
        self.hubs.states.subscribe(handler)
    }

    /// Called every time a link opens, after queued messages were flushed
    pub fn on_open<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.hubs.opens.subscribe(move |_: &()| handler())
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Handle that does not keep the manager alive. Handlers registered on
    /// this manager should capture one of these instead of a clone, since a
    /// clone held by a handler keeps the manager task running forever.
    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            commands: self.commands.downgrade(),
            state: Arc::downgrade(&self.state),
            hubs: Arc::downgrade(&self.hubs),
        }
    }

    /// Watch channel following the connection state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            connection_attempts: self.hubs.connection_attempts.load(Ordering::Relaxed),
            frames_sent: self.hubs.frames_sent.load(Ordering::Relaxed),
            frames_received: self.hubs.frames_received.load(Ordering::Relaxed),
            malformed_frames: self.hubs.malformed_frames.load(Ordering::Relaxed),
        }
    }
}

/// Non-owning [`ConnectionManager`] handle
#[derive(Clone)]
pub struct WeakConnectionManager {
    commands: mpsc::WeakUnboundedSender<Command>,
    state: Weak<watch::Sender<ConnectionState>>,
    hubs: Weak<Hubs>,
}

impl WeakConnectionManager {
    /// `None` once every strong handle is gone
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        Some(ConnectionManager {
            commands: self.commands.upgrade()?,
            state: self.state.upgrade()?,
            hubs: self.hubs.upgrade()?,
        })
    }
}

struct Actor<C> {
    connector: C,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<(LinkId, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(LinkId, TransportEvent)>,
    state: Arc<watch::Sender<ConnectionState>>,
    hubs: Arc<Hubs>,
    link: Option<(LinkId, Box<dyn TransportLink>)>,
    next_link: LinkId,
    /// Encoded frames waiting for an open link
    outbound: VecDeque<String>,
    /// Single reconnect timer slot
    reconnect_at: Option<Instant>,
    reconnect_delay: Duration,
    encoder: MessageEncoder,
    decoder: MessageDecoder,
}

impl<C: Connector> Actor<C> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some((id, event)) = self.events_rx.recv() => self.handle_event(id, event),
                _ = sleep_until(self.reconnect_at) => self.reconnect(),
            }
        }

        if let Some((_, mut link)) = self.link.take() {
            link.close();
        }
        tracing::debug!("Connection manager stopped");
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => {
                if self.link.is_none() && self.reconnect_at.is_none() {
                    self.open_link();
                }
                self.hubs.states.dispatch(&ConnectionState::Connecting);
            }
            Command::Disconnect => {
                self.reconnect_at = None;
                if let Some((id, mut link)) = self.link.take() {
                    tracing::info!("Closing link {}", id);
                    link.close();
                }
                self.hubs.states.dispatch(&ConnectionState::Disconnected);
            }
            Command::Send(message) => {
                let frame = match self.encoder.encode(&message) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("Failed to encode {}: {}", message.kind(), e);
                        return;
                    }
                };

                let connected = self.current_state() == ConnectionState::Connected;
                if connected && self.link.is_some() {
                    match self.transmit(frame) {
                        Ok(()) => tracing::debug!("Sent {}", message.kind()),
                        Err(frame) => self.outbound.push_back(frame),
                    }
                } else {
                    tracing::debug!(
                        "Queueing {} until connected ({} pending)",
                        message.kind(),
                        self.outbound.len() + 1
                    );
                    self.outbound.push_back(frame);
                }
            }
        }
    }

    fn handle_event(&mut self, id: LinkId, event: TransportEvent) {
        if self.link.as_ref().map(|(current, _)| *current) != Some(id) {
            tracing::trace!("Ignoring {:?} from stale link {}", event, id);
            return;
        }

        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Text(frame) => {
                let result = self.decoder.decode_text(&frame);
                self.deliver(result.map_err(|e| (e, frame.len())));
            }
            TransportEvent::Binary(frame) => {
                let result = self.decoder.decode_bytes(&frame);
                self.deliver(result.map_err(|e| (e, frame.len())));
            }
            TransportEvent::Error(e) => {
                tracing::warn!("Transport error on link {}: {}", id, e);
            }
            TransportEvent::Unsent(frames) => {
                tracing::warn!("Link {} gave back {} unsent frames", id, frames.len());
                self.hubs
                    .frames_sent
                    .fetch_sub(frames.len() as u64, Ordering::Relaxed);
                for frame in frames.into_iter().rev() {
                    self.outbound.push_front(frame);
                }
            }
            TransportEvent::Closed => self.on_closed(id),
        }
    }

    fn on_opened(&mut self) {
        let opened = self.state.send_if_modified(|s| {
            if *s == ConnectionState::Connecting {
                *s = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !opened {
            return;
        }

        tracing::info!("Connected ({} queued messages)", self.outbound.len());

        while let Some(frame) = self.outbound.pop_front() {
            if let Err(frame) = self.transmit(frame) {
                self.outbound.push_front(frame);
                break;
            }
        }

        self.hubs.states.dispatch(&ConnectionState::Connected);
        self.hubs.opens.dispatch(&());
    }

    fn on_closed(&mut self, id: LinkId) {
        self.link = None;

        let mut entered = false;
        self.state.send_if_modified(|s| match *s {
            ConnectionState::Connected => {
                *s = ConnectionState::Connecting;
                entered = true;
                true
            }
            _ => false,
        });

        if self.current_state() == ConnectionState::Disconnected {
            return;
        }

        tracing::info!(
            "Link {} closed; reconnecting in {} ms",
            id,
            self.reconnect_delay.as_millis()
        );
        if entered {
            self.hubs.states.dispatch(&ConnectionState::Connecting);
        }
        self.schedule_reconnect();
    }

    fn deliver(&mut self, result: Result<ServerMessage, (crate::error::CodecError, usize)>) {
        match result {
            Ok(message) => {
                self.hubs.frames_received.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Received {}", message.kind());
                self.hubs.messages.dispatch(&message);
            }
            Err((e, len)) => {
                self.hubs.malformed_frames.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Dropping malformed frame ({} bytes): {}", len, e);
            }
        }
    }

    /// Hand one frame to the link. Gives the frame back if the link can
    /// no longer take it.
    fn transmit(&mut self, frame: String) -> Result<(), String> {
        let Some((id, link)) = self.link.as_mut() else {
            return Err(frame);
        };

        let len = frame.len();
        link.send_text(frame)?;
        self.hubs.frames_sent.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("Handed {} bytes to link {}", len, id);
        Ok(())
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_none() {
            self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
        }
    }

    fn reconnect(&mut self) {
        self.reconnect_at = None;
        if self.current_state() != ConnectionState::Disconnected && self.link.is_none() {
            self.open_link();
        }
    }

    fn open_link(&mut self) {
        let id = self.next_link;
        self.next_link += 1;
        let attempt = self.hubs.connection_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!("Opening link {} (attempt {})", id, attempt);

        let link = self.connector.open(id, self.events_tx.clone());
        self.link = Some((id, link));
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
