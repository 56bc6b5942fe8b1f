//! The process-wide transport session
//!
//! # State machine
//!
//! ```text
//!  Idle ──connect──► Connecting ──open──► Open
//!                       │  ▲               │
//!                 fail  │  │ backoff       │ unexpected close
//!                       ▼  │               ▼
//!                      Closed ◄────────────┘
//!                       │
//!                       └─ attempts > budget ──► reconnect_failed (terminal)
//! ```
//!
//! Every attempt gets a fresh generation number. Tasks spawned for an attempt
//! check their generation before touching shared state, so a manual
//! `disconnect` or a newer `connect` silently retires whatever was in flight.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::bus::{EventBus, SubscriptionId, Topic};
use super::envelope::{AuthFrame, Envelope};
use super::error::TransportError;
use super::protocol::Command;
use super::reconnect::ReconnectPolicy;
use super::transport::{Connector, Duplex, Endpoint, Origin};
use color_eyre::Result;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
}

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub origin: Origin,
    pub credentials: Option<Credentials>,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            origin: Origin::new("127.0.0.1", None),
            credentials: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Point-in-time view of the session for status displays
#[derive(Clone, Debug, Default)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub endpoint: Option<Endpoint>,
    pub reconnect_attempts: u32,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub last_activity: Option<DateTime<Local>>,
}

/// Anything that can put a control command on the wire
///
/// Returns false when the command was not written; callers never retry, the
/// next command supersedes it.
pub trait CommandSink: Send + Sync {
    fn send_command(&self, command: &Command) -> bool;
}

#[derive(Default)]
struct Link {
    state: ConnectionState,
    generation: u64,
    target: Option<Endpoint>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    attempts: u32,
    connection_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    frames_sent: u64,
    frames_received: u64,
    frames_dropped: u64,
    last_activity: Option<DateTime<Local>>,
}

impl Link {
    /// Moves to Connecting under a new generation
    fn start_attempt(&mut self, endpoint: Endpoint) -> u64 {
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.target = Some(endpoint);
        self.generation
    }
}

struct Inner {
    connector: Arc<dyn Connector>,
    options: SessionOptions,
    bus: EventBus,
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap, cloneable handle to the one live connection
///
/// All operations are non-blocking. `connect` spawns onto the current tokio
/// runtime and therefore must be called from within one.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new<C: Connector>(connector: C, options: SessionOptions) -> Self {
        Self::with_connector(Arc::new(connector), options)
    }

    pub fn with_connector(connector: Arc<dyn Connector>, options: SessionOptions) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                connector,
                options,
                bus: EventBus::new(),
                link: Mutex::new(Link::default()),
                state_tx,
            }),
        }
    }

    // ── Subscriptions ────────────────────────────────────────────

    pub fn on<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.bus.on(topic, handler)
    }

    pub fn off(&self, topic: &Topic, id: SubscriptionId) -> bool {
        self.inner.bus.off(topic, id)
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    // ── Queries ──────────────────────────────────────────────────

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Open, and the writer half still accepts frames
    pub fn is_connected(&self) -> bool {
        let link = self.inner.lock();
        link.state == ConnectionState::Open
            && link.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    pub fn status(&self) -> SessionStatus {
        let link = self.inner.lock();
        SessionStatus {
            state: link.state,
            endpoint: link.target.clone(),
            reconnect_attempts: link.attempts,
            frames_sent: link.frames_sent,
            frames_received: link.frames_received,
            frames_dropped: link.frames_dropped,
            last_activity: link.last_activity,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Starts a connection attempt unless one is already outstanding or open
    ///
    /// Missing values are filled from the configured [`Origin`]. An explicit call
    /// gives the session a fresh reconnect budget and supersedes a pending
    /// scheduled reconnect.
    pub fn connect(&self, host: Option<&str>, port: Option<u16>) {
        let endpoint = self.inner.options.origin.resolve(host, port);
        let (generation, pending) = {
            let mut link = self.inner.lock();
            if matches!(
                link.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                debug!("connect ignored, session is already {:?}", link.state);
                return;
            }
            link.attempts = 0;
            let pending = link.reconnect_task.take();
            (link.start_attempt(endpoint.clone()), pending)
        };
        if let Some(task) = pending {
            task.abort();
        }
        self.launch(generation, endpoint);
    }

    /// Closes the connection for good; no reconnect follows
    pub fn disconnect(&self) {
        let (connection, reconnect, previous) = {
            let mut link = self.inner.lock();
            link.generation += 1;
            let previous = link.state;
            link.state = ConnectionState::Closed;
            // dropping the writer ends the connection task, which closes the sink
            link.outbound = None;
            (
                link.connection_task.take(),
                link.reconnect_task.take(),
                previous,
            )
        };

        if let Some(task) = reconnect {
            task.abort();
        }
        if let Some(task) = connection {
            if previous == ConnectionState::Connecting {
                task.abort();
            }
        }

        self.publish_state(ConnectionState::Closed);
        if matches!(
            previous,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            info!("session disconnected by request");
            self.emit_lifecycle(Topic::Disconnected);
        }
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Wraps `payload` in a timestamped envelope and queues it for writing
    ///
    /// Returns false, without raising, when the session is not open.
    pub fn send(&self, kind: &str, payload: Value) -> bool {
        let frame = match Envelope::new(kind, payload).encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("could not encode '{}': {}", kind, e);
                return false;
            }
        };

        let mut guard = self.inner.lock();
        let link = &mut *guard;
        if link.state != ConnectionState::Open {
            debug!("not connected, dropping '{}'", kind);
            link.frames_dropped += 1;
            return false;
        }

        let queued = link
            .outbound
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok());
        if queued {
            link.frames_sent += 1;
            link.last_activity = Some(Local::now());
        } else {
            debug!("writer gone, dropping '{}'", kind);
            link.frames_dropped += 1;
        }
        queued
    }

    pub fn request_state(&self) -> bool {
        self.send_command(&Command::GetState)
    }

    // ── Internals ────────────────────────────────────────────────

    fn launch(&self, generation: u64, endpoint: Endpoint) {
        self.publish_state(ConnectionState::Connecting);
        info!("connecting to {}", endpoint);
        self.emit_lifecycle(Topic::Connecting);

        // a `connecting` subscriber may already have disconnected us
        if self.inner.lock().generation != generation {
            return;
        }

        let session = self.clone();
        let task = tokio::spawn(async move { session.run_connection(generation, endpoint).await });

        let mut link = self.inner.lock();
        if link.generation == generation {
            link.connection_task = Some(task);
        }
    }

    async fn run_connection(self, generation: u64, endpoint: Endpoint) {
        let duplex = match self.inner.connector.connect(&endpoint).await {
            Ok(duplex) => duplex,
            Err(e) => {
                warn!("connection attempt failed: {}", e);
                self.handle_close(generation, false);
                return;
            }
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        if let Some(credentials) = &self.inner.options.credentials {
            match AuthFrame::new(&credentials.username, &credentials.password).encode() {
                Ok(frame) => {
                    let _ = tx.send(frame);
                }
                Err(e) => warn!("could not encode auth frame: {}", e),
            }
        }

        {
            let mut link = self.inner.lock();
            if link.generation != generation {
                debug!("connection to {} is stale, dropping it", endpoint);
                return;
            }
            link.state = ConnectionState::Open;
            link.attempts = 0;
            link.outbound = Some(tx);
        }
        self.publish_state(ConnectionState::Open);
        info!("session open to {}", endpoint);
        self.emit_lifecycle(Topic::Connected);

        let Duplex {
            mut sink,
            mut stream,
        } = duplex;
        loop {
            // writes first: once the writer is gone nothing more is read
            tokio::select! {
                biased;
                outgoing = rx.recv() => match outgoing {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            warn!("write to {} failed: {}", endpoint, e);
                            break;
                        }
                    }
                    None => break,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(frame)) => self.dispatch_frame(generation, &frame),
                    Some(Err(TransportError::Framing(reason))) => {
                        warn!("dropping unreadable frame: {}", reason);
                        self.inner.lock().frames_dropped += 1;
                    }
                    Some(Err(e)) => {
                        warn!("read from {} failed: {}", endpoint, e);
                        break;
                    }
                    None => {
                        info!("{} closed the connection", endpoint);
                        break;
                    }
                },
            }
        }

        if let Err(e) = sink.close().await {
            debug!("closing sink: {}", e);
        }
        self.handle_close(generation, true);
    }

    /// Frames read on behalf of a retired generation are never dispatched
    fn dispatch_frame(&self, generation: u64, frame: &str) {
        let decoded = Envelope::decode(frame);

        {
            let mut link = self.inner.lock();
            if link.generation != generation {
                debug!("session closed, discarding inbound frame");
                return;
            }
            match &decoded {
                Ok(_) => {
                    link.frames_received += 1;
                    link.last_activity = Some(Local::now());
                }
                Err(_) => link.frames_dropped += 1,
            }
        }

        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping malformed frame: {}", e);
                return;
            }
        };

        let topic = Topic::Message(envelope.kind.clone());
        let delivered = self.inner.bus.emit(&topic, &envelope);
        debug!("'{}' delivered to {} subscribers", envelope.kind, delivered);
    }

    /// Unexpected end of an attempt: schedule the next one or give up
    fn handle_close(&self, generation: u64, was_open: bool) {
        let policy = self.inner.options.reconnect;
        let next = {
            let mut link = self.inner.lock();
            if link.generation != generation {
                return;
            }
            link.state = ConnectionState::Closed;
            link.outbound = None;
            link.connection_task = None;
            link.attempts += 1;
            policy.delay_for(link.attempts).map(|delay| (link.attempts, delay))
        };

        self.publish_state(ConnectionState::Closed);
        if was_open {
            self.emit_lifecycle(Topic::Disconnected);
        }

        let Some((attempt, delay)) = next else {
            error!(
                "giving up after {} reconnect attempts",
                policy.max_attempts
            );
            self.emit_lifecycle(Topic::ReconnectFailed);
            return;
        };

        info!("reconnect attempt {} in {:?}", attempt, delay);
        let session = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            session.fire_reconnect(generation);
        });

        let mut link = self.inner.lock();
        if link.generation == generation {
            link.reconnect_task = Some(task);
        } else {
            task.abort();
        }
    }

    fn fire_reconnect(&self, scheduled_in: u64) {
        let (generation, endpoint) = {
            let mut link = self.inner.lock();
            if link.generation != scheduled_in {
                debug!("scheduled reconnect superseded");
                return;
            }
            link.reconnect_task = None;
            // checked now, not when the timer was armed
            if matches!(
                link.state,
                ConnectionState::Connecting | ConnectionState::Open
            ) {
                debug!("already {:?}, skipping scheduled reconnect", link.state);
                return;
            }
            let Some(endpoint) = link.target.clone() else {
                return;
            };
            (link.start_attempt(endpoint.clone()), endpoint)
        };
        self.launch(generation, endpoint);
    }

    fn emit_lifecycle(&self, topic: Topic) {
        if let Some(name) = topic.lifecycle_name() {
            self.inner.bus.emit(&topic, &Envelope::lifecycle(name));
        }
    }

    fn publish_state(&self, state: ConnectionState) {
        self.inner.state_tx.send_replace(state);
    }
}

impl CommandSink for Session {
    fn send_command(&self, command: &Command) -> bool {
        match command.payload() {
            Ok(payload) => self.send(command.kind(), payload),
            Err(e) => {
                warn!("could not encode '{}': {}", command.kind(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Refusing(AtomicUsize);

    #[async_trait]
    impl Connector for Refusing {
        async fn connect(&self, endpoint: &Endpoint) -> Result<Duplex, TransportError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "refused".into(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_reconnect_checks_state_when_it_fires() {
        let connector = Arc::new(Refusing::default());
        let session = Session::with_connector(connector.clone(), SessionOptions::default());
        session.connect(None, None);
        session
            .watch_state()
            .wait_for(|s| *s == ConnectionState::Closed)
            .await
            .unwrap();
        assert!(session.inner.lock().reconnect_task.is_some());

        // the link came up by other means while the backoff timer was armed
        session.inner.lock().state = ConnectionState::Open;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(connector.0.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), ConnectionState::Open);
        assert!(session.inner.lock().reconnect_task.is_none());
    }
}
