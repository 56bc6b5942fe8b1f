//! In-memory connector shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use stimlink::session::{
    Connector, ConnectionState, Duplex, Endpoint, Session, Topic, TransportError,
};
use tokio::sync::mpsc;

/// Server side of one accepted fake connection
pub struct Peer {
    pub written: fmpsc::UnboundedReceiver<String>,
    pub inbound: fmpsc::UnboundedSender<Result<String, TransportError>>,
}

impl Peer {
    pub async fn next_frame(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(5), self.written.next())
            .await
            .expect("no frame written in time")
            .expect("client closed the connection");
        serde_json::from_str(&text).expect("client wrote invalid json")
    }

    /// Everything written so far without waiting
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(Some(text)) = self.written.try_next() {
            frames.push(serde_json::from_str(&text).expect("client wrote invalid json"));
        }
        frames
    }

    pub fn push(&self, frame: &str) {
        self.inbound
            .unbounded_send(Ok(frame.to_string()))
            .expect("client stopped reading");
    }

    pub fn push_error(&self, error: TransportError) {
        self.inbound
            .unbounded_send(Err(error))
            .expect("client stopped reading");
    }
}

#[derive(Clone)]
pub struct FakeConnector {
    pub refuse: Arc<AtomicBool>,
    pub attempts: Arc<AtomicUsize>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl FakeConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            refuse: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
            peers,
        };
        (connector, accepted)
    }

    pub fn refusing() -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (connector, accepted) = Self::new();
        connector.refuse.store(true, Ordering::SeqCst);
        (connector, accepted)
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Duplex, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: "connection refused".into(),
            });
        }
        let (written_tx, written) = fmpsc::unbounded();
        let (inbound, inbound_rx) = fmpsc::unbounded();
        let _ = self.peers.send(Peer { written, inbound });
        Ok(Duplex::new(
            written_tx.sink_map_err(|_| TransportError::Closed),
            inbound_rx,
        ))
    }
}

pub async fn accept(accepted: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    tokio::time::timeout(Duration::from_secs(60), accepted.recv())
        .await
        .expect("no connection attempt in time")
        .expect("connector dropped")
}

pub async fn wait_for_state(session: &Session, state: ConnectionState) {
    let mut rx = session.watch_state();
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("session dropped");
}

/// Forwards the kind of every event on `topics` into a channel
pub fn record(session: &Session, topics: &[Topic]) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    for topic in topics {
        let tx = tx.clone();
        session.on(topic.clone(), move |envelope| {
            let _ = tx.send(envelope.kind.clone());
            Ok(())
        });
    }
    rx
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(300), events.recv())
        .await
        .expect("no event in time")
        .expect("recorder dropped")
}

pub const LIFECYCLE: [Topic; 4] = [
    Topic::Connecting,
    Topic::Connected,
    Topic::Disconnected,
    Topic::ReconnectFailed,
];
