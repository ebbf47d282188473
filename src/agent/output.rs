//! Reconnectable output streams.
//!
//! Each stream namespace holds an append-only chunk buffer. Subscribing
//! replays everything buffered so far and then delivers live chunks, so a
//! client that reconnects mid-run sees the whole output. Namespaces derive
//! from the event timestamp, making each inbound event its own stream.

use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::agent::model::StreamChunk;

struct StreamState {
    chunks: Vec<StreamChunk>,
    subscribers: Vec<mpsc::UnboundedSender<StreamChunk>>,
    closed: bool,
}

impl StreamState {
    fn new() -> Self {
        Self {
            chunks: Vec::new(),
            subscribers: Vec::new(),
            closed: false,
        }
    }
}

/// What a subscriber receives: the buffered backlog, then live chunks until
/// the stream closes.
pub struct OutputSubscription {
    pub backlog: Vec<StreamChunk>,
    pub live: mpsc::UnboundedReceiver<StreamChunk>,
}

impl OutputSubscription {
    /// Drains the subscription to completion: backlog plus every live chunk
    /// until the stream closes.
    pub async fn collect(mut self) -> Vec<StreamChunk> {
        let mut chunks = self.backlog;
        while let Some(chunk) = self.live.recv().await {
            chunks.push(chunk);
        }
        chunks
    }
}

/// In-process hub of per-namespace output streams.
#[derive(Default)]
pub struct OutputStreams {
    streams: Mutex<HashMap<String, StreamState>>,
}

impl OutputStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk to a namespace, creating it on first write. Writes to
    /// a closed namespace are dropped.
    pub async fn publish(&self, namespace: &str, chunk: StreamChunk) {
        let mut streams = self.streams.lock().await;
        let state = streams
            .entry(namespace.to_string())
            .or_insert_with(StreamState::new);
        if state.closed {
            return;
        }
        state
            .subscribers
            .retain(|tx| tx.send(chunk.clone()).is_ok());
        state.chunks.push(chunk);
    }

    /// Subscribes to a namespace, replaying the buffered backlog.
    ///
    /// Subscribing to an already-closed namespace hands over the full buffer
    /// and drops it from the hub; the live receiver ends immediately.
    pub async fn subscribe(&self, namespace: &str) -> OutputSubscription {
        let mut streams = self.streams.lock().await;
        let (tx, rx) = mpsc::unbounded_channel();

        if streams.get(namespace).is_some_and(|state| state.closed) {
            let backlog = streams
                .remove(namespace)
                .map(|state| state.chunks)
                .unwrap_or_default();
            return OutputSubscription { backlog, live: rx };
        }

        let state = streams
            .entry(namespace.to_string())
            .or_insert_with(StreamState::new);
        state.subscribers.push(tx);
        OutputSubscription {
            backlog: state.chunks.clone(),
            live: rx,
        }
    }

    /// Closes a namespace: live subscribers end, the buffer stays for one
    /// late subscriber to replay.
    pub async fn close(&self, namespace: &str) {
        let mut streams = self.streams.lock().await;
        if let Some(state) = streams.get_mut(namespace) {
            state.closed = true;
            state.subscribers.clear();
        }
    }

    /// Chunks buffered for a namespace so far.
    pub async fn buffered(&self, namespace: &str) -> Vec<StreamChunk> {
        let streams = self.streams.lock().await;
        streams
            .get(namespace)
            .map(|state| state.chunks.clone())
            .unwrap_or_default()
    }
}
