// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Topic-based publish/subscribe capability used by consensus.
//!
//! Delivery is at-least-once per live subscriber and FIFO per publisher.
//! Nothing is ordered across publishers.

use futures::Stream;
use std::{
    collections::BTreeMap,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    task::{Context, Poll},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Transport errors.
#[derive(Debug, Error)]
pub enum PubSubError {
    /// Broker was closed.
    #[error("broker closed")]
    Closed,
    /// Underlying network failure.
    #[error("transport: {0}")]
    Transport(String),
}

/// Lazy, unbounded stream of message payloads for one topic.
pub struct Subscription {
    topic: String,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Subscription {
    /// Wrap a receiver fed by a broker.
    pub fn new(topic: impl Into<String>, rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { topic: topic.into(), rx }
    }

    /// Topic name.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next payload; `None` once the broker closes the subscription.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Non-suspending poll; `None` when nothing is queued.
    pub fn try_next(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Vec<u8>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Broadcast/receive capability, decoupled from any network.
pub trait PubSubBroker: Send + Sync {
    /// Start receiving messages published on `topic` from now on.
    fn subscribe(&self, topic: &str) -> Result<Subscription, PubSubError>;
    /// Publish `payload` to every subscriber of `topic`.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubSubError>;
    /// Release all subscriptions; later calls fail with [`PubSubError::Closed`].
    fn close(&self);
    /// Whether anyone can currently receive on `topic`.
    fn is_connected(&self, topic: &str) -> bool;
}

type Senders = BTreeMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>;

/// Process-local broker. Publishers also receive their own messages when
/// subscribed to the topic.
#[derive(Default)]
pub struct InMemoryBroker {
    topics: Mutex<Senders>,
    closed: AtomicBool,
}

impl InMemoryBroker {
    /// Empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> Result<std::sync::MutexGuard<'_, Senders>, PubSubError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PubSubError::Closed);
        }
        self.topics
            .lock()
            .map_err(|_| PubSubError::Transport("broker lock poisoned".to_string()))
    }
}

impl PubSubBroker for InMemoryBroker {
    fn subscribe(&self, topic: &str) -> Result<Subscription, PubSubError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.topics()?.entry(topic.to_string()).or_default().push(tx);
        Ok(Subscription::new(topic, rx))
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PubSubError> {
        let mut topics = self.topics()?;
        if let Some(subs) = topics.get_mut(topic) {
            subs.retain(|tx| tx.send(payload.to_vec()).is_ok());
            debug!(topic, receivers = subs.len(), bytes = payload.len(), "published");
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut topics) = self.topics.lock() {
            topics.clear();
        }
    }

    fn is_connected(&self, topic: &str) -> bool {
        match self.topics() {
            Ok(topics) => topics
                .get(topic)
                .map(|subs| subs.iter().any(|tx| !tx.is_closed()))
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}
