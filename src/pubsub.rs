//! Publish/subscribe channel registry
//!
//! Channels are created on first subscribe and dropped as soon as their last
//! subscriber leaves. A channel keeps its subscribers in join order and holds
//! each session at most once.

use crate::protocol::Value;
use crate::session::{Session, SessionId};
use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Clone)]
struct Subscriber {
    id: SessionId,
    sender: mpsc::Sender<Value>,
}

#[derive(Default)]
struct Channel {
    subscribers: Vec<Subscriber>,
}

impl Channel {
    fn add(&mut self, subscriber: Subscriber) {
        if !self.subscribers.iter().any(|s| s.id == subscriber.id) {
            self.subscribers.push(subscriber);
        }
    }

    fn remove(&mut self, id: &str) {
        self.subscribers.retain(|s| s.id != id);
    }
}

/// Registry of named channels
#[derive(Default)]
pub struct PubSub {
    channels: Mutex<HashMap<Bytes, Channel>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join each channel, pushing one confirmation per channel to the session
    pub async fn subscribe(&self, session: &mut Session, channels: &[Bytes]) {
        let mut confirmations = Vec::with_capacity(channels.len());
        {
            let mut registry = self.channels.lock().await;
            for name in channels {
                registry.entry(name.clone()).or_default().add(Subscriber {
                    id: session.id().to_string(),
                    sender: session.sender(),
                });
                session.subscriptions_mut().insert(name.clone());

                let count = session.subscriptions().len() as i64;
                confirmations.push(Value::Array(vec![
                    Value::bulk("subscribe"),
                    Value::BulkString(name.clone()),
                    Value::Integer(count),
                ]));
            }
        }

        // Confirmations wait for queue room outside the registry lock
        for confirmation in confirmations {
            if !session.push(confirmation).await {
                break;
            }
        }

        debug!(session = session.id(), channels = channels.len(), "subscribed");
    }

    /// Leave each channel, dropping channels left without subscribers
    pub async fn unsubscribe(&self, session: &mut Session, channels: &[Bytes]) {
        let mut registry = self.channels.lock().await;

        for name in channels {
            Self::leave(&mut registry, name, session.id());
            session.subscriptions_mut().remove(name);
        }
    }

    /// Leave every channel the session joined. Used on disconnect.
    pub async fn unsubscribe_all(&self, session: &mut Session) {
        if !session.is_subscribed() {
            return;
        }

        let id = session.id().to_string();
        let mut registry = self.channels.lock().await;
        for name in session.subscriptions_mut().drain() {
            Self::leave(&mut registry, &name, &id);
        }
    }

    fn leave(registry: &mut HashMap<Bytes, Channel>, name: &Bytes, id: &str) {
        if let Some(channel) = registry.get_mut(name) {
            channel.remove(id);
            if channel.subscribers.is_empty() {
                registry.remove(name);
            }
        }
    }

    /// Deliver a message to every current subscriber of `channel`.
    ///
    /// Subscriber handles are copied out under the lock and the pushes happen
    /// after it is released. A subscriber whose queue is full misses the
    /// message. Returns the number of sessions that accepted it.
    pub async fn publish(&self, channel: &[u8], message: Bytes) -> usize {
        let subscribers: Vec<Subscriber> = {
            let registry = self.channels.lock().await;
            match registry.get(channel) {
                Some(entry) => entry.subscribers.clone(),
                None => return 0,
            }
        };

        let push = Value::Array(vec![
            Value::bulk("message"),
            Value::BulkString(Bytes::copy_from_slice(channel)),
            Value::BulkString(message),
        ]);

        let mut delivered = 0;
        for subscriber in subscribers {
            match subscriber.sender.try_send(push.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        session = %subscriber.id,
                        channel = %String::from_utf8_lossy(channel),
                        "subscriber queue full, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(session = %subscriber.id, "subscriber gone, skipping");
                }
            }
        }
        delivered
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.lock().await.len()
    }

    pub async fn subscriber_count(&self, channel: &[u8]) -> usize {
        self.channels
            .lock()
            .await
            .get(channel)
            .map_or(0, |entry| entry.subscribers.len())
    }
}
