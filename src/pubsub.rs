use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio::time;
use tracing::{debug, warn};

use crate::errors::PubSubError;

pub type MessageStream = Pin<Box<dyn Stream<Item = String> + Send>>;

#[async_trait]
pub trait PubSub: Send {
    /// Returns the number of subscribers that received the message.
    async fn publish(&mut self, channel: &str, message: &str) -> Result<usize, PubSubError>;

    /// Resolves once the subscription is active.
    async fn subscribe(&mut self, channel: &str) -> Result<MessageStream, PubSubError>;
}

/// In-process broker, one broadcast channel per topic.
#[derive(Debug, Clone, Default)]
pub struct MemoryPubSub {
    topics: Arc<Mutex<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        use std::collections::hash_map::Entry;

        let mut topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
        match topics.entry(channel.to_string()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                let (tx, _) = broadcast::channel(1024);
                e.insert(tx.clone());
                tx
            }
        }
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&mut self, channel: &str, message: &str) -> Result<usize, PubSubError> {
        let topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
        Ok(topics
            .get(channel)
            .map(|tx| tx.send(message.to_string()).unwrap_or(0))
            .unwrap_or(0))
    }

    async fn subscribe(&mut self, channel: &str) -> Result<MessageStream, PubSubError> {
        let rx = self.sender(channel).subscribe();
        let stream = stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "subscriber lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Redis pub/sub. Subscriptions get their own connection since a
/// subscribed connection can't issue other commands.
pub struct RedisPubSub {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisPubSub {
    pub async fn connect(url: &str) -> Result<Self, PubSubError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }
}

#[async_trait]
impl PubSub for RedisPubSub {
    async fn publish(&mut self, channel: &str, message: &str) -> Result<usize, PubSubError> {
        Ok(self.conn.publish(channel, message).await?)
    }

    async fn subscribe(&mut self, channel: &str) -> Result<MessageStream, PubSubError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|source| PubSubError::Subscribe {
                channel: channel.to_string(),
                source,
            })?;
        debug!(channel, "subscribed");

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let payload = match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(err) => {
                    warn!(channel = msg.get_channel_name(), cause = %err, "dropping payload");
                    None
                }
            };
            futures::future::ready(payload)
        });
        Ok(Box::pin(stream))
    }
}

/// Collects up to `expected` messages, stopping early when the stream ends
/// or `timeout` elapses.
pub async fn collect(mut stream: MessageStream, expected: usize, timeout: Duration) -> Vec<String> {
    let mut received = Vec::with_capacity(expected);
    let deadline = time::sleep(timeout);
    tokio::pin!(deadline);

    while received.len() < expected {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(msg) => received.push(msg),
                None => break,
            },
            _ = &mut deadline => {
                debug!(received = received.len(), expected, "collect timed out");
                break;
            }
        }
    }

    received
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_then_publish() {
        let mut pubsub = MemoryPubSub::new();
        let channel = "test_channel";

        let mut stream = pubsub.subscribe(channel).await.unwrap();
        let result = pubsub.publish(channel, "test_value").await.unwrap();

        // one receiver
        assert_eq!(result, 1);
        assert_eq!(stream.next().await, Some("test_value".to_owned()));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let mut pubsub = MemoryPubSub::new();
        assert_eq!(pubsub.publish("nobody", "hello").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_two_subscribers_see_every_message() {
        let mut pubsub = MemoryPubSub::new();
        let first = pubsub.subscribe("ch").await.unwrap();
        let second = pubsub.subscribe("ch").await.unwrap();

        for msg in ["a", "b", "c"] {
            assert_eq!(pubsub.publish("ch", msg).await.unwrap(), 2);
        }

        let timeout = Duration::from_millis(200);
        assert_eq!(collect(first, 3, timeout).await, vec!["a", "b", "c"]);
        assert_eq!(collect(second, 3, timeout).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_collect_times_out() {
        let mut pubsub = MemoryPubSub::new();
        let stream = pubsub.subscribe("quiet").await.unwrap();
        pubsub.publish("quiet", "only").await.unwrap();

        let received = collect(stream, 5, Duration::from_millis(50)).await;
        assert_eq!(received, vec!["only"]);
    }

    #[tokio::test]
    async fn test_collect_stops_when_stream_ends() {
        let stream: MessageStream = Box::pin(stream::iter(vec!["x".to_owned()]));
        let received = collect(stream, 3, Duration::from_secs(5)).await;
        assert_eq!(received, vec!["x"]);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_publish_subscribe() {
        let url = "redis://127.0.0.1:6379/";
        let mut pubsub = RedisPubSub::connect(url).await.unwrap();
        let channel = "redis-showcase:test:channel";

        let stream = pubsub.subscribe(channel).await.unwrap();
        assert!(pubsub.publish(channel, "hello").await.unwrap() >= 1);

        let received = collect(stream, 1, Duration::from_secs(2)).await;
        assert_eq!(received, vec!["hello"]);
    }
}
