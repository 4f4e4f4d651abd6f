//! Post-commit poke fanout.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Payload-free "something changed, pull again" marker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Poke;

/// A failed publish.
#[derive(Error, Debug)]
#[error("publish to {channel} failed: {reason}")]
pub struct PublishError {
    /// Target channel.
    pub channel: String,
    /// Failure description.
    pub reason: String,
}

/// Delivers pokes to channel subscribers.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one poke.
    async fn publish(&self, channel: &str, poke: Poke) -> Result<(), PublishError>;
}

/// Discards every poke.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, _channel: &str, _poke: Poke) -> Result<(), PublishError> {
        Ok(())
    }
}

/// In-process publisher over a tokio broadcast channel.
///
/// Subscribers receive `(channel, Poke)` pairs and filter for the channels
/// they care about.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<(String, Poke)>,
}

impl BroadcastPublisher {
    /// Creates a publisher buffering up to `capacity` pokes per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to every poke published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<(String, Poke)> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, channel: &str, poke: Poke) -> Result<(), PublishError> {
        // No subscribers is not a failure.
        let _ = self.sender.send((channel.to_string(), poke));
        Ok(())
    }
}

/// Fire-and-forget notifier.
#[derive(Clone)]
pub struct Fanout {
    publisher: Arc<dyn Publisher>,
    timeout: Duration,
}

impl Fanout {
    /// Creates a fanout over a publisher.
    pub fn new(publisher: Arc<dyn Publisher>, timeout: Duration) -> Self {
        Self { publisher, timeout }
    }

    /// Pokes every distinct channel once, concurrently.
    ///
    /// Failures and timeouts are logged and otherwise ignored.
    pub async fn notify<I>(&self, channels: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let channels: BTreeSet<String> = channels.into_iter().map(Into::into).collect();
        if channels.is_empty() {
            return;
        }

        let publishes = channels.iter().map(|channel| async move {
            match tokio::time::timeout(self.timeout, self.publisher.publish(channel, Poke)).await {
                Ok(Ok(())) => debug!(channel = %channel, "poked"),
                Ok(Err(err)) => warn!(channel = %channel, error = %err, "poke failed"),
                Err(_) => warn!(channel = %channel, timeout = ?self.timeout, "poke timed out"),
            }
        });
        join_all(publishes).await;
    }

    /// Runs [`Fanout::notify`] on a background task.
    pub fn spawn_notify<I>(&self, channels: I) -> tokio::task::JoinHandle<()>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        let fanout = self.clone();
        tokio::spawn(async move { fanout.notify(channels).await })
    }
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for Recording {
        async fn publish(&self, channel: &str, _poke: Poke) -> Result<(), PublishError> {
            if channel == "broken" {
                return Err(PublishError {
                    channel: channel.to_string(),
                    reason: "down".into(),
                });
            }
            if channel == "slow" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.seen.lock().push(channel.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn deduplicates_channels() {
        let publisher = Arc::new(Recording::default());
        let fanout = Fanout::new(publisher.clone(), Duration::from_secs(1));

        fanout.notify(["u1", "u2", "u1"]).await;

        let mut seen = publisher.seen.lock().clone();
        seen.sort();
        assert_eq!(seen, vec!["u1", "u2"]);
    }

    #[tokio::test]
    async fn failures_and_timeouts_are_swallowed() {
        let publisher = Arc::new(Recording::default());
        let fanout = Fanout::new(publisher.clone(), Duration::from_millis(20));

        fanout.notify(["broken", "slow", "ok"]).await;

        assert_eq!(*publisher.seen.lock(), vec!["ok"]);
    }

    #[tokio::test]
    async fn broadcast_delivers_to_subscribers() {
        let publisher = BroadcastPublisher::new(8);
        publisher.publish("nobody-listening", Poke).await.unwrap();

        let mut rx = publisher.subscribe();
        let fanout = Fanout::new(Arc::new(publisher), Duration::from_secs(1));
        fanout.spawn_notify(vec!["room-1".to_string()]).await.unwrap();

        let (channel, poke) = rx.recv().await.unwrap();
        assert_eq!(channel, "room-1");
        assert_eq!(poke, Poke);
    }
}
