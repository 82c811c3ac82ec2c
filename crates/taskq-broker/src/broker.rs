use crate::{BrokerError, Result};
use async_trait::async_trait;
use std::time::Duration;
use taskq_core::{AckId, Backoff, Delivery};
use tracing::warn;

/// Key/value cache reachable through a broker.
///
/// Entries written with a TTL disappear once it elapses; an evicted entry
/// reads exactly like one that was never written.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }
}

/// Message queue plus auxiliary cache shared by every process of a cluster.
///
/// Implementations guarantee that one payload is handed to at most one
/// `dequeue` caller until it is reclaimed, and report connectivity problems
/// as errors rather than as an empty queue.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<()>;

    /// Take the oldest waiting payload without blocking
    async fn dequeue(&self) -> Result<Option<Delivery>>;

    /// Best-effort count of waiting payloads
    async fn queue_size(&self) -> Result<usize>;

    async fn purge_queue(&self) -> Result<()>;

    /// Confirm a delivery was fully handled. Unknown handles are ignored.
    async fn acknowledge(&self, ack: &AckId) -> Result<()>;

    /// Keep a delivery leased for at least `lease` from now.
    ///
    /// Returns false when the delivery is no longer held by its consumer,
    /// because it was acknowledged or reclaimed for re-publishing.
    async fn renew(&self, ack: &AckId, lease: Duration) -> Result<bool>;

    async fn ping(&self) -> Result<()>;

    fn cache(&self) -> &dyn Cache;
}

/// Enqueue, retrying transient failures with backoff.
///
/// Re-publishing is safe because the payload carries its own task id.
pub async fn enqueue_with_retry(
    broker: &dyn Broker,
    payload: Vec<u8>,
    attempts: u32,
    backoff: Backoff,
) -> Result<()> {
    let mut attempt = 0;
    loop {
        match broker.enqueue(payload.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = backoff.delay(attempt);
                warn!("Enqueue failed ({}), retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Error returned when a response does not match the request that was sent
pub(crate) fn unexpected(what: &str) -> BrokerError {
    BrokerError::UnexpectedResponse(what.to_string())
}
