use crate::{Broker, Cache, Result};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use taskq_core::{AckId, Delivery};
use tracing::{debug, warn};

/// Default lease before an unacknowledged delivery is handed out again
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// A delivery handed out but not yet acknowledged
struct Leased {
    payload: Vec<u8>,
    expires_at: Instant,
}

/// In-process FIFO broker with delivery leases and a TTL cache
pub struct MemoryBroker {
    queue: Mutex<VecDeque<Vec<u8>>>,
    in_flight: Mutex<HashMap<AckId, Leased>>,
    next_ack: AtomicU64,
    lease: Duration,
    cache: MemoryCache,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_lease(DEFAULT_LEASE)
    }

    pub fn with_lease(lease: Duration) -> Self {
        MemoryBroker {
            queue: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(1),
            lease,
            cache: MemoryCache::new(),
        }
    }

    /// Number of deliveries awaiting acknowledgement
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Put deliveries whose lease expired back on the queue
    pub fn reclaim_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Vec<u8>> = {
            let mut in_flight = self.in_flight.lock();
            let ids: Vec<AckId> = in_flight
                .iter()
                .filter(|(_, leased)| leased.expires_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| in_flight.remove(id))
                .map(|leased| leased.payload)
                .collect()
        };

        let count = expired.len();
        if count > 0 {
            warn!("Re-publishing {} deliveries with expired leases", count);
            let mut queue = self.queue.lock();
            for payload in expired {
                queue.push_back(payload);
            }
        }
        count
    }

    pub fn memory_cache(&self) -> &MemoryCache {
        &self.cache
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn enqueue(&self, payload: Vec<u8>) -> Result<()> {
        self.queue.lock().push_back(payload);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>> {
        let payload = match self.queue.lock().pop_front() {
            Some(payload) => payload,
            None => return Ok(None),
        };

        let ack = AckId(self.next_ack.fetch_add(1, Ordering::Relaxed).to_string());
        self.in_flight.lock().insert(
            ack.clone(),
            Leased {
                payload: payload.clone(),
                expires_at: Instant::now() + self.lease,
            },
        );

        Ok(Some(Delivery { ack, payload }))
    }

    async fn queue_size(&self) -> Result<usize> {
        Ok(self.queue.lock().len())
    }

    async fn purge_queue(&self) -> Result<()> {
        let mut queue = self.queue.lock();
        debug!("Purging {} queued payloads", queue.len());
        queue.clear();
        Ok(())
    }

    async fn acknowledge(&self, ack: &AckId) -> Result<()> {
        if self.in_flight.lock().remove(ack).is_none() {
            debug!("Acknowledged unknown delivery {}", ack);
        }
        Ok(())
    }

    async fn renew(&self, ack: &AckId, lease: Duration) -> Result<bool> {
        match self.in_flight.lock().get_mut(ack) {
            Some(leased) => {
                leased.expires_at = leased.expires_at.max(Instant::now() + lease);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn cache(&self) -> &dyn Cache {
        &self.cache
    }
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

/// In-process key/value cache with per-entry TTL
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        MemoryCache {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Lazily evict the expired entry
        let mut entries = self.entries.write();
        if entries.get(key).map_or(false, |entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let broker = MemoryBroker::new();

        broker.enqueue(b"first".to_vec()).await.unwrap();
        broker.enqueue(b"second".to_vec()).await.unwrap();
        assert_eq!(broker.queue_size().await.unwrap(), 2);

        let first = broker.dequeue().await.unwrap().unwrap();
        let second = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!(second.payload, b"second");
        assert_ne!(first.ack, second.ack);

        assert!(broker.dequeue().await.unwrap().is_none());
        assert_eq!(broker.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_clears_lease() {
        let broker = MemoryBroker::with_lease(Duration::ZERO);
        broker.enqueue(b"task".to_vec()).await.unwrap();

        let delivery = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(broker.in_flight(), 1);

        broker.acknowledge(&delivery.ack).await.unwrap();
        assert_eq!(broker.in_flight(), 0);
        assert_eq!(broker.reclaim_expired(), 0);

        // Acknowledging twice is harmless
        broker.acknowledge(&delivery.ack).await.unwrap();
    }

    #[tokio::test]
    async fn test_reclaim_expired_republishes() {
        let broker = MemoryBroker::with_lease(Duration::from_millis(10));
        broker.enqueue(b"task".to_vec()).await.unwrap();

        let _lost = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(broker.reclaim_expired(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.reclaim_expired(), 1);
        assert_eq!(broker.queue_size().await.unwrap(), 1);

        let again = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(again.payload, b"task");
    }

    #[tokio::test]
    async fn test_renew_extends_lease() {
        let broker = MemoryBroker::with_lease(Duration::from_millis(10));
        broker.enqueue(b"task".to_vec()).await.unwrap();

        let delivery = broker.dequeue().await.unwrap().unwrap();
        assert!(broker
            .renew(&delivery.ack, Duration::from_secs(60))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.reclaim_expired(), 0);
        assert_eq!(broker.in_flight(), 1);

        broker.acknowledge(&delivery.ack).await.unwrap();
        assert!(!broker
            .renew(&delivery.ack, Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_reclaimed_delivery_cannot_be_renewed() {
        let broker = MemoryBroker::with_lease(Duration::ZERO);
        broker.enqueue(b"task".to_vec()).await.unwrap();

        let delivery = broker.dequeue().await.unwrap().unwrap();
        assert_eq!(broker.reclaim_expired(), 1);

        assert!(!broker
            .renew(&delivery.ack, Duration::from_secs(60))
            .await
            .unwrap());
        assert_eq!(broker.queue_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_queue() {
        let broker = MemoryBroker::new();
        for i in 0..5u8 {
            broker.enqueue(vec![i]).await.unwrap();
        }

        broker.purge_queue().await.unwrap();
        assert_eq!(broker.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cache_ttl_eviction() {
        let cache = MemoryCache::new();
        cache
            .set("short", b"1".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        cache.set("forever", b"2".to_vec(), None).await.unwrap();

        assert_eq!(cache.get("short").await.unwrap(), Some(b"1".to_vec()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(cache.get("short").await.unwrap(), None);
        assert_eq!(cache.get("forever").await.unwrap(), Some(b"2".to_vec()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_delete_and_clear() {
        let broker = MemoryBroker::new();
        let cache = broker.cache();

        cache.set("a", b"1".to_vec(), None).await.unwrap();
        cache.set("b", b"2".to_vec(), None).await.unwrap();
        cache.set("c", b"3".to_vec(), None).await.unwrap();

        cache.delete_many(&["a".to_string(), "b".to_string()]).await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("c").await.unwrap().is_some());

        cache.clear().await.unwrap();
        assert!(broker.memory_cache().is_empty());
    }
}
