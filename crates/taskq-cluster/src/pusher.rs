use crate::worker::TaskMessage;
use crate::{ClusterContext, ClusterError, Result};
use taskq_core::Task;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Move payloads from the broker onto the task channel until `stop` is set.
///
/// The stop signal is checked after every attempt, so once it is set the
/// loop makes at most one more dequeue. An empty queue is polled again after
/// `poll_interval`, and broker errors are retried with backoff.
pub async fn run_pusher(
    ctx: &ClusterContext,
    tx: &mpsc::Sender<TaskMessage>,
    stop: &CancellationToken,
) {
    let mut failures = 0u32;

    loop {
        let wait = match pull_once(ctx, tx).await {
            Ok(true) => {
                failures = 0;
                None
            }
            Ok(false) => {
                failures = 0;
                Some(ctx.config.poll_interval())
            }
            Err(ClusterError::ChannelClosed) => {
                info!("Task channel closed, pusher exiting");
                break;
            }
            Err(e) => {
                let delay = ctx.config.retry.delay(failures);
                warn!("Pusher failed to dequeue ({}), retrying in {:?}", e, delay);
                failures = failures.saturating_add(1);
                Some(delay)
            }
        };

        if stop.is_cancelled() {
            break;
        }

        if let Some(wait) = wait {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = stop.cancelled() => break,
            }
        }
    }

    debug!("Pusher stopped");
}

/// Dequeue one payload and forward it. Returns false when the queue was empty.
///
/// Nothing is dequeued until the channel has room for it.
pub async fn pull_once(ctx: &ClusterContext, tx: &mpsc::Sender<TaskMessage>) -> Result<bool> {
    let permit = tx.reserve().await.map_err(|_| ClusterError::ChannelClosed)?;

    let delivery = match ctx.broker.dequeue().await? {
        Some(delivery) => delivery,
        None => return Ok(false),
    };

    let task = match Task::from_bytes(&delivery.payload) {
        Ok(task) => task,
        Err(e) => {
            // Undecodable payloads would be re-delivered forever
            error!("Discarding undecodable payload {}: {}", delivery.ack, e);
            ctx.broker.acknowledge(&delivery.ack).await?;
            return Ok(true);
        }
    };

    debug!("Pushing task {} ({})", task.id, task.func);
    permit.send(TaskMessage::Task {
        task,
        ack: Some(delivery.ack),
    });

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClusterConfig, TaskRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use taskq_broker::{Broker, BrokerError, Cache, MemoryBroker, MemoryCache};
    use taskq_core::{AckId, Backoff, Delivery, Signature};
    use taskq_persistence::MemoryStore;

    /// Broker that cannot be reached
    #[derive(Default)]
    struct UnreachableBroker {
        dequeues: AtomicUsize,
        cache: MemoryCache,
    }

    fn refused() -> BrokerError {
        BrokerError::Connection("connection refused".to_string())
    }

    #[async_trait]
    impl Broker for UnreachableBroker {
        async fn enqueue(&self, _payload: Vec<u8>) -> taskq_broker::Result<()> {
            Err(refused())
        }

        async fn dequeue(&self) -> taskq_broker::Result<Option<Delivery>> {
            self.dequeues.fetch_add(1, Ordering::SeqCst);
            Err(refused())
        }

        async fn queue_size(&self) -> taskq_broker::Result<usize> {
            Err(refused())
        }

        async fn purge_queue(&self) -> taskq_broker::Result<()> {
            Err(refused())
        }

        async fn acknowledge(&self, _ack: &AckId) -> taskq_broker::Result<()> {
            Err(refused())
        }

        async fn renew(&self, _ack: &AckId, _lease: Duration) -> taskq_broker::Result<bool> {
            Err(refused())
        }

        async fn ping(&self) -> taskq_broker::Result<()> {
            Err(refused())
        }

        fn cache(&self) -> &dyn Cache {
            &self.cache
        }
    }

    fn context(broker: Arc<dyn Broker>) -> ClusterContext {
        let config = ClusterConfig {
            // An error mistaken for an empty queue would wait a full minute
            poll_interval_ms: 60_000,
            retry: Backoff::new(1, 5),
            ..Default::default()
        };
        ClusterContext::new(config, broker, Arc::new(MemoryStore::new()), TaskRegistry::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_broker_errors_are_retried_with_backoff() {
        let broker = Arc::new(UnreachableBroker::default());
        let ctx = context(broker.clone());
        let (tx, mut rx) = mpsc::channel(4);
        let stop = CancellationToken::new();

        let pusher = {
            let stop = stop.clone();
            tokio::spawn(async move { run_pusher(&ctx, &tx, &stop).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(broker.dequeues.load(Ordering::SeqCst) >= 3);
        assert!(rx.try_recv().is_err());

        stop.cancel();
        tokio::time::timeout(Duration::from_millis(500), pusher)
            .await
            .expect("pusher did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_pull_once_is_an_error_when_unreachable() {
        let ctx = context(Arc::new(UnreachableBroker::default()));
        let (tx, _rx) = mpsc::channel(1);

        let err = pull_once(&ctx, &tx).await.unwrap_err();
        assert!(matches!(err, ClusterError::Broker(e) if e.is_transient()));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_discarded() {
        let broker = Arc::new(MemoryBroker::new());
        let ctx = context(broker.clone());
        let (tx, mut rx) = mpsc::channel(4);

        broker.enqueue(b"not a task".to_vec()).await.unwrap();
        let task = Task::new(Signature::new("hello"));
        broker.enqueue(task.to_bytes().unwrap()).await.unwrap();

        assert!(pull_once(&ctx, &tx).await.unwrap());
        assert!(rx.try_recv().is_err());
        assert_eq!(broker.in_flight(), 0);

        assert!(pull_once(&ctx, &tx).await.unwrap());
        match rx.try_recv() {
            Ok(TaskMessage::Task { task: pushed, ack }) => {
                assert_eq!(pushed.id, task.id);
                assert!(ack.is_some());
            }
            other => panic!("expected a task, got {:?}", other),
        }
        assert!(!pull_once(&ctx, &tx).await.unwrap());
    }

    #[tokio::test]
    async fn test_nothing_is_dequeued_while_channel_is_full() {
        let broker = Arc::new(MemoryBroker::new());
        let ctx = context(broker.clone());
        let (tx, mut rx) = mpsc::channel(1);

        for _ in 0..2 {
            let task = Task::new(Signature::new("hello"));
            broker.enqueue(task.to_bytes().unwrap()).await.unwrap();
        }
        assert!(pull_once(&ctx, &tx).await.unwrap());

        let blocked = tokio::time::timeout(Duration::from_millis(50), pull_once(&ctx, &tx)).await;
        assert!(blocked.is_err());
        assert_eq!(broker.queue_size().await.unwrap(), 1);
        assert_eq!(broker.in_flight(), 1);

        rx.recv().await.unwrap();
        assert!(pull_once(&ctx, &tx).await.unwrap());
        assert_eq!(broker.queue_size().await.unwrap(), 0);
    }
}
