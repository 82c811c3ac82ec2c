use crate::executor::TaskExecutor;
use crate::ClusterContext;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskq_core::{AckId, ResultEnvelope, Task};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Lease kept beyond a task's timeout while its result is recorded
pub const LEASE_GRACE: Duration = Duration::from_secs(60);

/// Entry on the task channel
#[derive(Debug)]
pub enum TaskMessage {
    Task { task: Task, ack: Option<AckId> },
    Stop,
}

/// Entry on the result channel
#[derive(Debug)]
pub enum ResultMessage {
    Result(ResultEnvelope),
    Stop,
}

/// Task channel receiver shared by every worker of a pool
pub type SharedTaskReceiver = Arc<Mutex<mpsc::Receiver<TaskMessage>>>;

/// Wall-clock time (ms) of the most recent completion in a pool
#[derive(Debug, Clone, Default)]
pub struct LastActivity(Arc<AtomicI64>);

impl LastActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completion now. The stored value never moves backwards.
    pub fn touch(&self) {
        self.0.fetch_max(Utc::now().timestamp_millis(), Ordering::AcqRel);
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        match self.0.load(Ordering::Acquire) {
            0 => None,
            ms => Utc.timestamp_millis_opt(ms).single(),
        }
    }
}

/// Execute tasks from the shared channel until a stop sentinel arrives.
///
/// The sentinel is forwarded to the result channel so the monitor can count
/// exiting workers. Returns the number of tasks executed.
pub async fn run_worker(
    ctx: &ClusterContext,
    rx: SharedTaskReceiver,
    tx: mpsc::Sender<ResultMessage>,
    activity: LastActivity,
) -> usize {
    let executor = TaskExecutor::new(ctx.registry.clone());
    let mut executed = 0;

    loop {
        // Hold the lock only while waiting for the next entry
        let message = rx.lock().await.recv().await;

        let (task, ack) = match message {
            Some(TaskMessage::Task { task, ack }) => (task, ack),
            Some(TaskMessage::Stop) | None => {
                let _ = tx.send(ResultMessage::Stop).await;
                break;
            }
        };

        if let Some(ack) = &ack {
            if !hold_lease(ctx, ack, &task).await {
                continue;
            }
        }

        info!("Executing task {} ({})", task.id, task.func);
        let execution = executor.execute(&task).await;

        let seconds = (execution.stopped_at - execution.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        ctx.metrics
            .observe_task(&task.func, execution.outcome.is_success(), seconds);

        let envelope = ResultEnvelope {
            task,
            outcome: execution.outcome,
            started_at: execution.started_at,
            stopped_at: execution.stopped_at,
            ack,
        };

        executed += 1;
        activity.touch();

        if tx.send(ResultMessage::Result(envelope)).await.is_err() {
            debug!("Result channel closed, worker exiting");
            break;
        }
    }

    debug!("Worker stopped after {} tasks", executed);
    executed
}

/// Extend the delivery's lease past the task's timeout before running it.
///
/// Returns false when the broker no longer holds the delivery for this
/// consumer. The task is then skipped and runs from its re-published copy.
async fn hold_lease(ctx: &ClusterContext, ack: &AckId, task: &Task) -> bool {
    match ctx.broker.renew(ack, task.timeout() + LEASE_GRACE).await {
        Ok(true) => true,
        Ok(false) => {
            warn!("Delivery {} of task {} was reclaimed, skipping", ack, task.id);
            false
        }
        Err(e) => {
            warn!(
                "Cannot renew delivery {} of task {} ({}), leaving it to expire",
                ack, task.id, e
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClusterConfig, TaskRegistry};
    use taskq_broker::{Broker, MemoryBroker};
    use taskq_core::Signature;
    use taskq_persistence::MemoryStore;

    fn context(broker: Arc<MemoryBroker>) -> ClusterContext {
        ClusterContext::new(
            ClusterConfig::default(),
            broker,
            Arc::new(MemoryStore::new()),
            TaskRegistry::with_builtins(),
        )
        .unwrap()
    }

    async fn leased_task(broker: &MemoryBroker) -> TaskMessage {
        let task = Task::new(Signature::new("hello"));
        broker.enqueue(task.to_bytes().unwrap()).await.unwrap();
        let delivery = broker.dequeue().await.unwrap().unwrap();
        TaskMessage::Task {
            task,
            ack: Some(delivery.ack),
        }
    }

    #[tokio::test]
    async fn test_pickup_extends_lease() {
        let broker = Arc::new(MemoryBroker::with_lease(Duration::from_millis(10)));
        let ctx = context(broker.clone());

        let (task_tx, task_rx) = mpsc::channel(4);
        let (result_tx, mut result_rx) = mpsc::channel(4);
        task_tx.send(leased_task(&broker).await).await.unwrap();
        task_tx.send(TaskMessage::Stop).await.unwrap();

        let executed = run_worker(
            &ctx,
            Arc::new(Mutex::new(task_rx)),
            result_tx,
            LastActivity::new(),
        )
        .await;
        assert_eq!(executed, 1);
        assert!(matches!(result_rx.recv().await, Some(ResultMessage::Result(_))));

        // Still leased until the monitor acknowledges it
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.reclaim_expired(), 0);
        assert_eq!(broker.in_flight(), 1);
    }

    #[tokio::test]
    async fn test_reclaimed_delivery_is_skipped() {
        let broker = Arc::new(MemoryBroker::with_lease(Duration::ZERO));
        let ctx = context(broker.clone());

        let (task_tx, task_rx) = mpsc::channel(4);
        let (result_tx, mut result_rx) = mpsc::channel(4);
        task_tx.send(leased_task(&broker).await).await.unwrap();
        task_tx.send(TaskMessage::Stop).await.unwrap();
        assert_eq!(broker.reclaim_expired(), 1);

        let executed = run_worker(
            &ctx,
            Arc::new(Mutex::new(task_rx)),
            result_tx,
            LastActivity::new(),
        )
        .await;
        assert_eq!(executed, 0);
        assert!(matches!(result_rx.recv().await, Some(ResultMessage::Stop)));
        assert_eq!(broker.queue_size().await.unwrap(), 1);
    }

    #[test]
    fn test_last_activity_is_monotonic() {
        let activity = LastActivity::new();
        assert!(activity.get().is_none());

        activity.touch();
        let first = activity.get().unwrap();

        // A stale writer cannot move it backwards
        activity.0.fetch_max(0, Ordering::AcqRel);
        assert_eq!(activity.get().unwrap(), first);

        activity.touch();
        assert!(activity.get().unwrap() >= first);
    }
}
