use crate::monitor::{run_monitor, Monitor};
use crate::worker::{run_worker, LastActivity, TaskMessage};
use crate::{ClusterContext, ClusterError, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use taskq_core::Task;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Execute a task inline through the same worker and monitor code the
/// cluster runs, then any chain steps it produces.
///
/// Execution failures are recorded as results, never returned as errors.
pub async fn run_sync(ctx: &ClusterContext, task: Task) -> Result<()> {
    let monitor = Monitor::inline(ctx.clone());
    let mut pending = VecDeque::from([task]);

    while let Some(task) = pending.pop_front() {
        debug!("Running task {} ({}) inline", task.id, task.func);

        let (task_tx, task_rx) = mpsc::channel(2);
        let (result_tx, mut result_rx) = mpsc::channel(2);

        task_tx
            .send(TaskMessage::Task { task, ack: None })
            .await
            .map_err(|_| ClusterError::ChannelClosed)?;
        task_tx
            .send(TaskMessage::Stop)
            .await
            .map_err(|_| ClusterError::ChannelClosed)?;
        drop(task_tx);

        let receiver = Arc::new(Mutex::new(task_rx));
        run_worker(ctx, receiver, result_tx, LastActivity::new()).await;

        let follow_ups = run_monitor(&monitor, &mut result_rx, 1).await;
        pending.extend(follow_ups);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClusterConfig, TaskRegistry};
    use serde_json::json;
    use taskq_broker::{Broker, MemoryBroker};
    use taskq_core::Signature;
    use taskq_persistence::{GroupFilter, MemoryStore, TaskStore};

    fn context() -> (ClusterContext, Arc<MemoryBroker>, Arc<MemoryStore>) {
        let broker = Arc::new(MemoryBroker::new());
        let store = Arc::new(MemoryStore::new());
        let ctx = ClusterContext::new(
            ClusterConfig::default(),
            broker.clone(),
            store.clone(),
            TaskRegistry::with_builtins(),
        )
        .unwrap();
        (ctx, broker, store)
    }

    #[tokio::test]
    async fn test_sync_result_is_immediately_stored() {
        let (ctx, broker, store) = context();
        let task = Task::builder(Signature::new("math.floor").arg(2.5))
            .sync(true)
            .build()
            .unwrap();
        let id = task.id;

        run_sync(&ctx, task).await.unwrap();

        assert_eq!(store.get(&id).unwrap().unwrap().result, Some(json!(2)));
        assert_eq!(broker.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sync_failure_is_recorded_not_raised() {
        let (ctx, _broker, store) = context();
        let task = Task::builder(Signature::new("math.popysign"))
            .sync(true)
            .build()
            .unwrap();
        let id = task.id;

        run_sync(&ctx, task).await.unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap().success, Some(false));
    }

    #[tokio::test]
    async fn test_sync_chain_runs_every_step() {
        let (ctx, broker, store) = context();
        let task = Task::builder(Signature::new("math.floor").arg(1))
            .group("c")
            .sync(true)
            .chain(
                vec![
                    Signature::new("math.copysign").arg(1).arg(-1),
                    Signature::new("math.floor").arg(2),
                ],
                0,
            )
            .build()
            .unwrap();

        run_sync(&ctx, task).await.unwrap();

        let results: Vec<_> = store
            .query("c", GroupFilter::All)
            .unwrap()
            .into_iter()
            .filter_map(|t| t.result)
            .collect();
        assert_eq!(results, vec![json!(1), json!(-1.0), json!(2)]);
        assert_eq!(broker.queue_size().await.unwrap(), 0);
    }
}
