use crate::monitor::{run_monitor, Monitor};
use crate::pusher::run_pusher;
use crate::worker::{run_worker, LastActivity, TaskMessage};
use crate::{ClusterContext, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// One pusher, a pool of workers and a monitor sharing a broker
pub struct Cluster;

impl Cluster {
    /// Check the broker is reachable and spawn every stage
    pub async fn start(ctx: ClusterContext) -> Result<ClusterHandle> {
        ctx.broker.ping().await?;

        let cluster_id = ctx.config.generate_cluster_id();
        let workers = ctx.config.workers;
        let stop = CancellationToken::new();
        let activity = LastActivity::new();

        let (task_tx, task_rx) = mpsc::channel(ctx.config.prefetch());
        let (result_tx, mut result_rx) = mpsc::channel(ctx.config.queue_limit);
        let task_rx = Arc::new(Mutex::new(task_rx));

        let pusher = {
            let ctx = ctx.clone();
            let tx = task_tx.clone();
            let stop = stop.clone();
            tokio::spawn(async move { run_pusher(&ctx, &tx, &stop).await })
        };

        let worker_handles = (0..workers)
            .map(|_| {
                let ctx = ctx.clone();
                let rx = task_rx.clone();
                let tx = result_tx.clone();
                let activity = activity.clone();
                tokio::spawn(async move { run_worker(&ctx, rx, tx, activity).await })
            })
            .collect();
        drop(result_tx);

        let monitor = {
            let monitor = Monitor::new(ctx.clone());
            tokio::spawn(async move {
                run_monitor(&monitor, &mut result_rx, workers).await;
            })
        };

        info!("Cluster {} started with {} workers", cluster_id, workers);

        Ok(ClusterHandle {
            cluster_id,
            stop,
            task_tx,
            pusher,
            workers: worker_handles,
            monitor,
            activity,
        })
    }
}

/// Handle to a running cluster
pub struct ClusterHandle {
    cluster_id: String,
    stop: CancellationToken,
    task_tx: mpsc::Sender<TaskMessage>,
    pusher: JoinHandle<()>,
    workers: Vec<JoinHandle<usize>>,
    monitor: JoinHandle<()>,
    activity: LastActivity,
}

impl ClusterHandle {
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// When a worker last completed a task
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.activity.get()
    }

    /// Ordered shutdown: stop intake, let workers drain the task channel,
    /// then let the monitor drain the result channel.
    pub async fn stop(self) -> Result<()> {
        info!("Stopping cluster {}", self.cluster_id);
        self.stop.cancel();

        if let Err(e) = self.pusher.await {
            error!("Pusher task failed: {}", e);
        }

        for _ in 0..self.workers.len() {
            if self.task_tx.send(TaskMessage::Stop).await.is_err() {
                break;
            }
        }
        drop(self.task_tx);

        let mut executed = 0;
        for worker in self.workers {
            match worker.await {
                Ok(count) => executed += count,
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        if let Err(e) = self.monitor.await {
            error!("Monitor task failed: {}", e);
        }

        info!("Cluster {} stopped after {} tasks", self.cluster_id, executed);
        Ok(())
    }
}
