use crate::worker::ResultMessage;
use crate::{ClusterContext, Result};
use std::future::Future;
use std::time::Duration;
use taskq_broker::enqueue_with_retry;
use taskq_core::{CacheKeys, IterMembership, ResultEnvelope, Task, TaskError, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Records results in the cache and durable store and advances chains
/// and iterable fan-outs.
pub struct Monitor {
    ctx: ClusterContext,
    keys: CacheKeys,
    inline: bool,
}

impl Monitor {
    /// Monitor for a running cluster: chain steps go back through the broker
    pub fn new(ctx: ClusterContext) -> Self {
        let keys = ctx.keys();
        Monitor {
            ctx,
            keys,
            inline: false,
        }
    }

    /// Monitor for sync mode: chain steps are handed back to the caller
    pub fn inline(ctx: ClusterContext) -> Self {
        Monitor {
            inline: true,
            ..Self::new(ctx)
        }
    }

    /// Record one result envelope.
    ///
    /// Returns the next chain step when it has to be executed inline.
    pub async fn record(&self, envelope: ResultEnvelope) -> Option<Task> {
        let (task, ack) = match envelope.into_record() {
            Ok(record) => record,
            Err(e) => {
                error!("Dropping result: {}", e);
                return None;
            }
        };

        info!(
            "Task {} ({}) finished: {}",
            task.id,
            task.func,
            task.status().as_str()
        );

        if task.cached {
            self.retry("cache result", || self.save_cached(&task)).await;
        }

        if let Some(iter) = task.iter {
            self.retry("assemble iterable", || self.assemble_iter(&task, iter))
                .await;
        }

        if !task.cache_only {
            self.retry("save result", || async { self.save_durable(&task) })
                .await;
        }

        let follow_up = match task.next_chain_step() {
            Some(next) if self.inline => Some(next),
            Some(next) => {
                self.submit_chain_step(next).await;
                None
            }
            None => None,
        };

        if let Some(ack) = ack {
            if let Err(e) = self.ctx.broker.acknowledge(&ack).await {
                warn!("Failed to acknowledge delivery {}: {}", ack, e);
            }
        }

        follow_up
    }

    /// Run `op` up to the configured number of attempts. A final failure is
    /// logged and the write is dropped.
    async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.ctx.config.attempts();
        for attempt in 0..attempts {
            match op().await {
                Ok(value) => return Some(value),
                Err(e) if attempt + 1 < attempts => {
                    let delay = self.ctx.config.retry.delay(attempt);
                    warn!("Failed to {} ({}), retrying in {:?}", what, e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!("Failed to {} after {} attempts: {}", what, attempts, e);
                    self.ctx.metrics.persistence_failures_total.inc();
                }
            }
        }
        None
    }

    fn ttl(&self, task: &Task) -> Option<Duration> {
        task.cache_ttl().or_else(|| self.ctx.config.cache_ttl())
    }

    fn save_durable(&self, task: &Task) -> Result<()> {
        self.ctx.store.save(task)?;
        Ok(())
    }

    /// Write the record under its task key and append it to its group list
    async fn save_cached(&self, task: &Task) -> Result<()> {
        let cache = self.ctx.broker.cache();
        let ttl = self.ttl(task);
        let key = self.keys.task(&task.id);

        cache.set(&key, task.to_bytes()?, ttl).await?;

        if let Some(group) = &task.group {
            let group_key = self.keys.group(group);
            let mut members = self.group_members(&group_key).await?;
            if !members.contains(&key) {
                members.push(key);
            }
            cache
                .set(&group_key, serde_json::to_vec(&members)?, ttl)
                .await?;
        }

        debug!("Cached result of task {}", task.id);
        Ok(())
    }

    async fn group_members(&self, group_key: &str) -> Result<Vec<String>> {
        match self.ctx.broker.cache().get(group_key).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    /// Once every member of a fan-out is cached, store the ordered result
    /// list under the fan-out id and drop the member entries.
    async fn assemble_iter(&self, task: &Task, iter: IterMembership) -> Result<()> {
        let group = match &task.group {
            Some(group) => group,
            None => return Ok(()),
        };
        let cache = self.ctx.broker.cache();
        let group_key = self.keys.group(group);

        let members = self.group_members(&group_key).await?;
        if members.len() < iter.count {
            return Ok(());
        }

        let mut records = Vec::with_capacity(members.len());
        for key in &members {
            if let Some(bytes) = cache.get(key).await? {
                records.push(Task::from_bytes(&bytes)?);
            }
        }
        if records.len() < iter.count {
            warn!(
                "Iterable {} has {} of {} member results cached",
                group,
                records.len(),
                iter.count
            );
            return Ok(());
        }
        records.sort_by_key(|record| record.iter.map(|m| m.index));

        let args_key = self.keys.iter_args(group);
        let args: Vec<Value> = match cache.get(&args_key).await? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => records.iter().map(|r| Value::Array(r.args.clone())).collect(),
        };

        let id = iter_id(group)?;

        let assembled = Task {
            id,
            func: task.func.clone(),
            args,
            kwargs: task.kwargs.clone(),
            group: None,
            cached: iter.cached,
            cache_ttl_secs: task.cache_ttl_secs,
            cache_only: iter.cached,
            sync: task.sync,
            chain: Vec::new(),
            chain_index: None,
            iter: None,
            timeout_ms: task.timeout_ms,
            created_at: records.iter().map(|r| r.created_at).min().unwrap_or(task.created_at),
            started_at: records.iter().filter_map(|r| r.started_at).min(),
            stopped_at: records.iter().filter_map(|r| r.stopped_at).max(),
            result: Some(Value::Array(
                records
                    .iter()
                    .map(|r| r.result.clone().unwrap_or(Value::Null))
                    .collect(),
            )),
            success: Some(records.iter().all(|r| r.success == Some(true))),
        };

        if assembled.cached {
            self.save_cached(&assembled).await?;
        } else {
            self.save_durable(&assembled)?;
        }

        let mut stale = members;
        stale.push(group_key);
        stale.push(args_key);
        cache.delete_many(&stale).await?;

        self.ctx.metrics.iterables_assembled_total.inc();
        info!("Assembled {} results of iterable {}", iter.count, id);
        Ok(())
    }

    async fn submit_chain_step(&self, next: Task) {
        let payload = match next.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Cannot encode chain step {}: {}", next.id, e);
                return;
            }
        };

        let result = enqueue_with_retry(
            self.ctx.broker.as_ref(),
            payload,
            self.ctx.config.attempts(),
            self.ctx.config.retry,
        )
        .await;

        match result {
            Ok(()) => {
                self.ctx.metrics.chain_steps_total.inc();
                debug!(
                    "Submitted chain step {} ({}) of group {:?}",
                    next.chain_index.unwrap_or_default(),
                    next.func,
                    next.group
                );
            }
            Err(e) => error!("Failed to submit chain step {}: {}", next.id, e),
        }
    }
}

/// Id of the assembled record: the fan-out group label is its task id
fn iter_id(group: &str) -> Result<Uuid> {
    Uuid::parse_str(group).map_err(|_| TaskError::InvalidIterGroup(group.to_string()).into())
}

/// Drain the result channel until `workers` stop sentinels were seen.
///
/// Returns chain steps that have to run inline.
pub async fn run_monitor(
    monitor: &Monitor,
    rx: &mut mpsc::Receiver<ResultMessage>,
    workers: usize,
) -> Vec<Task> {
    let mut stopped = 0;
    let mut follow_ups = Vec::new();

    while stopped < workers {
        match rx.recv().await {
            Some(ResultMessage::Result(envelope)) => {
                if let Some(next) = monitor.record(envelope).await {
                    follow_ups.push(next);
                }
            }
            Some(ResultMessage::Stop) => stopped += 1,
            None => break,
        }
    }

    debug!("Monitor stopped");
    follow_ups
}
