use crate::wait::poll;
use crate::{Chain, ClientError, GroupQuery, Result, SubmitOptions, Wait};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use taskq_broker::{enqueue_with_retry, RemoteBroker};
use taskq_cluster::{run_sync, ClusterConfig, ClusterContext, TaskRegistry};
use taskq_core::{CacheKeys, IterMembership, Signature, Task, TaskBuilder, TaskId, Value};
use taskq_persistence::{sort_records, GroupFilter, TaskStore};
use tracing::{debug, info};
use uuid::Uuid;

/// Submission and query API over a cluster's broker and stores
#[derive(Clone)]
pub struct TaskClient {
    ctx: ClusterContext,
    keys: CacheKeys,
}

impl TaskClient {
    pub fn new(ctx: ClusterContext) -> Self {
        let keys = ctx.keys();
        TaskClient { ctx, keys }
    }

    /// Connect to a `tq-broker` and read results from `store`.
    ///
    /// `registry` is only consulted by sync submissions.
    pub async fn connect(
        config: ClusterConfig,
        store: Arc<dyn TaskStore>,
        registry: TaskRegistry,
    ) -> Result<Self> {
        let broker = RemoteBroker::connect(config.broker_address.clone()).await?;
        let ctx = ClusterContext::new(config, Arc::new(broker), store, registry)?;
        Ok(Self::new(ctx))
    }

    pub fn context(&self) -> &ClusterContext {
        &self.ctx
    }

    /// Start building a chain owned by this client
    pub fn chain(&self) -> Chain {
        Chain::new(self.clone())
    }

    fn builder(&self, signature: Signature, options: &SubmitOptions) -> Result<TaskBuilder> {
        let config = &self.ctx.config;
        let cache_ttl_secs = options
            .cache_ttl
            .map(|ttl| ttl.as_secs())
            .or(config.cache_ttl_secs);
        let timeout_ms = match options.timeout {
            Some(timeout) => timeout_millis(timeout)?,
            None => u64::from(config.timeout_secs).saturating_mul(1000),
        };

        let mut builder = Task::builder(signature)
            .cached(options.cached.unwrap_or(config.cached))
            .cache_ttl_secs(cache_ttl_secs)
            .sync(options.sync.unwrap_or(config.sync))
            .timeout_ms(Some(timeout_ms));
        if let Some(group) = &options.group {
            builder = builder.group(group.clone());
        }
        Ok(builder)
    }

    /// Run a sync task inline, otherwise publish it to the broker
    async fn dispatch(&self, task: Task) -> Result<()> {
        if task.sync {
            run_sync(&self.ctx, task).await?;
            return Ok(());
        }

        let task_id = task.id;
        enqueue_with_retry(
            self.ctx.broker.as_ref(),
            task.to_bytes()?,
            self.ctx.config.attempts(),
            self.ctx.config.retry,
        )
        .await?;
        debug!("Enqueued task {}", task_id);
        Ok(())
    }

    /// Submit one task and return its id
    pub async fn submit(&self, signature: Signature, options: SubmitOptions) -> Result<TaskId> {
        let task = self.builder(signature, &options)?.build()?;
        let task_id = task.id;

        info!("Submitting task {} ({})", task_id, task.func);
        self.dispatch(task).await?;
        Ok(task_id)
    }

    /// Fan `func` out over `sequence`, one task per element.
    ///
    /// An element that is a JSON array is spread as positional arguments,
    /// anything else is passed as the single argument. The ordered result
    /// list becomes available under the returned id once every member
    /// finished. `options.group` is ignored.
    pub async fn submit_iterable(
        &self,
        func: impl Into<String>,
        sequence: Vec<Value>,
        options: SubmitOptions,
    ) -> Result<TaskId> {
        if sequence.is_empty() {
            return Err(ClientError::EmptyIterable);
        }

        let func = func.into();
        let iter_id = Uuid::new_v4();
        let group = iter_id.to_string();
        let count = sequence.len();
        let iter_cached = options.cached.unwrap_or(self.ctx.config.cached);

        let member_options = SubmitOptions {
            group: Some(group.clone()),
            cached: Some(true),
            ..options
        };
        let ttl = member_options
            .cache_ttl
            .or_else(|| self.ctx.config.cache_ttl());

        self.ctx
            .broker
            .cache()
            .set(
                &self.keys.iter_args(&group),
                serde_json::to_vec(&sequence)?,
                ttl,
            )
            .await?;

        let mut members = Vec::with_capacity(count);
        for (index, element) in sequence.into_iter().enumerate() {
            let args = match element {
                Value::Array(items) => items,
                other => vec![other],
            };
            let task = self
                .builder(Signature::new(func.clone()).args(args), &member_options)?
                .cache_only(true)
                .iter(IterMembership {
                    count,
                    index,
                    cached: iter_cached,
                })
                .build()?;
            members.push(task);
        }

        info!("Submitting iterable {} ({} x {})", iter_id, count, func);
        for task in members {
            self.dispatch(task).await?;
        }

        Ok(iter_id)
    }

    /// Submit `steps` as a chain. Each step is published only after the
    /// previous one finished. Returns the chain's group label.
    pub async fn submit_chain(&self, steps: Vec<Signature>, options: SubmitOptions) -> Result<String> {
        let (first, rest) = steps.split_first().ok_or(ClientError::EmptyChain)?;
        let group = options
            .group
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let task = self
            .builder(first.clone(), &options)?
            .group(group.clone())
            .chain(rest.to_vec(), 0)
            .build()?;

        info!("Submitting chain {} ({} steps)", group, steps.len());
        self.dispatch(task).await?;
        Ok(group)
    }

    async fn read_task(&self, id: &TaskId, cached: bool) -> Result<Option<Task>> {
        if cached {
            match self.ctx.broker.cache().get(&self.keys.task(id)).await? {
                Some(bytes) => Ok(Some(Task::from_bytes(&bytes)?)),
                None => Ok(None),
            }
        } else {
            Ok(self.ctx.store.get(id)?)
        }
    }

    async fn cached_members(&self, group: &str) -> Result<Vec<String>> {
        match self.ctx.broker.cache().get(&self.keys.group(group)).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }

    async fn read_group(&self, group: &str, cached: bool, filter: GroupFilter) -> Result<Vec<Task>> {
        if !cached {
            return Ok(self.ctx.store.query(group, filter)?);
        }

        let cache = self.ctx.broker.cache();
        let mut tasks = Vec::new();
        for key in self.cached_members(group).await? {
            // Members may have been evicted individually
            if let Some(bytes) = cache.get(&key).await? {
                let task = Task::from_bytes(&bytes)?;
                if filter.matches(&task) {
                    tasks.push(task);
                }
            }
        }
        sort_records(&mut tasks);
        Ok(tasks)
    }

    /// Stored return value of a task, absent until it finished
    pub async fn result(&self, id: &TaskId, wait: Wait, cached: bool) -> Result<Option<Value>> {
        Ok(self
            .fetch(id, wait, cached)
            .await?
            .and_then(|task| task.result))
    }

    /// Full stored record of a finished task
    pub async fn fetch(&self, id: &TaskId, wait: Wait, cached: bool) -> Result<Option<Task>> {
        poll(wait, self.ctx.config.result_poll(), || self.read_task(id, cached)).await
    }

    /// Number of members of a group, or of its failed members with
    /// `failures`. Absent when the group has no stored members at all.
    pub async fn count_group(&self, group: &str, cached: bool, failures: bool) -> Result<Option<usize>> {
        let total = if cached {
            self.cached_members(group).await?.len()
        } else {
            self.ctx.store.query(group, GroupFilter::All)?.len()
        };
        if total == 0 {
            return Ok(None);
        }

        if failures {
            Ok(Some(self.read_group(group, cached, GroupFilter::Failures).await?.len()))
        } else {
            Ok(Some(total))
        }
    }

    /// Results of a group's members in chain order then completion order
    pub async fn result_group(&self, group: &str, query: GroupQuery) -> Result<Option<Vec<Value>>> {
        Ok(self.fetch_group(group, query).await?.map(|tasks| {
            tasks
                .into_iter()
                .map(|task| task.result.unwrap_or(Value::Null))
                .collect()
        }))
    }

    /// Records of a group's members in chain order then completion order
    ///
    /// Absent while the group has no stored members. Once it has some, the
    /// read yields a list even when the filter leaves it empty.
    pub async fn fetch_group(&self, group: &str, query: GroupQuery) -> Result<Option<Vec<Task>>> {
        let interval = self.ctx.config.result_poll();
        let started = Instant::now();

        if let Some(count) = query.count {
            let reached = poll(query.wait, interval, || async {
                Ok(self
                    .count_group(group, query.cached, false)
                    .await?
                    .filter(|&n| n >= count))
            })
            .await?;
            if reached.is_none() {
                return Ok(None);
            }
        }

        let filter = if query.failures {
            GroupFilter::All
        } else {
            GroupFilter::Successes
        };
        let wait = query.wait.remaining(started);
        poll(wait, interval, || async {
            let members = self.read_group(group, query.cached, GroupFilter::All).await?;
            if members.is_empty() {
                return Ok(None);
            }
            Ok(Some(
                members
                    .into_iter()
                    .filter(|task| filter.matches(task))
                    .collect(),
            ))
        })
        .await
    }

    /// Remove every stored member of a group. Returns how many were removed.
    pub async fn delete_group(&self, group: &str, cached: bool) -> Result<usize> {
        if !cached {
            let removed = self.ctx.store.delete_group(group)?;
            debug!("Deleted {} stored results of group {}", removed, group);
            return Ok(removed);
        }

        let mut keys = self.cached_members(group).await?;
        let removed = keys.len();
        keys.push(self.keys.group(group));
        self.ctx.broker.cache().delete_many(&keys).await?;
        debug!("Deleted {} cached results of group {}", removed, group);
        Ok(removed)
    }

    /// Remove a task's cached record. The durable record is untouched.
    pub async fn delete_cached(&self, id: &TaskId) -> Result<()> {
        self.ctx.broker.cache().delete(&self.keys.task(id)).await?;
        Ok(())
    }
}

/// Whole milliseconds of a per-task limit. Zero and out-of-range limits are rejected.
fn timeout_millis(timeout: Duration) -> Result<u64> {
    match u64::try_from(timeout.as_millis()) {
        Ok(ms) if ms > 0 => Ok(ms),
        _ => Err(ClientError::InvalidTimeout(timeout)),
    }
}
