use crate::{GroupQuery, Result, SubmitOptions, TaskClient, Wait};
use std::sync::Arc;
use taskq_cluster::{ClusterConfig, TaskRegistry};
use taskq_core::{Signature, Task, TaskId, Value};
use taskq_persistence::TaskStore;

/// Synchronous client for callers outside async code (wraps `TaskClient`)
pub struct BlockingClient {
    runtime: tokio::runtime::Runtime,
    client: TaskClient,
}

impl BlockingClient {
    pub fn new(client: TaskClient) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()?;
        Ok(BlockingClient { runtime, client })
    }

    /// Connect to a `tq-broker`
    pub fn connect(
        config: ClusterConfig,
        store: Arc<dyn TaskStore>,
        registry: TaskRegistry,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Runtime::new()?;
        let client = runtime.block_on(TaskClient::connect(config, store, registry))?;
        Ok(BlockingClient { runtime, client })
    }

    pub fn client(&self) -> &TaskClient {
        &self.client
    }

    pub fn submit(&self, signature: Signature, options: SubmitOptions) -> Result<TaskId> {
        self.runtime.block_on(self.client.submit(signature, options))
    }

    pub fn submit_iterable(
        &self,
        func: impl Into<String>,
        sequence: Vec<Value>,
        options: SubmitOptions,
    ) -> Result<TaskId> {
        self.runtime
            .block_on(self.client.submit_iterable(func, sequence, options))
    }

    pub fn submit_chain(&self, steps: Vec<Signature>, options: SubmitOptions) -> Result<String> {
        self.runtime.block_on(self.client.submit_chain(steps, options))
    }

    pub fn result(&self, id: &TaskId, wait: Wait, cached: bool) -> Result<Option<Value>> {
        self.runtime.block_on(self.client.result(id, wait, cached))
    }

    pub fn fetch(&self, id: &TaskId, wait: Wait, cached: bool) -> Result<Option<Task>> {
        self.runtime.block_on(self.client.fetch(id, wait, cached))
    }

    pub fn count_group(&self, group: &str, cached: bool, failures: bool) -> Result<Option<usize>> {
        self.runtime
            .block_on(self.client.count_group(group, cached, failures))
    }

    pub fn result_group(&self, group: &str, query: GroupQuery) -> Result<Option<Vec<Value>>> {
        self.runtime.block_on(self.client.result_group(group, query))
    }

    pub fn fetch_group(&self, group: &str, query: GroupQuery) -> Result<Option<Vec<Task>>> {
        self.runtime.block_on(self.client.fetch_group(group, query))
    }

    pub fn delete_group(&self, group: &str, cached: bool) -> Result<usize> {
        self.runtime.block_on(self.client.delete_group(group, cached))
    }

    pub fn delete_cached(&self, id: &TaskId) -> Result<()> {
        self.runtime.block_on(self.client.delete_cached(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskq_broker::MemoryBroker;
    use taskq_cluster::ClusterContext;
    use taskq_persistence::MemoryStore;

    #[test]
    fn test_blocking_sync_submission() {
        let ctx = ClusterContext::new(
            ClusterConfig::default(),
            Arc::new(MemoryBroker::new()),
            Arc::new(MemoryStore::new()),
            TaskRegistry::with_builtins(),
        )
        .unwrap();
        let client = BlockingClient::new(TaskClient::new(ctx)).unwrap();

        let id = client
            .submit(
                Signature::new("math.floor").arg(3.9),
                SubmitOptions::new().sync(true),
            )
            .unwrap();

        assert_eq!(client.result(&id, Wait::none(), false).unwrap(), Some(json!(3)));
        assert!(client.result(&id, Wait::none(), true).unwrap().is_none());
    }
}
