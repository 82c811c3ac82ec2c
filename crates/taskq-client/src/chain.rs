use crate::{ClientError, GroupQuery, Result, SubmitOptions, TaskClient, Wait};
use taskq_core::{Signature, Task, Value};
use tracing::debug;
use uuid::Uuid;

/// Ordered list of steps executed one after another under one group.
///
/// Progress is read back from the group's stored results, so `current()`
/// counts finished steps. Appending to a chain that already ran, or running
/// it again, discards the previous results first.
pub struct Chain {
    client: TaskClient,
    steps: Vec<Signature>,
    group: String,
    cached: bool,
    sync: bool,
    started: bool,
    stale: bool,
}

impl Chain {
    pub fn new(client: TaskClient) -> Self {
        let config = client.context().config.clone();
        Chain {
            client,
            steps: Vec::new(),
            group: Uuid::new_v4().to_string(),
            cached: config.cached,
            sync: config.sync,
            started: false,
            stale: false,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Applies to every step from the next `run()` on
    pub fn set_cached(&mut self, cached: bool) {
        self.cached = cached;
    }

    pub fn set_sync(&mut self, sync: bool) {
        self.sync = sync;
    }

    /// Add a step and return the new length
    pub fn append(&mut self, signature: Signature) -> usize {
        self.steps.push(signature);
        if self.started {
            self.started = false;
            self.stale = true;
        }
        self.steps.len()
    }

    pub fn length(&self) -> usize {
        self.steps.len()
    }

    /// Submit the chain, clearing results of a previous run
    pub async fn run(&mut self) -> Result<String> {
        if self.steps.is_empty() {
            return Err(ClientError::EmptyChain);
        }

        if self.started || self.stale {
            let durable = self.client.delete_group(&self.group, false).await?;
            let cached = self.client.delete_group(&self.group, true).await?;
            debug!(
                "Reset chain {} ({} stored, {} cached results removed)",
                self.group, durable, cached
            );
            self.started = false;
            self.stale = false;
        }

        let options = SubmitOptions::new()
            .group(self.group.clone())
            .cached(self.cached)
            .sync(self.sync);
        self.client.submit_chain(self.steps.clone(), options).await?;
        self.started = true;
        Ok(self.group.clone())
    }

    /// Number of finished steps, absent before the chain ran
    pub async fn current(&self) -> Result<Option<usize>> {
        if !self.started {
            return Ok(None);
        }
        self.client.count_group(&self.group, self.cached, false).await
    }

    /// Step results in order, once every step finished within `wait`
    pub async fn result(&self, wait: Wait) -> Result<Option<Vec<Value>>> {
        if !self.started {
            return Ok(None);
        }
        let query = GroupQuery::successes()
            .wait(wait)
            .count(self.length())
            .cached(self.cached);
        self.client.result_group(&self.group, query).await
    }

    /// Records of the finished steps, failed ones included
    pub async fn fetch(&self) -> Result<Option<Vec<Task>>> {
        if !self.started {
            return Ok(None);
        }
        let query = GroupQuery::all().cached(self.cached);
        self.client.fetch_group(&self.group, query).await
    }
}
