use crate::Wait;
use std::time::Duration;

/// Per-submission settings. Unset fields fall back to the cluster config.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub group: Option<String>,
    pub cached: Option<bool>,
    pub cache_ttl: Option<Duration>,
    pub sync: Option<bool>,
    pub timeout: Option<Duration>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = Some(cached);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Parameters of a group read.
///
/// `failures = false` selects successful members only, `true` selects all
/// of them. With `count` set the read first waits for the group to reach
/// that size and yields nothing if it does not within `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupQuery {
    pub wait: Wait,
    pub count: Option<usize>,
    pub cached: bool,
    pub failures: bool,
}

impl GroupQuery {
    /// Successful members only
    pub fn successes() -> Self {
        GroupQuery {
            wait: Wait::none(),
            count: None,
            cached: false,
            failures: false,
        }
    }

    /// Every member, failed ones included
    pub fn all() -> Self {
        GroupQuery {
            failures: true,
            ..Self::successes()
        }
    }

    pub fn wait(mut self, wait: Wait) -> Self {
        self.wait = wait;
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn failures(mut self, failures: bool) -> Self {
        self.failures = failures;
        self
    }
}
