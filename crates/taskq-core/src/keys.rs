use crate::TaskId;

/// Cache key layout shared by the monitor (writer) and the query API (reader).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    list_key: String,
}

impl CacheKeys {
    pub fn new(list_key: impl Into<String>) -> Self {
        CacheKeys {
            list_key: list_key.into(),
        }
    }

    pub fn list_key(&self) -> &str {
        &self.list_key
    }

    /// Key of a single cached task record
    pub fn task(&self, task_id: &TaskId) -> String {
        format!("{}:{}", self.list_key, task_id)
    }

    /// Key of the list of task keys belonging to a group
    pub fn group(&self, group: &str) -> String {
        format!("{}:{}:keys", self.list_key, group)
    }

    /// Key of the argument snapshot of an iterable submission
    pub fn iter_args(&self, group: &str) -> String {
        format!("{}:{}:args", self.list_key, group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_key_layout() {
        let keys = CacheKeys::new("default");
        let id = Uuid::nil();

        assert_eq!(keys.task(&id), format!("default:{}", id));
        assert_eq!(keys.group("cache_test"), "default:cache_test:keys");
        assert_eq!(keys.iter_args("abc"), "default:abc:args");
    }
}
