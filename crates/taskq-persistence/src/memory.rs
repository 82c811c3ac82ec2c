use crate::{ensure_finished, sort_records, GroupFilter, Result, TaskStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use taskq_core::{Task, TaskId};

/// Process-local store, used by tests and single-process deployments
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TaskStore for MemoryStore {
    fn save(&self, task: &Task) -> Result<()> {
        ensure_finished(task)?;
        self.tasks.write().insert(task.id, task.clone());
        Ok(())
    }

    fn get(&self, id: &TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.read().get(id).cloned())
    }

    fn query(&self, group: &str, filter: GroupFilter) -> Result<Vec<Task>> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .values()
            .filter(|task| task.group.as_deref() == Some(group) && filter.matches(task))
            .cloned()
            .collect();
        sort_records(&mut tasks);
        Ok(tasks)
    }

    fn delete_task(&self, id: &TaskId) -> Result<bool> {
        Ok(self.tasks.write().remove(id).is_some())
    }

    fn delete_group(&self, group: &str) -> Result<usize> {
        let mut tasks = self.tasks.write();
        let before = tasks.len();
        tasks.retain(|_, task| task.group.as_deref() != Some(group));
        Ok(before - tasks.len())
    }
}
